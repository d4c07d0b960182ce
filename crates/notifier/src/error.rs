use reqwest::StatusCode;
use thiserror::Error;

use courier_common::types::{Channel, OutboundMessage};

/// Failure of a single delivery attempt.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Timeouts, dropped connections, throttling and provider-side 5xx.
    #[error("Transient transport error: {0}")]
    Transient(String),

    /// Rejected payloads, invalid destinations, bad credentials.
    #[error("Permanent transport error: {0}")]
    Permanent(String),

    #[error("No provider configured for {0}")]
    NotConfigured(Channel),

    #[error("Adapter for {expected} received a {actual} message")]
    WrongChannel { expected: Channel, actual: Channel },
}

impl DeliveryError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }

    pub fn wrong_channel(expected: Channel, message: &OutboundMessage) -> Self {
        DeliveryError::WrongChannel {
            expected,
            actual: message.channel(),
        }
    }

    /// Classify a non-success provider response.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let detail = format!("HTTP {}: {}", status.as_u16(), truncate(body, 300));
        if status.is_server_error()
            || status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
        {
            DeliveryError::Transient(detail)
        } else {
            DeliveryError::Permanent(detail)
        }
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            return DeliveryError::Transient(err.to_string());
        }
        if let Some(status) = err.status() {
            return DeliveryError::from_status(status, &err.to_string());
        }
        DeliveryError::Permanent(err.to_string())
    }
}

fn truncate(body: &str, max: usize) -> &str {
    match body.char_indices().nth(max) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
