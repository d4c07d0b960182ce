//! Resend email adapter.
//!
//! Posts to `POST /emails` with a bearer API key. Connection timeouts and
//! provider-side failures are retried with a fixed cool-down, up to the
//! configured attempt budget (default: 3 attempts, 20s apart).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use courier_common::types::{Channel, MessageContent, OutboundMessage};

use crate::error::DeliveryError;
use crate::retry::RetryPolicy;
use crate::ChannelAdapter;

const RESEND_API_BASE: &str = "https://api.resend.com";

/// Default attempts per email on transient errors.
pub const DEFAULT_EMAIL_ATTEMPTS: u32 = 3;

/// Default cool-down between email attempts.
pub const DEFAULT_EMAIL_COOL_DOWN: Duration = Duration::from_secs(20);

/// Configuration for the Resend email provider.
#[derive(Debug, Clone)]
pub struct ResendConfig {
    pub api_key: String,
    pub from: String,
    pub api_base_url: String,
}

impl ResendConfig {
    pub fn new(api_key: &str, from: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            from: from.to_string(),
            api_base_url: RESEND_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ResendEmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[derive(Debug, Deserialize)]
struct ResendEmailResponse {
    #[serde(default)]
    id: Option<String>,
}

/// Resend-backed email transport.
pub struct ResendEmailAdapter {
    config: ResendConfig,
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl ResendEmailAdapter {
    pub fn new(config: ResendConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        tracing::info!(from = %config.from, "Resend email adapter initialized");

        Ok(Self {
            config,
            http,
            retry: RetryPolicy::new(DEFAULT_EMAIL_ATTEMPTS, DEFAULT_EMAIL_COOL_DOWN),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn post_email(&self, request: &ResendEmailRequest<'_>) -> Result<String, DeliveryError> {
        let response = self
            .http
            .post(format!(
                "{}/emails",
                self.config.api_base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::from_status(status, &body));
        }

        let parsed: ResendEmailResponse = response.json().await?;
        Ok(parsed.id.unwrap_or_else(|| {
            let generated = Uuid::new_v4().to_string();
            tracing::warn!(reference = %generated, "Resend response carried no id; using a local reference");
            generated
        }))
    }
}

#[async_trait]
impl ChannelAdapter for ResendEmailAdapter {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, message: &OutboundMessage) -> Result<String, DeliveryError> {
        let MessageContent::Email {
            to_email,
            subject,
            html,
        } = &message.content
        else {
            return Err(DeliveryError::wrong_channel(Channel::Email, message));
        };

        let request = ResendEmailRequest {
            from: &self.config.from,
            to: [to_email.as_str()],
            subject: subject.as_str(),
            html: html.as_str(),
        };

        tracing::debug!(message_id = %message.id, to = %to_email, "Sending email via Resend");

        let id = self
            .retry
            .run(Channel::Email, || self.post_email(&request))
            .await?;

        tracing::info!(message_id = %message.id, reference = %id, "Email accepted by Resend");
        Ok(id)
    }
}
