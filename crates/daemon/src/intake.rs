//! Redis intake bridge.
//!
//! Producers in other processes `RPUSH` JSON-encoded outbound messages onto a
//! Redis list. The bridge pops them with `BLPOP` and hands them to the
//! dispatcher. Payloads that do not parse or are missing addressing are
//! logged and dropped.
//!
//! `BLPOP` holds its connection for the whole wait, so the bridge must be
//! given a connection of its own rather than the one the credit ledger uses.

use std::time::Duration;

use redis::aio::ConnectionManager;
use tokio_util::sync::CancellationToken;

use courier_common::error::AppError;
use courier_common::types::{DeliveryStatus, OutboundMessage};
use courier_engine::Dispatcher;

/// Seconds a single `BLPOP` waits before returning empty.
const BLPOP_TIMEOUT_SECS: u64 = 5;

/// Pause after a Redis error before trying again.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub struct IntakeBridge {
    redis: ConnectionManager,
    key: String,
    dispatcher: Dispatcher,
}

impl IntakeBridge {
    pub fn new(redis: ConnectionManager, key: &str, dispatcher: Dispatcher) -> Self {
        Self {
            redis,
            key: key.to_string(),
            dispatcher,
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!(key = %self.key, "Intake bridge listening");

        loop {
            let popped = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                popped = self.pop() => popped,
            };

            match popped {
                Ok(Some(payload)) => self.accept(&payload),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(key = %self.key, error = %e, "Intake pop failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        tracing::info!("Intake bridge stopped");
    }

    async fn pop(&mut self) -> redis::RedisResult<Option<String>> {
        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(&self.key)
            .arg(BLPOP_TIMEOUT_SECS)
            .query_async(&mut self.redis)
            .await?;
        Ok(popped.map(|(_, payload)| payload))
    }

    fn accept(&self, payload: &str) {
        match parse_payload(payload) {
            Ok(message) => {
                tracing::debug!(
                    message_id = %message.id,
                    channel = %message.channel(),
                    "Outbound message received from intake"
                );
                self.dispatcher.enqueue(message);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed intake payload");
            }
        }
    }
}

/// Decode one intake payload and check it is a fresh, addressable message.
pub fn parse_payload(payload: &str) -> Result<OutboundMessage, AppError> {
    let message: OutboundMessage = serde_json::from_str(payload)?;

    if message.tenant_id.trim().is_empty() {
        return Err(AppError::Validation("tenant_id is empty".to_string()));
    }
    if message.branch_id.trim().is_empty() {
        return Err(AppError::Validation("branch_id is empty".to_string()));
    }
    if message.destination().trim().is_empty() {
        return Err(AppError::Validation(format!(
            "message {} has no destination",
            message.id
        )));
    }
    if message.reference.is_some() || message.status != DeliveryStatus::Queued {
        return Err(AppError::Validation(format!(
            "message {} was already dispatched",
            message.id
        )));
    }

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_common::types::Channel;

    #[test]
    fn test_parse_minimal_sms() {
        let message = parse_payload(
            r#"{"tenant_id":"acme","branch_id":"B1","content":{"channel":"sms","to_cell":"+27820000001","body":"Policy renewed"}}"#,
        )
        .unwrap();
        assert_eq!(message.channel(), Channel::Sms);
        assert_eq!(message.destination(), "+27820000001");
    }

    #[test]
    fn test_parse_email_with_recipient_type() {
        let message = parse_payload(
            r#"{"tenant_id":"acme","branch_id":"B1","recipient_type":"client",
                "content":{"channel":"email","to_email":"a@b.co","subject":"Statement","html":"<p>Due</p>"}}"#,
        )
        .unwrap();
        assert_eq!(message.subject(), Some("Statement"));
        assert_eq!(message.recipient_type.as_deref(), Some("client"));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            parse_payload("not json"),
            Err(AppError::Serialization(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_channel() {
        let result = parse_payload(
            r#"{"tenant_id":"acme","branch_id":"B1","content":{"channel":"fax","to":"1"}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_missing_destination() {
        let result = parse_payload(
            r#"{"tenant_id":"acme","branch_id":"B1","content":{"channel":"whatsapp","to_cell":" ","body":"hi"}}"#,
        );
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_rejects_already_sent_message() {
        let result = parse_payload(
            r#"{"tenant_id":"acme","branch_id":"B1","reference":"SM1",
                "content":{"channel":"sms","to_cell":"+1555","body":"hi"}}"#,
        );
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
