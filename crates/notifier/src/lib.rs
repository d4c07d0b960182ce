//! Channel adapters for outbound notification delivery.
//!
//! Each adapter wraps one external transport behind [`ChannelAdapter`]:
//! - SMS via the Twilio REST API (also the inbound [`ReplySource`])
//! - Email via the Resend HTTP API, with a bounded cool-down retry
//! - WhatsApp via the WhatsApp Cloud API, fire-and-forget
//!
//! Adapters never queue or persist; the engine's scheduler owns both.

pub mod email;
pub mod error;
pub mod retry;
pub mod sms;
pub mod whatsapp;

use async_trait::async_trait;

use courier_common::types::{Channel, InboundMessage, OutboundMessage, PendingReply};

pub use email::{ResendConfig, ResendEmailAdapter};
pub use error::DeliveryError;
pub use retry::RetryPolicy;
pub use sms::{TwilioConfig, TwilioSmsAdapter};
pub use whatsapp::{WhatsAppCloudAdapter, WhatsAppConfig};

/// One outbound transport.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Channel this adapter delivers on.
    fn channel(&self) -> Channel;

    /// Deliver a message and return the provider-assigned reference.
    async fn send(&self, message: &OutboundMessage) -> Result<String, DeliveryError>;
}

/// Inbound side of a transport, polled for replies to sent messages.
#[async_trait]
pub trait ReplySource: Send + Sync {
    /// Fetch inbound messages not returned by an earlier call.
    ///
    /// `pending` lists the references still waiting for a reply. Returned
    /// items carrying a `parent_reference` must name one of them.
    async fn fetch_replies(
        &self,
        pending: &[PendingReply],
    ) -> Result<Vec<InboundMessage>, DeliveryError>;
}

/// Stand-in for a channel whose provider credentials are absent.
pub struct UnconfiguredAdapter {
    channel: Channel,
}

impl UnconfiguredAdapter {
    pub fn new(channel: Channel) -> Self {
        tracing::warn!(channel = %channel, "Channel has no provider configured; sends will fail");
        Self { channel }
    }
}

#[async_trait]
impl ChannelAdapter for UnconfiguredAdapter {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, _message: &OutboundMessage) -> Result<String, DeliveryError> {
        Err(DeliveryError::NotConfigured(self.channel))
    }
}

/// Reply source for deployments without an inbound SMS provider.
pub struct NoReplySource;

#[async_trait]
impl ReplySource for NoReplySource {
    async fn fetch_replies(
        &self,
        _pending: &[PendingReply],
    ) -> Result<Vec<InboundMessage>, DeliveryError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_adapter_refuses() {
        let adapter = UnconfiguredAdapter::new(Channel::WhatsApp);
        let msg = OutboundMessage::whatsapp("t1", "B1", "+1555", "hello");
        let err = adapter.send(&msg).await.unwrap_err();
        assert!(matches!(err, DeliveryError::NotConfigured(Channel::WhatsApp)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_no_reply_source_is_empty() {
        let replies = NoReplySource.fetch_replies(&[]).await.unwrap();
        assert!(replies.is_empty());
    }
}
