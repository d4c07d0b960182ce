//! WhatsApp Cloud API adapter for plain text messages.
//!
//! Fire-and-forget: the returned `wamid` is recorded as the reference but
//! no reply correlation is tracked for this channel.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use courier_common::types::{Channel, MessageContent, OutboundMessage};

use crate::error::DeliveryError;
use crate::retry::RetryPolicy;
use crate::ChannelAdapter;

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v19.0";

#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub access_token: String,
    pub phone_number_id: String,
    pub api_base_url: String,
}

impl WhatsAppConfig {
    pub fn new(access_token: &str, phone_number_id: &str) -> Self {
        Self {
            access_token: access_token.to_string(),
            phone_number_id: phone_number_id.to_string(),
            api_base_url: GRAPH_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

pub struct WhatsAppCloudAdapter {
    config: WhatsAppConfig,
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl WhatsAppCloudAdapter {
    pub fn new(config: WhatsAppConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        tracing::info!(
            phone_number_id = %config.phone_number_id,
            "WhatsApp Cloud adapter initialized"
        );

        Ok(Self {
            config,
            http,
            retry: RetryPolicy::once(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn post_text(&self, to_cell: &str, body: &str) -> Result<String, DeliveryError> {
        let payload = json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to_cell.trim_start_matches('+'),
            "type": "text",
            "text": { "preview_url": false, "body": body },
        });

        let response = self
            .http
            .post(format!(
                "{}/{}/messages",
                self.config.api_base_url.trim_end_matches('/'),
                self.config.phone_number_id
            ))
            .bearer_auth(&self.config.access_token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::from_status(status, &body));
        }

        let parsed: SendResponse = response.json().await?;
        parsed
            .messages
            .into_iter()
            .next()
            .map(|m| m.id)
            .ok_or_else(|| DeliveryError::Permanent("WhatsApp response carried no message id".to_string()))
    }
}

#[async_trait]
impl ChannelAdapter for WhatsAppCloudAdapter {
    fn channel(&self) -> Channel {
        Channel::WhatsApp
    }

    async fn send(&self, message: &OutboundMessage) -> Result<String, DeliveryError> {
        let MessageContent::WhatsApp { to_cell, body } = &message.content else {
            return Err(DeliveryError::wrong_channel(Channel::WhatsApp, message));
        };

        tracing::debug!(message_id = %message.id, to = %to_cell, "Sending WhatsApp message");

        let id = self
            .retry
            .run(Channel::WhatsApp, || self.post_text(to_cell, body))
            .await?;

        tracing::info!(message_id = %message.id, wamid = %id, "WhatsApp message accepted");
        Ok(id)
    }
}
