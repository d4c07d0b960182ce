use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outbound notification transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    Email,
    WhatsApp,
}

impl Channel {
    /// Order in which the scheduler drains the per-channel queues.
    pub const DRAIN_ORDER: [Channel; 3] = [Channel::Email, Channel::Sms, Channel::WhatsApp];

    /// Whether sends on this channel consume tenant credits.
    pub fn is_metered(&self) -> bool {
        matches!(self, Channel::Sms | Channel::Email)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Sms => write!(f, "sms"),
            Channel::Email => write!(f, "email"),
            Channel::WhatsApp => write!(f, "whatsapp"),
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sms" => Ok(Channel::Sms),
            "email" => Ok(Channel::Email),
            "whatsapp" => Ok(Channel::WhatsApp),
            other => Err(format!("unknown channel '{}'", other)),
        }
    }
}

/// Delivery status of an outbound message.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    #[default]
    Queued,
    Sent,
    Failed,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Queued => write!(f, "queued"),
            DeliveryStatus::Sent => write!(f, "sent"),
            DeliveryStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(DeliveryStatus::Queued),
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("unknown delivery status '{}'", other)),
        }
    }
}

/// Channel-specific addressing and payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "lowercase")]
pub enum MessageContent {
    Sms { to_cell: String, body: String },
    Email {
        to_email: String,
        subject: String,
        html: String,
    },
    WhatsApp { to_cell: String, body: String },
}

/// A message composed by a caller and handed to the dispatch engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Tenant (company) whose credits pay for the send.
    pub tenant_id: String,
    /// Branch the message originates from; replies are filed against it.
    pub branch_id: String,
    #[serde(default)]
    pub recipient_type: Option<String>,
    pub content: MessageContent,
    /// Provider-assigned reference, set once after a successful send.
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default = "Utc::now")]
    pub composed_at: DateTime<Utc>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: DeliveryStatus,
    #[serde(default)]
    pub is_delivered: bool,
    #[serde(default)]
    pub client_responded: bool,
}

impl OutboundMessage {
    fn compose(tenant_id: &str, branch_id: &str, content: MessageContent) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            branch_id: branch_id.to_string(),
            recipient_type: None,
            content,
            reference: None,
            composed_at: Utc::now(),
            sent_at: None,
            status: DeliveryStatus::Queued,
            is_delivered: false,
            client_responded: false,
        }
    }

    pub fn sms(tenant_id: &str, branch_id: &str, to_cell: &str, body: &str) -> Self {
        Self::compose(
            tenant_id,
            branch_id,
            MessageContent::Sms {
                to_cell: to_cell.to_string(),
                body: body.to_string(),
            },
        )
    }

    pub fn email(tenant_id: &str, branch_id: &str, to_email: &str, subject: &str, html: &str) -> Self {
        Self::compose(
            tenant_id,
            branch_id,
            MessageContent::Email {
                to_email: to_email.to_string(),
                subject: subject.to_string(),
                html: html.to_string(),
            },
        )
    }

    pub fn whatsapp(tenant_id: &str, branch_id: &str, to_cell: &str, body: &str) -> Self {
        Self::compose(
            tenant_id,
            branch_id,
            MessageContent::WhatsApp {
                to_cell: to_cell.to_string(),
                body: body.to_string(),
            },
        )
    }

    pub fn with_recipient_type(mut self, recipient_type: &str) -> Self {
        self.recipient_type = Some(recipient_type.to_string());
        self
    }

    pub fn channel(&self) -> Channel {
        match self.content {
            MessageContent::Sms { .. } => Channel::Sms,
            MessageContent::Email { .. } => Channel::Email,
            MessageContent::WhatsApp { .. } => Channel::WhatsApp,
        }
    }

    /// Cell number or email address the message goes to.
    pub fn destination(&self) -> &str {
        match &self.content {
            MessageContent::Sms { to_cell, .. } | MessageContent::WhatsApp { to_cell, .. } => {
                to_cell
            }
            MessageContent::Email { to_email, .. } => to_email,
        }
    }

    /// Message text as a recipient would read it.
    pub fn text(&self) -> &str {
        match &self.content {
            MessageContent::Sms { body, .. } | MessageContent::WhatsApp { body, .. } => body,
            MessageContent::Email { html, .. } => html,
        }
    }

    /// Email subject, `None` for SMS and WhatsApp.
    pub fn subject(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Email { subject, .. } => Some(subject),
            _ => None,
        }
    }

    /// Record a successful adapter call.
    ///
    /// Returns `false` and leaves the message untouched when a reference or
    /// sent timestamp was already recorded.
    pub fn record_delivery(&mut self, reference: String, sent_at: DateTime<Utc>) -> bool {
        if self.reference.is_some() || self.sent_at.is_some() {
            return false;
        }
        self.reference = Some(reference);
        self.sent_at = Some(sent_at);
        self.status = DeliveryStatus::Sent;
        true
    }

    pub fn mark_failed(&mut self) {
        if self.sent_at.is_none() {
            self.status = DeliveryStatus::Failed;
        }
    }

    /// Flag the message as answered by its recipient.
    pub fn mark_responded(&mut self) {
        self.client_responded = true;
        self.is_delivered = true;
    }
}

/// An inbound SMS fetched from the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct InboundMessage {
    pub message_id: String,
    /// Branch the message is filed under.
    pub branch_id: String,
    /// Reference of the outbound message this replies to, if any.
    pub parent_reference: Option<String>,
    pub from_cell: Option<String>,
    pub is_response: bool,
    /// Audit trail of the conversation this reply belongs to.
    pub previous_history: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    pub is_read: bool,
}

impl InboundMessage {
    pub fn new(message_id: &str, branch_id: &str, from_cell: Option<&str>, body: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            branch_id: branch_id.to_string(),
            parent_reference: None,
            from_cell: from_cell.map(str::to_string),
            is_response: false,
            previous_history: String::new(),
            body: body.to_string(),
            received_at: Utc::now(),
            is_read: false,
        }
    }

    pub fn replying_to(mut self, parent_reference: &str) -> Self {
        self.parent_reference = Some(parent_reference.to_string());
        self.is_response = true;
        self
    }

    pub fn received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    /// Drop the link to a parent message; the item is filed as unsolicited.
    pub fn unlink(&mut self) {
        self.parent_reference = None;
        self.is_response = false;
    }
}

/// An SMS reference still waiting for a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingReply {
    pub branch_id: String,
    pub reference: String,
    /// Cell number the original message went to.
    pub destination: String,
    pub sent_at: DateTime<Utc>,
}
