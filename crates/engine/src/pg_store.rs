//! PostgreSQL-backed [`MessageStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{
    Channel, DeliveryStatus, InboundMessage, MessageContent, OutboundMessage,
};

use crate::store::MessageStore;

/// Flat row shape of `outbound_messages`.
#[derive(Debug, sqlx::FromRow)]
struct OutboundRow {
    id: Uuid,
    tenant_id: String,
    branch_id: String,
    channel: Channel,
    destination: String,
    subject: Option<String>,
    body: String,
    recipient_type: Option<String>,
    reference: Option<String>,
    status: DeliveryStatus,
    composed_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    is_delivered: bool,
    client_responded: bool,
}

impl From<OutboundRow> for OutboundMessage {
    fn from(row: OutboundRow) -> Self {
        let content = match row.channel {
            Channel::Sms => MessageContent::Sms {
                to_cell: row.destination,
                body: row.body,
            },
            Channel::Email => MessageContent::Email {
                to_email: row.destination,
                subject: row.subject.unwrap_or_default(),
                html: row.body,
            },
            Channel::WhatsApp => MessageContent::WhatsApp {
                to_cell: row.destination,
                body: row.body,
            },
        };

        OutboundMessage {
            id: row.id,
            tenant_id: row.tenant_id,
            branch_id: row.branch_id,
            recipient_type: row.recipient_type,
            content,
            reference: row.reference,
            composed_at: row.composed_at,
            sent_at: row.sent_at,
            status: row.status,
            is_delivered: row.is_delivered,
            client_responded: row.client_responded,
        }
    }
}

pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn save_outbound(&self, message: &OutboundMessage) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO outbound_messages
                (id, tenant_id, branch_id, channel, destination, subject, body, recipient_type,
                 reference, status, composed_at, sent_at, is_delivered, client_responded)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO UPDATE
            SET reference = EXCLUDED.reference,
                status = EXCLUDED.status,
                sent_at = EXCLUDED.sent_at,
                is_delivered = EXCLUDED.is_delivered,
                client_responded = EXCLUDED.client_responded
            "#,
        )
        .bind(message.id)
        .bind(&message.tenant_id)
        .bind(&message.branch_id)
        .bind(message.channel().to_string())
        .bind(message.destination())
        .bind(message.subject())
        .bind(message.text())
        .bind(&message.recipient_type)
        .bind(&message.reference)
        .bind(message.status.to_string())
        .bind(message.composed_at)
        .bind(message.sent_at)
        .bind(message.is_delivered)
        .bind(message.client_responded)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            message_id = %message.id,
            status = %message.status,
            "Outbound message saved"
        );

        Ok(())
    }

    async fn update_outbound(&self, message: &OutboundMessage) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE outbound_messages
            SET is_delivered = $2, client_responded = $3
            WHERE id = $1
            "#,
        )
        .bind(message.id)
        .bind(message.is_delivered)
        .bind(message.client_responded)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Outbound message {} not found",
                message.id
            )));
        }

        Ok(())
    }

    async fn get_outbound(&self, id: Uuid) -> Result<Option<OutboundMessage>, AppError> {
        let row: Option<OutboundRow> =
            sqlx::query_as("SELECT * FROM outbound_messages WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(OutboundMessage::from))
    }

    async fn find_outbound_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<OutboundMessage>, AppError> {
        let row: Option<OutboundRow> =
            sqlx::query_as("SELECT * FROM outbound_messages WHERE reference = $1")
                .bind(reference)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(OutboundMessage::from))
    }

    async fn save_inbound(&self, message: &InboundMessage) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO inbound_messages
                (message_id, branch_id, parent_reference, from_cell, is_response,
                 previous_history, body, received_at, is_read)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (message_id) DO NOTHING
            "#,
        )
        .bind(&message.message_id)
        .bind(&message.branch_id)
        .bind(&message.parent_reference)
        .bind(&message.from_cell)
        .bind(message.is_response)
        .bind(&message.previous_history)
        .bind(&message.body)
        .bind(message.received_at)
        .bind(message.is_read)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn inbox(&self, branch_id: &str) -> Result<Vec<InboundMessage>, AppError> {
        let messages: Vec<InboundMessage> = sqlx::query_as(
            "SELECT * FROM inbound_messages WHERE branch_id = $1 ORDER BY received_at DESC",
        )
        .bind(branch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    async fn sent_box(
        &self,
        branch_id: &str,
        page: u32,
        count: u32,
    ) -> Result<Vec<OutboundMessage>, AppError> {
        let offset = i64::from(page) * i64::from(count);

        let rows: Vec<OutboundRow> = sqlx::query_as(
            r#"
            SELECT * FROM outbound_messages
            WHERE branch_id = $1
            ORDER BY composed_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(branch_id)
        .bind(i64::from(count))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(OutboundMessage::from).collect())
    }
}
