//! Message persistence.
//!
//! Outbound messages are saved once their adapter call completes and later
//! only have their response flags updated. Inbound replies are filed once;
//! filing the same provider message id again is a no-op.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{InboundMessage, OutboundMessage};

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert or replace an outbound message.
    async fn save_outbound(&self, message: &OutboundMessage) -> Result<(), AppError>;

    /// Persist the delivery and response flags of an already saved message.
    async fn update_outbound(&self, message: &OutboundMessage) -> Result<(), AppError>;

    async fn get_outbound(&self, id: Uuid) -> Result<Option<OutboundMessage>, AppError>;

    async fn find_outbound_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<OutboundMessage>, AppError>;

    /// File an inbound message. Returns `false` if it was already filed.
    async fn save_inbound(&self, message: &InboundMessage) -> Result<bool, AppError>;

    /// Everything filed for a branch, newest first.
    async fn inbox(&self, branch_id: &str) -> Result<Vec<InboundMessage>, AppError>;

    /// One page of a branch's outbound messages across all channels, newest
    /// first. Pages are zero-based.
    async fn sent_box(
        &self,
        branch_id: &str,
        page: u32,
        count: u32,
    ) -> Result<Vec<OutboundMessage>, AppError>;
}

/// Process-local store used in tests and when no database is wired in.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    outbound: RwLock<Vec<OutboundMessage>>,
    inbound: RwLock<Vec<InboundMessage>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn save_outbound(&self, message: &OutboundMessage) -> Result<(), AppError> {
        let mut outbound = self.outbound.write().unwrap_or_else(PoisonError::into_inner);
        match outbound.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message.clone(),
            None => outbound.push(message.clone()),
        }
        Ok(())
    }

    async fn update_outbound(&self, message: &OutboundMessage) -> Result<(), AppError> {
        let mut outbound = self.outbound.write().unwrap_or_else(PoisonError::into_inner);
        let existing = outbound
            .iter_mut()
            .find(|m| m.id == message.id)
            .ok_or_else(|| AppError::NotFound(format!("Outbound message {} not found", message.id)))?;
        existing.is_delivered = message.is_delivered;
        existing.client_responded = message.client_responded;
        Ok(())
    }

    async fn get_outbound(&self, id: Uuid) -> Result<Option<OutboundMessage>, AppError> {
        let outbound = self.outbound.read().unwrap_or_else(PoisonError::into_inner);
        Ok(outbound.iter().find(|m| m.id == id).cloned())
    }

    async fn find_outbound_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<OutboundMessage>, AppError> {
        let outbound = self.outbound.read().unwrap_or_else(PoisonError::into_inner);
        Ok(outbound
            .iter()
            .find(|m| m.reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn save_inbound(&self, message: &InboundMessage) -> Result<bool, AppError> {
        let mut inbound = self.inbound.write().unwrap_or_else(PoisonError::into_inner);
        if inbound.iter().any(|m| m.message_id == message.message_id) {
            return Ok(false);
        }
        inbound.push(message.clone());
        Ok(true)
    }

    async fn inbox(&self, branch_id: &str) -> Result<Vec<InboundMessage>, AppError> {
        let inbound = self.inbound.read().unwrap_or_else(PoisonError::into_inner);
        let mut filed: Vec<InboundMessage> = inbound
            .iter()
            .filter(|m| m.branch_id == branch_id)
            .cloned()
            .collect();
        filed.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        Ok(filed)
    }

    async fn sent_box(
        &self,
        branch_id: &str,
        page: u32,
        count: u32,
    ) -> Result<Vec<OutboundMessage>, AppError> {
        let outbound = self.outbound.read().unwrap_or_else(PoisonError::into_inner);
        let mut sent: Vec<&OutboundMessage> =
            outbound.iter().filter(|m| m.branch_id == branch_id).collect();
        sent.sort_by(|a, b| b.composed_at.cmp(&a.composed_at));

        let offset = (page as usize).saturating_mul(count as usize);
        Ok(sent
            .into_iter()
            .skip(offset)
            .take(count as usize)
            .cloned()
            .collect())
    }
}
