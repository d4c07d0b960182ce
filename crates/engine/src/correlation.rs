//! Reply correlation store.
//!
//! Holds, per branch and in send order, the SMS references still waiting for
//! a reply. A reference lives in at most one branch's list and is removed the
//! first time a reply is matched to it, so each outbound message is matched
//! at most once.

use std::collections::HashMap;

use courier_common::types::PendingReply;

pub trait CorrelationStore: Send {
    /// Remember a sent SMS. Recording a reference twice keeps the first entry.
    fn record(&mut self, pending: PendingReply);

    /// Remove `reference` from `branch_id`'s list. Returns the entry if it was
    /// outstanding there.
    fn consume(&mut self, branch_id: &str, reference: &str) -> Option<PendingReply>;

    /// References still waiting for a reply on one branch, oldest first.
    fn outstanding(&self, branch_id: &str) -> Vec<PendingReply>;

    /// Every outstanding reference across branches.
    fn all_outstanding(&self) -> Vec<PendingReply>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Correlation state held in process memory. Lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryCorrelationStore {
    branches: HashMap<String, Vec<PendingReply>>,
    /// reference -> owning branch
    owners: HashMap<String, String>,
}

impl InMemoryCorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CorrelationStore for InMemoryCorrelationStore {
    fn record(&mut self, pending: PendingReply) {
        if let Some(owner) = self.owners.get(&pending.reference) {
            tracing::warn!(
                reference = %pending.reference,
                branch_id = %owner,
                "Reference already awaiting a reply; ignoring duplicate"
            );
            return;
        }

        self.owners
            .insert(pending.reference.clone(), pending.branch_id.clone());
        self.branches
            .entry(pending.branch_id.clone())
            .or_default()
            .push(pending);
    }

    fn consume(&mut self, branch_id: &str, reference: &str) -> Option<PendingReply> {
        if self.owners.get(reference).map(String::as_str) != Some(branch_id) {
            return None;
        }
        self.owners.remove(reference);

        let list = self.branches.get_mut(branch_id)?;
        let position = list.iter().position(|p| p.reference == reference)?;
        let pending = list.remove(position);
        if list.is_empty() {
            self.branches.remove(branch_id);
        }
        Some(pending)
    }

    fn outstanding(&self, branch_id: &str) -> Vec<PendingReply> {
        self.branches.get(branch_id).cloned().unwrap_or_default()
    }

    fn all_outstanding(&self) -> Vec<PendingReply> {
        let mut all: Vec<PendingReply> = self.branches.values().flatten().cloned().collect();
        all.sort_by(|a, b| a.sent_at.cmp(&b.sent_at));
        all
    }

    fn len(&self) -> usize {
        self.owners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn pending(branch: &str, reference: &str, minutes_ago: i64) -> PendingReply {
        PendingReply {
            branch_id: branch.to_string(),
            reference: reference.to_string(),
            destination: "+27820000001".to_string(),
            sent_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn test_record_keeps_send_order_per_branch() {
        let mut store = InMemoryCorrelationStore::new();
        store.record(pending("B1", "SM1", 3));
        store.record(pending("B2", "SM2", 2));
        store.record(pending("B1", "SM3", 1));

        let refs: Vec<_> = store.outstanding("B1").into_iter().map(|p| p.reference).collect();
        assert_eq!(refs, vec!["SM1", "SM3"]);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_consume_removes_exactly_once() {
        let mut store = InMemoryCorrelationStore::new();
        store.record(pending("B1", "SM1", 3));
        store.record(pending("B1", "SM2", 2));

        assert!(store.consume("B1", "SM2").is_some());
        assert!(store.consume("B1", "SM2").is_none());

        let refs: Vec<_> = store.outstanding("B1").into_iter().map(|p| p.reference).collect();
        assert_eq!(refs, vec!["SM1"]);
    }

    #[test]
    fn test_consume_is_scoped_to_branch() {
        let mut store = InMemoryCorrelationStore::new();
        store.record(pending("B1", "SM1", 1));

        assert!(store.consume("B2", "SM1").is_none());
        assert_eq!(store.outstanding("B1").len(), 1);
    }

    #[test]
    fn test_duplicate_reference_not_recorded_twice() {
        let mut store = InMemoryCorrelationStore::new();
        store.record(pending("B1", "SM1", 2));
        store.record(pending("B2", "SM1", 1));

        assert_eq!(store.len(), 1);
        assert!(store.outstanding("B2").is_empty());
    }

    #[test]
    fn test_all_outstanding_oldest_first() {
        let mut store = InMemoryCorrelationStore::new();
        store.record(pending("B2", "SM_new", 1));
        store.record(pending("B1", "SM_old", 10));

        let refs: Vec<_> = store.all_outstanding().into_iter().map(|p| p.reference).collect();
        assert_eq!(refs, vec!["SM_old", "SM_new"]);
    }

    #[test]
    fn test_empty_branch_removed() {
        let mut store = InMemoryCorrelationStore::new();
        store.record(pending("B1", "SM1", 1));
        store.consume("B1", "SM1");
        assert!(store.is_empty());
        assert!(store.outstanding("B1").is_empty());
    }
}
