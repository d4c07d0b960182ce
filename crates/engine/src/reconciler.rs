//! Reconciliation poller: matches inbound SMS replies to the messages that
//! provoked them.
//!
//! For every item the reply source returns:
//! 1. If it names a parent reference still outstanding for its branch, consume
//!    that reference from the correlation store
//! 2. Flag the original outbound message as responded and delivered
//! 3. Append an audit block with the original text to the reply's history
//! 4. File the item; anything unmatched is filed as unsolicited
//!
//! A consumed reference whose outbound record cannot be loaded does not count
//! as a match: the reply is unlinked and filed as unsolicited.
//!
//! Nothing here returns an error: transport and storage failures are logged
//! and the poll moves on.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use courier_common::types::InboundMessage;
use courier_notifier::ReplySource;

use crate::correlation::CorrelationStore;
use crate::store::MessageStore;

const AUDIT_RULE: &str =
    "--------------------------------------------------------------------------------";

/// Outcome of one poll.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub fetched: usize,
    pub matched: usize,
    pub unsolicited: usize,
    pub filed: usize,
}

pub struct ReconciliationPoller {
    replies: Arc<dyn ReplySource>,
}

impl ReconciliationPoller {
    pub fn new(replies: Arc<dyn ReplySource>) -> Self {
        Self { replies }
    }

    pub async fn poll(
        &self,
        correlation: &mut dyn CorrelationStore,
        store: &dyn MessageStore,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let pending = correlation.all_outstanding();

        let fetched = match self.replies.fetch_replies(&pending).await {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::warn!(
                    outstanding = pending.len(),
                    error = %e,
                    "Failed to fetch inbound replies"
                );
                return report;
            }
        };
        report.fetched = fetched.len();

        for mut inbound in fetched {
            let consumed = inbound
                .parent_reference
                .as_deref()
                .and_then(|reference| correlation.consume(&inbound.branch_id, reference));

            let linked = match consumed {
                Some(pending) => link_to_original(&mut inbound, &pending.reference, store).await,
                None => {
                    if let Some(reference) = &inbound.parent_reference {
                        tracing::warn!(
                            message_id = %inbound.message_id,
                            branch_id = %inbound.branch_id,
                            reference = %reference,
                            "Reply names a reference that is not outstanding; filing as unsolicited"
                        );
                    }
                    false
                }
            };

            if linked {
                report.matched += 1;
            } else {
                inbound.unlink();
                report.unsolicited += 1;
            }

            match store.save_inbound(&inbound).await {
                Ok(true) => report.filed += 1,
                Ok(false) => {
                    tracing::debug!(message_id = %inbound.message_id, "Inbound message already filed");
                }
                Err(e) => {
                    tracing::error!(
                        message_id = %inbound.message_id,
                        error = %e,
                        "Failed to file inbound message"
                    );
                }
            }
        }

        if report.fetched > 0 {
            tracing::info!(
                fetched = report.fetched,
                matched = report.matched,
                unsolicited = report.unsolicited,
                "Inbound replies reconciled"
            );
        }

        report
    }
}

/// Mark the original message responded and record its text on the reply.
///
/// Returns `false`, leaving the reply untouched, when the original cannot be
/// loaded.
async fn link_to_original(
    inbound: &mut InboundMessage,
    reference: &str,
    store: &dyn MessageStore,
) -> bool {
    let mut original = match store.find_outbound_by_reference(reference).await {
        Ok(Some(original)) => original,
        Ok(None) => {
            tracing::warn!(
                message_id = %inbound.message_id,
                reference = %reference,
                "Original outbound message not found; filing reply as unsolicited"
            );
            return false;
        }
        Err(e) => {
            tracing::error!(
                message_id = %inbound.message_id,
                reference = %reference,
                error = %e,
                "Failed to load original outbound message; filing reply as unsolicited"
            );
            return false;
        }
    };

    original.mark_responded();
    if let Err(e) = store.update_outbound(&original).await {
        tracing::error!(
            message_id = %original.id,
            reference = %reference,
            error = %e,
            "Failed to flag outbound message as responded"
        );
    }

    inbound
        .previous_history
        .push_str(&audit_block(original.text(), inbound.received_at));

    tracing::info!(
        message_id = %inbound.message_id,
        reference = %reference,
        branch_id = %inbound.branch_id,
        "Reply matched to outbound message"
    );
    true
}

/// Formatted history entry appended to a matched reply.
pub fn audit_block(original_text: &str, responded_at: DateTime<Utc>) -> String {
    format!(
        "\n{rule}\ndate_response: {at}\n\noriginal_message:\n\n{text}\n{rule}\n",
        rule = AUDIT_RULE,
        at = responded_at.format("%Y-%m-%d %H:%M:%S UTC"),
        text = original_text,
    )
}
