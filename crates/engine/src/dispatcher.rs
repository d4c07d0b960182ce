//! Producer-facing handle to the engine.

use std::sync::Arc;

use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{InboundMessage, OutboundMessage};
use courier_notifier::ReplySource;

use crate::backoff::Backoff;
use crate::correlation::CorrelationStore;
use crate::credit::CreditGate;
use crate::queue::{OutboundQueues, outbound_queues};
use crate::reconciler::ReconciliationPoller;
use crate::scheduler::{ChannelAdapters, Scheduler, SchedulerConfig};
use crate::store::MessageStore;
use crate::wake::{Clock, WakeSignal};

/// Everything needed to assemble a dispatcher and its scheduler.
pub struct EngineParts {
    pub config: SchedulerConfig,
    pub adapters: ChannelAdapters,
    pub replies: Arc<dyn ReplySource>,
    pub credits: CreditGate,
    pub correlation: Box<dyn CorrelationStore>,
    pub store: Arc<dyn MessageStore>,
    pub clock: Arc<dyn Clock>,
}

/// Cheap to clone; every clone feeds the same scheduler.
#[derive(Clone)]
pub struct Dispatcher {
    queues: OutboundQueues,
    wake: Arc<WakeSignal>,
    store: Arc<dyn MessageStore>,
}

impl Dispatcher {
    /// Wire the queues, wake signal and scheduler together. The scheduler
    /// does nothing until [`Scheduler::run`] or [`Scheduler::spawn`] is called.
    pub fn new(parts: EngineParts) -> (Self, Scheduler) {
        let EngineParts {
            config,
            adapters,
            replies,
            credits,
            correlation,
            store,
            clock,
        } = parts;

        let wake = Arc::new(WakeSignal::new(
            Backoff::new(config.base_interval, config.max_interval),
            config.debounce_window,
            clock,
        ));
        let (queues, receivers) = outbound_queues(wake.clone());

        let scheduler = Scheduler::new(
            config,
            receivers,
            adapters,
            credits,
            correlation,
            store.clone(),
            ReconciliationPoller::new(replies),
            wake.clone(),
        );

        (Self { queues, wake, store }, scheduler)
    }

    /// Queue a message on its channel. Never blocks and never fails; the
    /// scheduler is signalled so it drains soon.
    pub fn enqueue(&self, message: OutboundMessage) {
        self.queues.enqueue(message);
    }

    /// Wake the scheduler without queueing anything. Returns whether the
    /// signal was accepted or fell inside the debounce window.
    pub fn signal(&self) -> bool {
        self.wake.signal()
    }

    /// Current backoff multiplier of the idle sleep.
    pub fn backoff_multiplier(&self) -> u32 {
        self.wake.multiplier()
    }

    pub async fn get_inbox(&self, branch_id: &str) -> Result<Vec<InboundMessage>, AppError> {
        self.store.inbox(branch_id).await
    }

    /// Page `page` (zero-based) of `count` sent messages, newest first.
    pub async fn get_sent_box(
        &self,
        branch_id: &str,
        page: u32,
        count: u32,
    ) -> Result<Vec<OutboundMessage>, AppError> {
        if count == 0 {
            return Err(AppError::Validation(
                "page size must be positive".to_string(),
            ));
        }
        self.store.sent_box(branch_id, page, count).await
    }

    pub async fn get_outbound(&self, id: Uuid) -> Result<OutboundMessage, AppError> {
        self.store
            .get_outbound(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Outbound message {} not found", id)))
    }
}
