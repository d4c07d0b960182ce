//! The dispatch scheduler, one long-lived task that owns every queue.
//!
//! Each cycle:
//! 1. Drain the Email, SMS and WhatsApp queues in that order, pausing for the
//!    burst delay between two sends on the same queue
//! 2. Run the reconciliation poller once
//! 3. Sleep for `base_interval × multiplier`, waking early on an accepted
//!    signal. A sleep that times out grows the multiplier.
//!
//! All adapter calls and correlation updates happen inside this one task, so
//! sends are paced without per-channel rate limiters and the correlation
//! store needs no locking.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use courier_common::config::AppConfig;
use courier_common::types::{Channel, OutboundMessage, PendingReply};
use courier_notifier::ChannelAdapter;

use crate::correlation::CorrelationStore;
use crate::credit::CreditGate;
use crate::queue::QueueReceivers;
use crate::reconciler::{ReconcileReport, ReconciliationPoller};
use crate::store::MessageStore;
use crate::wake::WakeSignal;

/// Timing knobs for the scheduler loop.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pause between two sends on the same queue.
    pub burst_delay: Duration,
    /// Idle sleep at multiplier 1.
    pub base_interval: Duration,
    /// Longest idle sleep.
    pub max_interval: Duration,
    /// Minimum spacing between two accepted wake signals.
    pub debounce_window: Duration,
}

impl SchedulerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            burst_delay: Duration::from_millis(config.burst_delay_ms),
            base_interval: Duration::from_secs(config.base_interval_secs),
            max_interval: Duration::from_secs(config.max_interval_secs),
            debounce_window: Duration::from_secs(config.debounce_secs),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            burst_delay: Duration::from_secs(2),
            base_interval: Duration::from_secs(60),
            max_interval: Duration::from_secs(3600),
            debounce_window: Duration::from_secs(300),
        }
    }
}

/// One adapter per channel.
#[derive(Clone)]
pub struct ChannelAdapters {
    pub email: Arc<dyn ChannelAdapter>,
    pub sms: Arc<dyn ChannelAdapter>,
    pub whatsapp: Arc<dyn ChannelAdapter>,
}

impl ChannelAdapters {
    pub fn for_channel(&self, channel: Channel) -> &Arc<dyn ChannelAdapter> {
        match channel {
            Channel::Email => &self.email,
            Channel::Sms => &self.sms,
            Channel::WhatsApp => &self.whatsapp,
        }
    }
}

/// Counters for one drain-and-reconcile pass.
#[derive(Debug, Default, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub sent: usize,
    pub failed: usize,
    pub refused: usize,
    pub reconciled: ReconcileReport,
    pub uptime: Duration,
}

/// How one queued message ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Sent,
    Failed,
    Refused,
}

/// Why an idle sleep ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wakeup {
    Signalled,
    TimedOut,
    Shutdown,
}

pub struct Scheduler {
    config: SchedulerConfig,
    queues: QueueReceivers,
    adapters: ChannelAdapters,
    credits: CreditGate,
    correlation: Box<dyn CorrelationStore>,
    store: Arc<dyn MessageStore>,
    poller: ReconciliationPoller,
    wake: Arc<WakeSignal>,
    cycles: u64,
    started: Instant,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: SchedulerConfig,
        queues: QueueReceivers,
        adapters: ChannelAdapters,
        credits: CreditGate,
        correlation: Box<dyn CorrelationStore>,
        store: Arc<dyn MessageStore>,
        poller: ReconciliationPoller,
        wake: Arc<WakeSignal>,
    ) -> Self {
        Self {
            config,
            queues,
            adapters,
            credits,
            correlation,
            store,
            poller,
            wake,
            cycles: 0,
            started: Instant::now(),
        }
    }

    /// Run on a background task until `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Loop until `shutdown` is cancelled.
    ///
    /// Cancellation never interrupts an adapter call; the scheduler records
    /// the outcome of the send in progress, then exits leaving any other
    /// queued messages unsent.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!(
            burst_delay_ms = self.config.burst_delay.as_millis() as u64,
            base_interval_secs = self.config.base_interval.as_secs(),
            max_interval_secs = self.config.max_interval.as_secs(),
            "Dispatch scheduler started"
        );

        loop {
            let report = self.run_cycle(&shutdown).await;
            log_cycle(&report);

            if shutdown.is_cancelled() {
                break;
            }

            match idle_sleep(&self.wake, &shutdown).await {
                Wakeup::Shutdown => break,
                Wakeup::Signalled => tracing::debug!("Scheduler woken by signal"),
                Wakeup::TimedOut => {
                    let multiplier = self.wake.record_idle();
                    tracing::debug!(multiplier, "Idle sleep elapsed; backing off");
                }
            }
        }

        tracing::info!(
            abandoned = self.queues.total_len(),
            outstanding_replies = self.correlation.len(),
            "Dispatch scheduler stopped"
        );
    }

    /// Drain every queue once, then reconcile. Skips reconciliation if
    /// `shutdown` fires mid-drain.
    pub async fn run_cycle(&mut self, shutdown: &CancellationToken) -> CycleReport {
        self.cycles += 1;
        let mut report = CycleReport {
            cycle: self.cycles,
            ..CycleReport::default()
        };
        // Tenants already refused this cycle, so they are only notified once.
        let mut exhausted: HashSet<(String, Channel)> = HashSet::new();

        for channel in Channel::DRAIN_ORDER {
            self.drain(channel, shutdown, &mut exhausted, &mut report)
                .await;
            if shutdown.is_cancelled() {
                report.uptime = self.started.elapsed();
                return report;
            }
        }

        report.reconciled = self
            .poller
            .poll(self.correlation.as_mut(), self.store.as_ref())
            .await;
        report.uptime = self.started.elapsed();
        report
    }

    /// References on `branch_id` still waiting for a reply.
    pub fn outstanding_replies(&self, branch_id: &str) -> Vec<PendingReply> {
        self.correlation.outstanding(branch_id)
    }

    async fn drain(
        &mut self,
        channel: Channel,
        shutdown: &CancellationToken,
        exhausted: &mut HashSet<(String, Channel)>,
        report: &mut CycleReport,
    ) {
        if self.queues.is_empty(channel) {
            return;
        }
        tracing::debug!(channel = %channel, queued = self.queues.len(channel), "Draining queue");

        while let Some(message) = self.queues.pop(channel) {
            match self.dispatch(message, exhausted).await {
                Outcome::Sent => report.sent += 1,
                Outcome::Failed => report.failed += 1,
                Outcome::Refused => {
                    // No adapter call was made, so no pacing either.
                    report.refused += 1;
                    continue;
                }
            }

            if shutdown.is_cancelled() {
                return;
            }
            if self.queues.is_empty(channel) || self.config.burst_delay.is_zero() {
                continue;
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.config.burst_delay) => {}
            }
        }
    }

    async fn dispatch(
        &mut self,
        mut message: OutboundMessage,
        exhausted: &mut HashSet<(String, Channel)>,
    ) -> Outcome {
        let channel = message.channel();
        let key = (message.tenant_id.clone(), channel);

        if exhausted.contains(&key) {
            tracing::debug!(
                message_id = %message.id,
                tenant_id = %message.tenant_id,
                channel = %channel,
                "Tenant already out of credits this cycle; message dropped"
            );
            return Outcome::Refused;
        }
        if !self.credits.take(&message.tenant_id, channel).await {
            exhausted.insert(key);
            return Outcome::Refused;
        }

        let adapter = Arc::clone(self.adapters.for_channel(channel));
        let outcome = match adapter.send(&message).await {
            Ok(reference) => {
                let sent_at = Utc::now();
                if message.record_delivery(reference.clone(), sent_at) {
                    if channel == Channel::Sms {
                        self.correlation.record(PendingReply {
                            branch_id: message.branch_id.clone(),
                            reference: reference.clone(),
                            destination: message.destination().to_string(),
                            sent_at,
                        });
                    }
                } else {
                    tracing::warn!(
                        message_id = %message.id,
                        reference = %reference,
                        "Message already carried a delivery record; keeping the first"
                    );
                }

                tracing::info!(
                    message_id = %message.id,
                    channel = %channel,
                    branch_id = %message.branch_id,
                    reference = %reference,
                    "Message sent"
                );
                Outcome::Sent
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::warn!(
                        message_id = %message.id,
                        channel = %channel,
                        error = %e,
                        "Send failed (transient)"
                    );
                } else {
                    tracing::error!(
                        message_id = %message.id,
                        channel = %channel,
                        error = %e,
                        "Send failed"
                    );
                }
                message.mark_failed();
                Outcome::Failed
            }
        };

        // Delivery already happened; a storage failure is only logged.
        if let Err(e) = self.store.save_outbound(&message).await {
            tracing::error!(
                message_id = %message.id,
                status = %message.status,
                error = %e,
                "Failed to persist outbound message"
            );
        }

        outcome
    }
}

/// Wait out one idle interval, or less if signalled or cancelled.
async fn idle_sleep(wake: &WakeSignal, shutdown: &CancellationToken) -> Wakeup {
    let interval = wake.sleep_interval();
    tracing::debug!(
        sleep_secs = interval.as_secs(),
        multiplier = wake.multiplier(),
        "Scheduler sleeping"
    );

    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Wakeup::Shutdown,
        _ = wake.notified() => Wakeup::Signalled,
        _ = tokio::time::sleep(interval) => Wakeup::TimedOut,
    }
}

fn log_cycle(report: &CycleReport) {
    let quiet = report.sent + report.failed + report.refused + report.reconciled.fetched == 0;
    if quiet {
        tracing::debug!(cycle = report.cycle, "Cycle complete, nothing to do");
        return;
    }

    tracing::info!(
        cycle = report.cycle,
        sent = report.sent,
        failed = report.failed,
        refused = report.refused,
        matched = report.reconciled.matched,
        unsolicited = report.reconciled.unsolicited,
        uptime = %format_uptime(report.uptime),
        "Dispatch cycle complete"
    );
}

/// `3d 4h 12m 5s`, dropping leading zero units.
fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let (days, hours, minutes, seconds) =
        (secs / 86_400, (secs % 86_400) / 3600, (secs % 3600) / 60, secs % 60);

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
