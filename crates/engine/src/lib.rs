//! Outbound notification dispatch engine.
//!
//! Producers hand messages to a [`Dispatcher`]; a single [`Scheduler`] task
//! drains the per-channel queues (Email, SMS, WhatsApp) with inter-send
//! pacing, checks tenant credits before every send, records SMS references
//! for reply correlation, reconciles inbound replies, then sleeps on an
//! adaptively growing, signal-interruptible timer.

pub mod backoff;
pub mod correlation;
pub mod credit;
pub mod dispatcher;
pub mod pg_store;
pub mod queue;
pub mod reconciler;
pub mod scheduler;
pub mod store;
pub mod wake;

pub use dispatcher::{Dispatcher, EngineParts};
pub use scheduler::{ChannelAdapters, CycleReport, Scheduler, SchedulerConfig};
