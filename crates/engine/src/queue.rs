//! Per-channel outbound queues.
//!
//! Each channel gets an unbounded FIFO. Any number of producers hold clones
//! of [`OutboundQueues`]; the scheduler owns the only [`QueueReceivers`].

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use courier_common::types::{Channel, OutboundMessage};

use crate::wake::WakeSignal;

/// Producer side of the queues.
#[derive(Clone)]
pub struct OutboundQueues {
    email: UnboundedSender<OutboundMessage>,
    sms: UnboundedSender<OutboundMessage>,
    whatsapp: UnboundedSender<OutboundMessage>,
    wake: Arc<WakeSignal>,
}

/// Consumer side of the queues, owned by the scheduler.
pub struct QueueReceivers {
    email: UnboundedReceiver<OutboundMessage>,
    sms: UnboundedReceiver<OutboundMessage>,
    whatsapp: UnboundedReceiver<OutboundMessage>,
}

/// Create the three channel queues. Every enqueue pokes `wake`.
pub fn outbound_queues(wake: Arc<WakeSignal>) -> (OutboundQueues, QueueReceivers) {
    let (email_tx, email_rx) = mpsc::unbounded_channel();
    let (sms_tx, sms_rx) = mpsc::unbounded_channel();
    let (whatsapp_tx, whatsapp_rx) = mpsc::unbounded_channel();

    (
        OutboundQueues {
            email: email_tx,
            sms: sms_tx,
            whatsapp: whatsapp_tx,
            wake,
        },
        QueueReceivers {
            email: email_rx,
            sms: sms_rx,
            whatsapp: whatsapp_rx,
        },
    )
}

impl OutboundQueues {
    /// Queue a message on its channel and signal the scheduler.
    ///
    /// Never blocks. If the scheduler has already shut down the message is
    /// dropped with an error log.
    pub fn enqueue(&self, message: OutboundMessage) {
        let channel = message.channel();
        let message_id = message.id;

        if self.sender(channel).send(message).is_err() {
            tracing::error!(
                message_id = %message_id,
                channel = %channel,
                "Scheduler stopped; outbound message dropped"
            );
            return;
        }

        tracing::debug!(message_id = %message_id, channel = %channel, "Message queued");
        self.wake.signal();
    }

    fn sender(&self, channel: Channel) -> &UnboundedSender<OutboundMessage> {
        match channel {
            Channel::Email => &self.email,
            Channel::Sms => &self.sms,
            Channel::WhatsApp => &self.whatsapp,
        }
    }
}

impl QueueReceivers {
    /// Take the oldest message queued on `channel`, if any.
    pub fn pop(&mut self, channel: Channel) -> Option<OutboundMessage> {
        self.receiver(channel).try_recv().ok()
    }

    /// Yield queued messages in submission order until the queue is empty.
    pub fn drain(&mut self, channel: Channel) -> impl Iterator<Item = OutboundMessage> + '_ {
        std::iter::from_fn(move || self.pop(channel))
    }

    pub fn len(&self, channel: Channel) -> usize {
        match channel {
            Channel::Email => self.email.len(),
            Channel::Sms => self.sms.len(),
            Channel::WhatsApp => self.whatsapp.len(),
        }
    }

    pub fn is_empty(&self, channel: Channel) -> bool {
        self.len(channel) == 0
    }

    /// Messages waiting across all channels.
    pub fn total_len(&self) -> usize {
        Channel::DRAIN_ORDER.iter().map(|c| self.len(*c)).sum()
    }

    fn receiver(&mut self, channel: Channel) -> &mut UnboundedReceiver<OutboundMessage> {
        match channel {
            Channel::Email => &mut self.email,
            Channel::Sms => &mut self.sms,
            Channel::WhatsApp => &mut self.whatsapp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::Backoff;
    use crate::wake::ManualClock;
    use std::time::Duration;

    fn queues() -> (OutboundQueues, QueueReceivers) {
        let wake = Arc::new(WakeSignal::new(
            Backoff::new(Duration::from_secs(60), Duration::from_secs(3600)),
            Duration::from_secs(300),
            Arc::new(ManualClock::new()),
        ));
        outbound_queues(wake)
    }

    #[test]
    fn test_drain_preserves_submission_order() {
        let (tx, mut rx) = queues();
        let sent: Vec<_> = (0..5)
            .map(|i| OutboundMessage::sms("t1", "B1", "+1555", &format!("msg {}", i)))
            .collect();
        for msg in &sent {
            tx.enqueue(msg.clone());
        }

        let drained: Vec<_> = rx.drain(Channel::Sms).map(|m| m.id).collect();
        let expected: Vec<_> = sent.iter().map(|m| m.id).collect();
        assert_eq!(drained, expected);
        assert!(rx.is_empty(Channel::Sms));
    }

    #[test]
    fn test_messages_routed_by_channel() {
        let (tx, mut rx) = queues();
        tx.enqueue(OutboundMessage::email("t1", "B1", "a@b.co", "s", "<p>x</p>"));
        tx.enqueue(OutboundMessage::whatsapp("t1", "B1", "+1555", "hi"));
        tx.enqueue(OutboundMessage::sms("t1", "B1", "+1555", "hi"));

        assert_eq!(rx.len(Channel::Email), 1);
        assert_eq!(rx.len(Channel::Sms), 1);
        assert_eq!(rx.len(Channel::WhatsApp), 1);
        assert_eq!(rx.total_len(), 3);

        assert_eq!(rx.pop(Channel::WhatsApp).unwrap().channel(), Channel::WhatsApp);
        assert!(rx.pop(Channel::WhatsApp).is_none());
    }

    #[test]
    fn test_enqueue_after_consumer_dropped_does_not_panic() {
        let (tx, rx) = queues();
        drop(rx);
        tx.enqueue(OutboundMessage::sms("t1", "B1", "+1555", "late"));
    }

    #[test]
    fn test_enqueue_signals_scheduler() {
        let (tx, _rx) = queues();
        tx.wake.record_idle();
        assert_eq!(tx.wake.multiplier(), 3);
        tx.enqueue(OutboundMessage::sms("t1", "B1", "+1555", "wake up"));
        assert_eq!(tx.wake.multiplier(), 1);
    }
}
