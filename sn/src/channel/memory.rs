//! In-process message channel
//!
//! The controller's single channel instance. The channel server and the relay bridge
//! share it with the dispatch engine through an `Arc`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use super::messages::{Envelope, RouteKey};
use super::{ChannelError, MessageChannel, ReceiveMode};

/// Default number of envelopes kept queued per route key
pub const DEFAULT_MAX_PENDING: usize = 256;

/// Queue of pending envelopes with wake-ups for blocked receivers
///
/// Each route key holds at most `max_pending` envelopes. A send beyond that drops
/// the oldest envelope for the same key, so senders never wait on a recipient that
/// stopped reading.
#[derive(Debug)]
pub struct MemoryChannel {
    pending: Mutex<VecDeque<Envelope>>,
    notify: Notify,
    closed: AtomicBool,
    max_pending: usize,
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::with_max_pending(DEFAULT_MAX_PENDING)
    }
}

impl MemoryChannel {
    pub fn new() -> Self {
        debug!("MemoryChannel::new: called");
        Self::default()
    }

    /// Create a channel holding at most `max_pending` envelopes per route key
    pub fn with_max_pending(max_pending: usize) -> Self {
        debug!(max_pending, "MemoryChannel::with_max_pending: called");
        Self {
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            max_pending: max_pending.max(1),
        }
    }

    pub fn max_pending(&self) -> usize {
        self.max_pending
    }

    /// Number of queued envelopes across all keys
    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }

    /// Number of queued envelopes matching `predicate`
    pub async fn count_matching(&self, predicate: impl Fn(&Envelope) -> bool) -> usize {
        self.pending.lock().await.iter().filter(|envelope| predicate(envelope)).count()
    }

    /// Close the channel
    ///
    /// Queued envelopes can still be received; once none match, receives fail with
    /// [`ChannelError::Closed`] instead of waiting.
    pub fn close(&self) {
        debug!("MemoryChannel::close: called");
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn take(&self, key: RouteKey) -> Option<Envelope> {
        let mut pending = self.pending.lock().await;
        let position = pending.iter().position(|envelope| envelope.route == key)?;
        pending.remove(position)
    }
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    async fn send(&self, envelope: Envelope) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        let envelope = envelope.bounded();
        debug!(route = %envelope.route, sender = %envelope.sender, kind = envelope.message.kind_name(), "MemoryChannel::send");
        {
            let mut pending = self.pending.lock().await;
            let queued = pending.iter().filter(|queued| queued.route == envelope.route).count();
            let oldest = if queued >= self.max_pending {
                pending.iter().position(|queued| queued.route == envelope.route)
            } else {
                None
            };
            if let Some(dropped) = oldest.and_then(|position| pending.remove(position)) {
                warn!(
                    route = %dropped.route,
                    kind = dropped.message.kind_name(),
                    max_pending = self.max_pending,
                    "Recipient not reading, oldest pending message dropped"
                );
            }
            pending.push_back(envelope);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self, key: RouteKey, mode: ReceiveMode) -> Result<Option<Envelope>, ChannelError> {
        loop {
            // Register interest before checking so a send in between is not missed
            let notified = self.notify.notified();

            if let Some(envelope) = self.take(key).await {
                return Ok(Some(envelope));
            }

            if self.is_closed() {
                return Err(ChannelError::Closed);
            }

            if mode == ReceiveMode::NonBlocking {
                return Ok(None);
            }

            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::messages::{Identity, Message};
    use std::sync::Arc;
    use std::time::Duration;

    fn reading(sender: u32, reading: i32) -> Envelope {
        Envelope::to_controller(Identity(sender), Message::Reading { reading })
    }

    #[tokio::test]
    async fn test_receive_is_fifo_per_key() {
        let channel = MemoryChannel::new();
        channel.send(reading(1, 10)).await.unwrap();
        channel.send(reading(2, 20)).await.unwrap();

        let first = channel
            .receive(RouteKey::Controller, ReceiveMode::NonBlocking)
            .await
            .unwrap()
            .unwrap();
        let second = channel
            .receive(RouteKey::Controller, ReceiveMode::NonBlocking)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.sender, Identity(1));
        assert_eq!(second.sender, Identity(2));
    }

    #[tokio::test]
    async fn test_receive_matches_exact_key_only() {
        let channel = MemoryChannel::new();
        channel
            .send(Envelope::new(Identity(7), Identity(1), Message::Stop))
            .await
            .unwrap();

        let for_controller = channel
            .receive(RouteKey::Controller, ReceiveMode::NonBlocking)
            .await
            .unwrap();
        assert!(for_controller.is_none());

        let for_other = channel
            .receive(RouteKey::Identity(Identity(8)), ReceiveMode::NonBlocking)
            .await
            .unwrap();
        assert!(for_other.is_none());

        let for_target = channel
            .receive(RouteKey::Identity(Identity(7)), ReceiveMode::NonBlocking)
            .await
            .unwrap();
        assert_eq!(for_target.map(|e| e.message), Some(Message::Stop));
    }

    #[tokio::test]
    async fn test_receive_skips_other_keys_keeping_order() {
        let channel = MemoryChannel::new();
        channel
            .send(Envelope::new(Identity(7), Identity(1), Message::Stop))
            .await
            .unwrap();
        channel.send(reading(3, 30)).await.unwrap();

        let msg = channel
            .receive(RouteKey::Controller, ReceiveMode::NonBlocking)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.sender, Identity(3));
        assert_eq!(channel.len().await, 1);
    }

    #[tokio::test]
    async fn test_non_blocking_receive_on_empty_channel() {
        let channel = MemoryChannel::new();
        let result = channel
            .receive(RouteKey::Controller, ReceiveMode::NonBlocking)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_blocking_receive_wakes_on_send() {
        let channel = Arc::new(MemoryChannel::new());
        let receiver = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.receive(RouteKey::Controller, ReceiveMode::Blocking).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.send(reading(4, 40)).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), receiver)
            .await
            .expect("receiver should wake")
            .unwrap()
            .unwrap();
        assert_eq!(received.map(|e| e.sender), Some(Identity(4)));
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_receiver() {
        let channel = Arc::new(MemoryChannel::new());
        let receiver = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.receive(RouteKey::Controller, ReceiveMode::Blocking).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.close();

        let result = tokio::time::timeout(Duration::from_secs(5), receiver)
            .await
            .expect("receiver should wake")
            .unwrap();
        assert!(matches!(result, Err(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn test_closed_channel_still_drains_queued() {
        let channel = MemoryChannel::new();
        channel.send(reading(5, 50)).await.unwrap();
        channel.close();

        assert!(channel.send(reading(6, 60)).await.is_err());
        let queued = channel
            .receive(RouteKey::Controller, ReceiveMode::NonBlocking)
            .await
            .unwrap();
        assert!(queued.is_some());
        let after = channel.receive(RouteKey::Controller, ReceiveMode::NonBlocking).await;
        assert!(matches!(after, Err(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn test_pending_cap_drops_oldest_for_same_key() {
        let channel = MemoryChannel::with_max_pending(3);
        let stalled = RouteKey::Identity(Identity(20));

        for sequence in 1..=10 {
            channel
                .send(Envelope::new(
                    Identity(20),
                    Identity(1),
                    Message::Command {
                        verb: "turn off".to_string(),
                        sequence,
                    },
                ))
                .await
                .unwrap();
            channel.send(reading(10, 95)).await.unwrap();
        }

        assert_eq!(channel.count_matching(|e| e.route == stalled).await, 3);
        assert_eq!(channel.count_matching(|e| e.route == RouteKey::Controller).await, 3);
        assert_eq!(channel.len().await, 6);

        // The newest commands survive, oldest first
        let mut sequences = Vec::new();
        while let Some(envelope) = channel.receive(stalled, ReceiveMode::NonBlocking).await.unwrap() {
            if let Message::Command { sequence, .. } = envelope.message {
                sequences.push(sequence);
            }
        }
        assert_eq!(sequences, vec![8, 9, 10]);
    }

    #[tokio::test]
    async fn test_pending_cap_leaves_other_keys_alone() {
        let channel = MemoryChannel::with_max_pending(1);
        channel
            .send(Envelope::new(Identity(7), Identity(1), Message::Stop))
            .await
            .unwrap();
        channel.send(reading(3, 30)).await.unwrap();
        channel.send(reading(4, 40)).await.unwrap();

        assert_eq!(channel.len().await, 2);
        let stop = channel
            .receive(RouteKey::Identity(Identity(7)), ReceiveMode::NonBlocking)
            .await
            .unwrap();
        assert_eq!(stop.map(|e| e.message), Some(Message::Stop));
        let latest = channel
            .receive(RouteKey::Controller, ReceiveMode::NonBlocking)
            .await
            .unwrap();
        assert_eq!(latest.map(|e| e.sender), Some(Identity(4)));
    }

    #[test]
    fn test_default_max_pending() {
        assert_eq!(MemoryChannel::new().max_pending(), DEFAULT_MAX_PENDING);
        assert_eq!(MemoryChannel::with_max_pending(0).max_pending(), 1);
    }

    #[tokio::test]
    async fn test_send_truncates_oversized_text() {
        let channel = MemoryChannel::new();
        channel
            .send(Envelope::new(
                Identity(9),
                Identity(1),
                Message::Query {
                    command: "q".repeat(2000),
                    sequence: None,
                },
            ))
            .await
            .unwrap();

        let msg = channel
            .receive(RouteKey::Identity(Identity(9)), ReceiveMode::NonBlocking)
            .await
            .unwrap()
            .unwrap();
        match msg.message {
            Message::Query { command, .. } => assert_eq!(command.len(), crate::channel::messages::MAX_DATA_LENGTH),
            _ => panic!("Wrong variant"),
        }
    }
}
