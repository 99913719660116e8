//! Best-effort progress event fan-out.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use vault_core::{OperationId, ProgressEvent};

/// Default bounded capacity per progress channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Registry of bounded progress channels keyed by operation ID.
///
/// Delivery is at-most-once with no backpressure: `publish` uses `try_send`
/// and drops the event when the channel is full or the receiver is gone, so
/// a slow or absent listener never affects the upload it is watching.
#[derive(Debug, Default)]
pub struct ProgressHub {
    channels: Mutex<HashMap<OperationId, mpsc::Sender<ProgressEvent>>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to progress events for an operation.
    ///
    /// A second subscription for the same operation replaces the first;
    /// the earlier receiver stops getting events.
    pub fn subscribe(&self, operation_id: OperationId) -> mpsc::Receiver<ProgressEvent> {
        let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        self.channels
            .lock()
            .expect("progress hub lock poisoned")
            .insert(operation_id, tx);
        rx
    }

    /// Drop the channel for an operation, if any.
    pub fn unsubscribe(&self, operation_id: &OperationId) {
        self.channels
            .lock()
            .expect("progress hub lock poisoned")
            .remove(operation_id);
    }

    /// Publish an event to the operation's subscriber, if one exists.
    ///
    /// Terminal events remove the channel after delivery.
    pub fn publish(&self, event: ProgressEvent) {
        let mut channels = self.channels.lock().expect("progress hub lock poisoned");
        let operation_id = event.operation_id;
        let terminal = event.phase.is_terminal();

        if let Some(tx) = channels.get(&operation_id) {
            match tx.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(dropped)) => {
                    tracing::debug!(
                        operation_id = %operation_id,
                        bytes_sent = dropped.bytes_sent,
                        "progress channel full, dropping event"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    channels.remove(&operation_id);
                    return;
                }
            }
        }

        if terminal {
            channels.remove(&operation_id);
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.channels
            .lock()
            .expect("progress hub lock poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_core::UploadPhase;

    fn event(id: OperationId, bytes: u64, phase: UploadPhase) -> ProgressEvent {
        ProgressEvent::at(id, bytes, Some(100), phase)
    }

    #[tokio::test]
    async fn delivers_events_to_subscriber() {
        let hub = ProgressHub::new();
        let id = OperationId::new();
        let mut rx = hub.subscribe(id);

        hub.publish(event(id, 10, UploadPhase::Uploading));
        hub.publish(event(id, 50, UploadPhase::Uploading));

        assert_eq!(rx.recv().await.unwrap().bytes_sent, 10);
        assert_eq!(rx.recv().await.unwrap().bytes_sent, 50);
    }

    #[tokio::test]
    async fn publish_without_subscriber_is_noop() {
        let hub = ProgressHub::new();
        hub.publish(event(OperationId::new(), 10, UploadPhase::Uploading));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn full_channel_drops_events_without_blocking() {
        let hub = ProgressHub::new();
        let id = OperationId::new();
        let mut rx = hub.subscribe(id);

        for i in 0..(DEFAULT_CHANNEL_CAPACITY as u64 + 10) {
            hub.publish(event(id, i, UploadPhase::Uploading));
        }

        // The first CAPACITY events are buffered; the rest were dropped.
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, DEFAULT_CHANNEL_CAPACITY);
    }

    #[tokio::test]
    async fn terminal_event_removes_channel() {
        let hub = ProgressHub::new();
        let id = OperationId::new();
        let mut rx = hub.subscribe(id);

        hub.publish(event(id, 100, UploadPhase::Completed));
        assert_eq!(hub.subscriber_count(), 0);

        // The terminal event itself still arrives.
        assert_eq!(rx.recv().await.unwrap().phase, UploadPhase::Completed);
    }

    #[tokio::test]
    async fn closed_receiver_is_cleaned_up() {
        let hub = ProgressHub::new();
        let id = OperationId::new();
        let rx = hub.subscribe(id);
        drop(rx);

        hub.publish(event(id, 10, UploadPhase::Uploading));
        assert_eq!(hub.subscriber_count(), 0);
    }
}
