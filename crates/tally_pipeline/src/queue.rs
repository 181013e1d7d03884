//! Job queue seam.
//!
//! Messages carry only a job id and may be delivered more than once. Consumers
//! must ack a delivery after its outcome is persisted; an unacked delivery is
//! eventually redelivered.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tally_db::{DbError, TallyDb};
use tally_protocol::JobMessage;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue store error: {0}")]
    Store(#[from] DbError),

    #[error("Failed to encode queue message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Unknown receipt: {0}")]
    UnknownReceipt(String),

    #[error("Queue lock poisoned")]
    Poisoned,
}

/// A received message and the handle needed to ack it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub receipt: String,
    pub message: JobMessage,
    /// 1 on first delivery.
    pub attempt: u32,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, message: &JobMessage) -> Result<(), QueueError>;

    /// Wait up to `wait` for a message.
    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, receipt: &str) -> Result<(), QueueError>;
}

/// Queue backed by the `queue_messages` table.
#[derive(Clone)]
pub struct SqliteQueue {
    db: TallyDb,
    visibility_timeout: Duration,
    poll_interval: Duration,
}

impl SqliteQueue {
    pub fn new(db: TallyDb, visibility_timeout: Duration) -> Self {
        Self {
            db,
            visibility_timeout,
            poll_interval: Duration::from_millis(200),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[async_trait]
impl JobQueue for SqliteQueue {
    async fn enqueue(&self, message: &JobMessage) -> Result<(), QueueError> {
        let payload = serde_json::to_string(message)?;
        self.db.queue_push(&payload).await?;
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;
        let timeout_ms = i64::try_from(self.visibility_timeout.as_millis()).unwrap_or(i64::MAX);

        loop {
            if let Some(row) = self.db.queue_receive(timeout_ms).await? {
                match serde_json::from_str::<JobMessage>(&row.payload) {
                    Ok(message) => {
                        return Ok(Some(Delivery {
                            receipt: row.id.to_string(),
                            message,
                            attempt: u32::try_from(row.receive_count).unwrap_or(u32::MAX),
                        }))
                    }
                    Err(e) => {
                        // Nothing can ever process it; drop it rather than redeliver forever.
                        warn!(message_id = row.id, error = %e, "Dropping malformed queue message");
                        self.db.queue_ack(row.id).await?;
                        continue;
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn ack(&self, receipt: &str) -> Result<(), QueueError> {
        let id: i64 = receipt
            .parse()
            .map_err(|_| QueueError::UnknownReceipt(receipt.to_string()))?;
        self.db.queue_ack(id).await?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    next_receipt: u64,
    ready: VecDeque<(JobMessage, u32)>,
    in_flight: HashMap<String, (JobMessage, u32)>,
}

/// In-process queue with the same at-least-once contract.
///
/// Unacked deliveries stay in flight until [`MemoryQueue::redeliver_unacked`]
/// puts them back, which stands in for a visibility timeout.
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<MemoryState>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages waiting to be received.
    pub fn ready_len(&self) -> usize {
        self.state.lock().map(|s| s.ready.len()).unwrap_or(0)
    }

    pub fn in_flight_len(&self) -> usize {
        self.state.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    /// Return every unacked delivery to the front of the queue.
    pub fn redeliver_unacked(&self) -> Result<usize, QueueError> {
        let mut state = self.state.lock().map_err(|_| QueueError::Poisoned)?;
        let pending: Vec<_> = state.in_flight.drain().map(|(_, entry)| entry).collect();
        let count = pending.len();
        for entry in pending {
            state.ready.push_front(entry);
        }
        drop(state);
        if count > 0 {
            self.notify.notify_one();
        }
        Ok(count)
    }

    fn try_take(&self) -> Result<Option<Delivery>, QueueError> {
        let mut state = self.state.lock().map_err(|_| QueueError::Poisoned)?;
        let Some((message, attempts)) = state.ready.pop_front() else {
            return Ok(None);
        };
        state.next_receipt += 1;
        let receipt = format!("mem-{}", state.next_receipt);
        let attempt = attempts + 1;
        state
            .in_flight
            .insert(receipt.clone(), (message.clone(), attempt));
        Ok(Some(Delivery {
            receipt,
            message,
            attempt,
        }))
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, message: &JobMessage) -> Result<(), QueueError> {
        self.state
            .lock()
            .map_err(|_| QueueError::Poisoned)?
            .ready
            .push_back((message.clone(), 0));
        self.notify.notify_one();
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(delivery) = self.try_take()? {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return self.try_take();
            }
        }
    }

    async fn ack(&self, receipt: &str) -> Result<(), QueueError> {
        self.state
            .lock()
            .map_err(|_| QueueError::Poisoned)?
            .in_flight
            .remove(receipt)
            .map(|_| ())
            .ok_or_else(|| QueueError::UnknownReceipt(receipt.to_string()))
    }
}
