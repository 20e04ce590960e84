use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::orders::OrderNumber;

pub const DEFAULT_QUEUE_CAPACITY: usize = 15;

/// One pending reconciliation of an order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileJob {
    pub order: OrderNumber,
    /// Oracle polls already spent on this order in the current run
    pub attempt: u32,
}

impl ReconcileJob {
    pub fn new(order: OrderNumber) -> Self {
        Self { order, attempt: 0 }
    }

    pub fn next_attempt(&self) -> Self {
        Self {
            order: self.order.clone(),
            attempt: self.attempt.saturating_add(1),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("work queue is closed")]
    Closed,
}

/// Work queue between the registrar and the reconciliation workers.
///
/// FIFO, no priority, no deduplication. `push` waits while the queue is full and
/// `pop_wait` waits until an item is available.
#[async_trait]
pub trait OrderQueue: Send + Sync {
    async fn push(&self, job: ReconcileJob) -> Result<(), QueueError>;

    /// `None` once the queue is closed and drained
    async fn pop_wait(&self) -> Option<ReconcileJob>;
}

/// Bounded in-process queue shared by every producer and worker
pub struct BoundedOrderQueue {
    sender: mpsc::Sender<ReconcileJob>,
    // mpsc has a single consumer; workers take turns on the receiver
    receiver: Mutex<mpsc::Receiver<ReconcileJob>>,
}

impl BoundedOrderQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rejects further pushes; items already queued can still be popped
    pub async fn close(&self) {
        self.receiver.lock().await.close();
    }
}

impl Default for BoundedOrderQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[async_trait]
impl OrderQueue for BoundedOrderQueue {
    async fn push(&self, job: ReconcileJob) -> Result<(), QueueError> {
        self.sender.send(job).await.map_err(|_| QueueError::Closed)
    }

    async fn pop_wait(&self) -> Option<ReconcileJob> {
        let mut receiver = self.receiver.lock().await;
        receiver.recv().await
    }
}
