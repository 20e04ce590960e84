pub mod queue;
pub mod retry;
pub mod worker;

pub use queue::{BoundedOrderQueue, OrderQueue, QueueError, ReconcileJob, DEFAULT_QUEUE_CAPACITY};
pub use retry::RetryPolicy;
pub use worker::{spawn_recovery, ReconcileOutcome, Reconciler, ReconciliationPool};
