use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::queue::{OrderQueue, ReconcileJob};
use super::retry::RetryPolicy;
use crate::accrual::{AccrualError, AccrualOracle};
use crate::ledger::{LedgerStore, OrderStatus};

/// What happened to one job after a reconciliation cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Terminal status written; the order leaves the queue for good
    Settled(OrderStatus),
    Requeued { attempt: u32, delay: Duration },
    /// Retry budget exhausted; the order stays non-terminal in the ledger
    Stuck,
}

/// One reconciliation cycle: oracle fetch, ledger write, requeue decision
pub struct Reconciler {
    ledger: Arc<dyn LedgerStore>,
    oracle: Arc<dyn AccrualOracle>,
    queue: Arc<dyn OrderQueue>,
    policy: RetryPolicy,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        oracle: Arc<dyn AccrualOracle>,
        queue: Arc<dyn OrderQueue>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            ledger,
            oracle,
            queue,
            policy,
        }
    }

    pub async fn reconcile(&self, job: ReconcileJob) -> ReconcileOutcome {
        let fetched = match self.oracle.get_accrual(&job.order).await {
            Ok(report) => report.verified_for(&job.order),
            Err(e) => Err(e),
        };

        let report = match fetched {
            Ok(report) => report,
            Err(AccrualError::RateLimited { retry_after }) => {
                warn!(order = %job.order, retry_after_secs = retry_after.as_secs(), "accrual service rate limited");
                return self.requeue(&job, Some(retry_after)).await;
            }
            Err(e) => {
                warn!(order = %job.order, attempt = job.attempt, error = %e, "accrual lookup failed");
                return self.requeue(&job, None).await;
            }
        };

        // once polled, an order the service has not finished with is in processing
        let status = match report.status {
            OrderStatus::New => OrderStatus::Processing,
            other => other,
        };
        let accrual = report.settled_amount();

        if let Err(e) = self
            .ledger
            .update_order_status(&job.order, status, accrual)
            .await
        {
            error!(order = %job.order, status = %status, error = %e, "failed to record accrual");
            return self.requeue(&job, None).await;
        }

        if status.is_terminal() {
            info!(order = %job.order, status = %status, accrual = %accrual, "order settled");
            return ReconcileOutcome::Settled(status);
        }

        debug!(order = %job.order, status = %status, "order still in progress");
        self.requeue(&job, None).await
    }

    async fn requeue(&self, job: &ReconcileJob, retry_after: Option<Duration>) -> ReconcileOutcome {
        let next = job.next_attempt();
        if !self.policy.should_retry(next.attempt) {
            error!(
                order = %job.order,
                attempts = next.attempt,
                "order stuck: retry budget exhausted, leaving it for startup recovery"
            );
            return ReconcileOutcome::Stuck;
        }

        let delay = retry_after.unwrap_or_else(|| self.policy.delay_for_attempt(job.attempt));
        let attempt = next.attempt;

        if delay.is_zero() {
            if let Err(e) = self.queue.push(next).await {
                warn!(order = %job.order, error = %e, "could not requeue order");
            }
        } else {
            // workers never sleep; the delay runs in its own task
            let queue = self.queue.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let order = next.order.clone();
                if let Err(e) = queue.push(next).await {
                    debug!(order = %order, error = %e, "dropped delayed requeue");
                }
            });
        }

        ReconcileOutcome::Requeued { attempt, delay }
    }
}

/// Fixed set of workers draining the shared queue
pub struct ReconciliationPool {
    workers: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl ReconciliationPool {
    pub fn start(reconciler: Arc<Reconciler>, worker_count: usize) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker_count = worker_count.max(1);

        let workers = (0..worker_count)
            .map(|id| tokio::spawn(run_worker(id, reconciler.clone(), shutdown_rx.clone())))
            .collect();

        info!("🔄 Reconciliation pool started with {} workers", worker_count);
        Self {
            workers,
            shutdown_tx,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stops workers between pops. A cycle already in flight finishes its ledger
    /// write unless it outlives `grace`.
    pub async fn shutdown(self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);

        for worker in self.workers {
            match tokio::time::timeout(grace, worker).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "reconciliation worker failed"),
                Err(_) => warn!("reconciliation worker did not stop within {:?}", grace),
            }
        }

        info!("✓ Reconciliation pool stopped");
    }
}

async fn run_worker(id: usize, reconciler: Arc<Reconciler>, mut shutdown: watch::Receiver<bool>) {
    debug!(worker = id, "reconciliation worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let job = tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }

            job = reconciler.queue.pop_wait() => job,
        };

        let Some(job) = job else {
            debug!(worker = id, "work queue closed");
            break;
        };

        reconciler.reconcile(job).await;
    }

    debug!(worker = id, "reconciliation worker stopped");
}

/// Pushes every NEW or PROCESSING order back into the queue. Runs in the
/// background because the queue is small and `push` waits for room.
pub fn spawn_recovery(
    ledger: Arc<dyn LedgerStore>,
    queue: Arc<dyn OrderQueue>,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let orders = match ledger.list_unfinished_orders().await {
            Ok(orders) => orders,
            Err(e) => {
                error!(error = %e, "failed to load unfinished orders for recovery");
                return 0;
            }
        };

        let mut recovered = 0;
        for order in orders {
            if queue.push(ReconcileJob::new(order.number)).await.is_err() {
                warn!("work queue closed during recovery");
                break;
            }
            recovered += 1;
        }

        if recovered > 0 {
            info!("♻️  Requeued {} unfinished orders", recovered);
        }
        recovered
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accrual::client::MockAccrualOracle;
    use crate::accrual::AccrualReport;
    use crate::ledger::store::MockLedgerStore;
    use crate::ledger::{InMemoryLedger, LedgerError};
    use crate::orders::OrderNumber;
    use crate::reconciliation::BoundedOrderQueue;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn number(raw: &str) -> OrderNumber {
        OrderNumber::parse(raw).unwrap()
    }

    fn report(order: &OrderNumber, status: OrderStatus, accrual: Option<Decimal>) -> AccrualReport {
        AccrualReport {
            order: order.to_string(),
            status,
            accrual,
        }
    }

    async fn ledger_with_order(raw: &str, user: Uuid) -> Arc<InMemoryLedger> {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.insert_order(&number(raw), user).await.unwrap();
        ledger
    }

    async fn order_status(ledger: &InMemoryLedger, user: Uuid) -> (OrderStatus, Decimal) {
        let orders = ledger.list_orders_for_user(user).await.unwrap();
        (orders[0].status, orders[0].accrual)
    }

    #[tokio::test]
    async fn test_processed_answer_settles_order() {
        let user = Uuid::new_v4();
        let n = number("79927398713");
        let ledger = ledger_with_order("79927398713", user).await;
        let queue = Arc::new(BoundedOrderQueue::new(15));

        let mut oracle = MockAccrualOracle::new();
        oracle
            .expect_get_accrual()
            .times(1)
            .returning(|n| Ok(report(n, OrderStatus::Processed, Some(dec!(500)))));

        let reconciler =
            Reconciler::new(ledger.clone(), Arc::new(oracle), queue.clone(), RetryPolicy::immediate(5));
        let outcome = reconciler.reconcile(ReconcileJob::new(n)).await;

        assert_eq!(outcome, ReconcileOutcome::Settled(OrderStatus::Processed));
        assert!(queue.is_empty());
        assert_eq!(order_status(&ledger, user).await, (OrderStatus::Processed, dec!(500)));
        assert_eq!(ledger.sum_accrual_for_user(user).await.unwrap(), dec!(500));
    }

    #[tokio::test]
    async fn test_invalid_answer_records_zero_accrual() {
        let user = Uuid::new_v4();
        let n = number("12345678903");
        let ledger = ledger_with_order("12345678903", user).await;
        let queue = Arc::new(BoundedOrderQueue::new(15));

        let mut oracle = MockAccrualOracle::new();
        oracle
            .expect_get_accrual()
            .returning(|n| Ok(report(n, OrderStatus::Invalid, Some(dec!(10)))));

        let reconciler =
            Reconciler::new(ledger.clone(), Arc::new(oracle), queue.clone(), RetryPolicy::immediate(5));
        let outcome = reconciler.reconcile(ReconcileJob::new(n)).await;

        assert_eq!(outcome, ReconcileOutcome::Settled(OrderStatus::Invalid));
        assert_eq!(order_status(&ledger, user).await, (OrderStatus::Invalid, Decimal::ZERO));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_processing_answer_requeues_exactly_once() {
        let user = Uuid::new_v4();
        let n = number("2377225624");
        let ledger = ledger_with_order("2377225624", user).await;
        let queue = Arc::new(BoundedOrderQueue::new(15));

        let mut oracle = MockAccrualOracle::new();
        oracle
            .expect_get_accrual()
            .times(1)
            .returning(|n| Ok(report(n, OrderStatus::Processing, None)));

        let reconciler =
            Reconciler::new(ledger.clone(), Arc::new(oracle), queue.clone(), RetryPolicy::immediate(5));
        let outcome = reconciler.reconcile(ReconcileJob::new(n.clone())).await;

        assert_eq!(
            outcome,
            ReconcileOutcome::Requeued {
                attempt: 1,
                delay: Duration::ZERO
            }
        );
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop_wait().await.unwrap(), ReconcileJob { order: n, attempt: 1 });
        let (status, _) = order_status(&ledger, user).await;
        assert_eq!(status, OrderStatus::Processing);
        assert!(!status.is_terminal());
    }

    #[tokio::test]
    async fn test_registered_answer_moves_order_to_processing() {
        let user = Uuid::new_v4();
        let n = number("18");
        let ledger = ledger_with_order("18", user).await;
        let queue = Arc::new(BoundedOrderQueue::new(15));

        let mut oracle = MockAccrualOracle::new();
        oracle
            .expect_get_accrual()
            .returning(|n| Ok(report(n, OrderStatus::New, None)));

        let reconciler =
            Reconciler::new(ledger.clone(), Arc::new(oracle), queue.clone(), RetryPolicy::immediate(5));
        reconciler.reconcile(ReconcileJob::new(n)).await;

        assert_eq!(order_status(&ledger, user).await.0, OrderStatus::Processing);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_oracle_failure_keeps_status_and_requeues() {
        let user = Uuid::new_v4();
        let n = number("4561261212345467");
        let ledger = ledger_with_order("4561261212345467", user).await;
        let queue = Arc::new(BoundedOrderQueue::new(15));

        let mut oracle = MockAccrualOracle::new();
        oracle
            .expect_get_accrual()
            .returning(|_| Err(AccrualError::Unexpected(503)));

        let reconciler =
            Reconciler::new(ledger.clone(), Arc::new(oracle), queue.clone(), RetryPolicy::immediate(5));
        let outcome = reconciler.reconcile(ReconcileJob::new(n)).await;

        assert!(matches!(outcome, ReconcileOutcome::Requeued { attempt: 1, .. }));
        assert_eq!(order_status(&ledger, user).await, (OrderStatus::New, Decimal::ZERO));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_negative_accrual_is_not_recorded() {
        let user = Uuid::new_v4();
        let n = number("79927398713");
        let ledger = ledger_with_order("79927398713", user).await;
        let queue = Arc::new(BoundedOrderQueue::new(15));

        let mut oracle = MockAccrualOracle::new();
        oracle
            .expect_get_accrual()
            .returning(|n| Ok(report(n, OrderStatus::Processed, Some(dec!(-250)))));

        let reconciler =
            Reconciler::new(ledger.clone(), Arc::new(oracle), queue.clone(), RetryPolicy::immediate(5));
        let outcome = reconciler.reconcile(ReconcileJob::new(n)).await;

        assert!(matches!(outcome, ReconcileOutcome::Requeued { attempt: 1, .. }));
        assert_eq!(order_status(&ledger, user).await, (OrderStatus::New, Decimal::ZERO));
        assert_eq!(ledger.sum_accrual_for_user(user).await.unwrap(), Decimal::ZERO);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_report_for_another_order_is_not_recorded() {
        let user = Uuid::new_v4();
        let n = number("12345678903");
        let ledger = ledger_with_order("12345678903", user).await;
        let queue = Arc::new(BoundedOrderQueue::new(15));

        let mut oracle = MockAccrualOracle::new();
        oracle.expect_get_accrual().returning(|_| {
            Ok(report(&number("79927398713"), OrderStatus::Processed, Some(dec!(900))))
        });

        let reconciler =
            Reconciler::new(ledger.clone(), Arc::new(oracle), queue.clone(), RetryPolicy::immediate(5));
        let outcome = reconciler.reconcile(ReconcileJob::new(n)).await;

        assert!(matches!(outcome, ReconcileOutcome::Requeued { .. }));
        assert_eq!(order_status(&ledger, user).await, (OrderStatus::New, Decimal::ZERO));
    }

    #[tokio::test]
    async fn test_storage_failure_requeues() {
        let n = number("9278923470");
        let mut ledger = MockLedgerStore::new();
        ledger
            .expect_update_order_status()
            .times(1)
            .returning(|_, _, _| Err(LedgerError::Database(sqlx::Error::PoolTimedOut)));

        let mut oracle = MockAccrualOracle::new();
        oracle
            .expect_get_accrual()
            .returning(|n| Ok(report(n, OrderStatus::Processed, Some(dec!(1)))));

        let queue = Arc::new(BoundedOrderQueue::new(15));
        let reconciler =
            Reconciler::new(Arc::new(ledger), Arc::new(oracle), queue.clone(), RetryPolicy::immediate(5));
        let outcome = reconciler.reconcile(ReconcileJob::new(n)).await;

        assert!(matches!(outcome, ReconcileOutcome::Requeued { .. }));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_order_stuck_after_max_attempts() {
        let user = Uuid::new_v4();
        let n = number("346436439");
        let ledger = ledger_with_order("346436439", user).await;
        let queue = Arc::new(BoundedOrderQueue::new(15));

        let mut oracle = MockAccrualOracle::new();
        oracle
            .expect_get_accrual()
            .returning(|n| Ok(report(n, OrderStatus::Processing, None)));

        let reconciler =
            Reconciler::new(ledger.clone(), Arc::new(oracle), queue.clone(), RetryPolicy::immediate(3));

        let job = ReconcileJob { order: n, attempt: 2 };
        assert_eq!(reconciler.reconcile(job).await, ReconcileOutcome::Stuck);
        assert!(queue.is_empty());
        assert_eq!(order_status(&ledger, user).await.0, OrderStatus::Processing);
    }

    #[tokio::test]
    async fn test_rate_limit_delay_overrides_backoff() {
        let user = Uuid::new_v4();
        let n = number("49927398716");
        let ledger = ledger_with_order("49927398716", user).await;
        let queue = Arc::new(BoundedOrderQueue::new(15));

        let mut oracle = MockAccrualOracle::new();
        oracle.expect_get_accrual().returning(|_| {
            Err(AccrualError::RateLimited {
                retry_after: Duration::from_secs(60),
            })
        });

        let reconciler =
            Reconciler::new(ledger.clone(), Arc::new(oracle), queue.clone(), RetryPolicy::immediate(5));
        let outcome = reconciler.reconcile(ReconcileJob::new(n)).await;

        assert_eq!(
            outcome,
            ReconcileOutcome::Requeued {
                attempt: 1,
                delay: Duration::from_secs(60)
            }
        );
        // the delayed push has not happened yet
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_delayed_requeue_lands_after_backoff() {
        let user = Uuid::new_v4();
        let n = number("5062821234567892");
        let ledger = ledger_with_order("5062821234567892", user).await;
        let queue = Arc::new(BoundedOrderQueue::new(15));

        let mut oracle = MockAccrualOracle::new();
        oracle
            .expect_get_accrual()
            .returning(|n| Ok(report(n, OrderStatus::Processing, None)));

        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.0,
        };
        let reconciler = Reconciler::new(ledger, Arc::new(oracle), queue.clone(), policy);
        let outcome = reconciler.reconcile(ReconcileJob::new(n.clone())).await;
        assert_eq!(
            outcome,
            ReconcileOutcome::Requeued {
                attempt: 1,
                delay: Duration::from_millis(50)
            }
        );
        assert!(queue.is_empty());

        let job = tokio::time::timeout(Duration::from_secs(2), queue.pop_wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job, ReconcileJob { order: n, attempt: 1 });
    }

    #[tokio::test]
    async fn test_pool_drives_orders_to_terminal_status() {
        let user = Uuid::new_v4();
        let ledger = Arc::new(InMemoryLedger::new());
        let queue = Arc::new(BoundedOrderQueue::new(15));
        let numbers = [number("79927398713"), number("12345678903"), number("2377225624")];
        for n in &numbers {
            ledger.insert_order(n, user).await.unwrap();
            queue.push(ReconcileJob::new(n.clone())).await.unwrap();
        }

        let mut oracle = MockAccrualOracle::new();
        oracle.expect_get_accrual().returning(|n| {
            if n.as_str() == "2377225624" {
                Ok(report(n, OrderStatus::Invalid, None))
            } else {
                Ok(report(n, OrderStatus::Processed, Some(dec!(100.25))))
            }
        });

        let reconciler = Arc::new(Reconciler::new(
            ledger.clone(),
            Arc::new(oracle),
            queue.clone(),
            RetryPolicy::immediate(5),
        ));
        let pool = ReconciliationPool::start(reconciler, 3);
        assert_eq!(pool.worker_count(), 3);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let unfinished = ledger.list_unfinished_orders().await.unwrap();
            if unfinished.is_empty() || tokio::time::Instant::now() > deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        pool.shutdown(Duration::from_secs(1)).await;

        assert!(ledger.list_unfinished_orders().await.unwrap().is_empty());
        assert_eq!(ledger.sum_accrual_for_user(user).await.unwrap(), dec!(200.50));
    }

    #[tokio::test]
    async fn test_pool_shutdown_stops_idle_workers() {
        let queue = Arc::new(BoundedOrderQueue::new(15));
        let reconciler = Arc::new(Reconciler::new(
            Arc::new(InMemoryLedger::new()),
            Arc::new(MockAccrualOracle::new()),
            queue,
            RetryPolicy::default(),
        ));

        let pool = ReconciliationPool::start(reconciler, 2);
        tokio::time::timeout(Duration::from_secs(2), pool.shutdown(Duration::from_secs(1)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_recovery_requeues_unfinished_orders() {
        let user = Uuid::new_v4();
        let ledger = Arc::new(InMemoryLedger::new());
        for raw in ["79927398713", "12345678903", "2377225624"] {
            ledger.insert_order(&number(raw), user).await.unwrap();
        }
        ledger
            .update_order_status(&number("12345678903"), OrderStatus::Processed, dec!(5))
            .await
            .unwrap();
        ledger
            .update_order_status(&number("2377225624"), OrderStatus::Processing, Decimal::ZERO)
            .await
            .unwrap();

        let queue = Arc::new(BoundedOrderQueue::new(15));
        let recovered = spawn_recovery(ledger, queue.clone()).await.unwrap();

        assert_eq!(recovered, 2);
        assert_eq!(queue.pop_wait().await.unwrap().order, number("79927398713"));
        assert_eq!(queue.pop_wait().await.unwrap().order, number("2377225624"));
    }
}
