use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::ledger::{Balance, LedgerError, LedgerStore, Withdrawal};
use crate::orders::OrderNumber;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawOutcome {
    Success(Withdrawal),
    /// Nothing was written
    InsufficientFunds { required: Decimal, available: Decimal },
}

/// Derives balances from the ledger and enforces withdrawal solvency.
///
/// The solvency check and the withdrawal insert run under a per-user async lock,
/// so two withdrawals by the same user are never checked against the same balance.
pub struct BalanceCalculator {
    ledger: Arc<dyn LedgerStore>,
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl BalanceCalculator {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self {
            ledger,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_balance(&self, user_id: Uuid) -> AppResult<Balance> {
        let accrued = self.ledger.sum_accrual_for_user(user_id).await?;
        let withdrawn = self.ledger.sum_withdrawals_for_user(user_id).await?;
        Ok(Balance::from_totals(accrued, withdrawn))
    }

    pub async fn withdraw(
        &self,
        user_id: Uuid,
        order: &OrderNumber,
        sum: Decimal,
    ) -> AppResult<WithdrawOutcome> {
        if sum <= Decimal::ZERO {
            return Err(AppError::InvalidInput(
                "Withdrawal sum must be positive".to_string(),
            ));
        }

        if sum.normalize().scale() > 2 {
            return Err(AppError::InvalidInput(
                "Withdrawal sum must have at most 2 decimal places".to_string(),
            ));
        }

        let user_lock = self.lock_for(user_id);
        let outcome = {
            let _guard = user_lock.lock().await;
            self.withdraw_locked(user_id, order, sum).await
        };
        self.release_lock(user_id, user_lock);
        outcome
    }

    async fn withdraw_locked(
        &self,
        user_id: Uuid,
        order: &OrderNumber,
        sum: Decimal,
    ) -> AppResult<WithdrawOutcome> {
        let balance = self.get_balance(user_id).await?;
        if !balance.covers(sum) {
            return Ok(WithdrawOutcome::InsufficientFunds {
                required: sum,
                available: balance.current,
            });
        }

        let withdrawal = match self.ledger.insert_withdrawal(user_id, order, sum).await {
            Ok(withdrawal) => withdrawal,
            Err(LedgerError::Duplicate(order)) => {
                return Err(AppError::Conflict(format!(
                    "Order {} was already used for a withdrawal",
                    order
                )));
            }
            Err(e) => return Err(e.into()),
        };

        info!(user_id = %user_id, order = %order, sum = %sum, "withdrawal recorded");
        Ok(WithdrawOutcome::Success(withdrawal))
    }

    /// Oldest first; empty when the user never withdrew
    pub async fn withdrawals(&self, user_id: Uuid) -> AppResult<Vec<Withdrawal>> {
        Ok(self.ledger.list_withdrawals_for_user(user_id).await?)
    }

    fn lock_for(&self, user_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(user_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drops the user's entry once nobody but the map and `user_lock` holds it.
    /// Clones are only taken and released under the map lock, so the count is exact.
    fn release_lock(&self, user_id: Uuid, user_lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock();
        if Arc::strong_count(&user_lock) == 2 {
            locks.remove(&user_id);
        }
        drop(user_lock);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::store::MockLedgerStore;
    use crate::ledger::{InMemoryLedger, OrderStatus};
    use crate::orders::number::luhn_valid;
    use rust_decimal_macros::dec;

    fn number(raw: &str) -> OrderNumber {
        OrderNumber::parse(raw).unwrap()
    }

    /// Appends the Luhn check digit to `prefix`
    fn valid_number(prefix: u64) -> OrderNumber {
        (0..10)
            .map(|d| format!("{}{}", prefix, d))
            .find(|candidate| luhn_valid(candidate))
            .map(|raw| OrderNumber::parse(&raw).unwrap())
            .unwrap()
    }

    async fn credit(ledger: &InMemoryLedger, user: Uuid, raw: &str, amount: Decimal) {
        let n = number(raw);
        ledger.insert_order(&n, user).await.unwrap();
        ledger
            .update_order_status(&n, OrderStatus::Processed, amount)
            .await
            .unwrap();
    }

    async fn funded_user() -> (Arc<InMemoryLedger>, BalanceCalculator, Uuid) {
        let ledger = Arc::new(InMemoryLedger::new());
        let user = Uuid::new_v4();
        credit(&ledger, user, "79927398713", dec!(600.40)).await;
        credit(&ledger, user, "12345678903", dec!(400.20)).await;
        let calculator = BalanceCalculator::new(ledger.clone());
        (ledger, calculator, user)
    }

    #[tokio::test]
    async fn test_balance_sums_processed_accruals() {
        let (ledger, calculator, user) = funded_user().await;
        // unfinished orders do not count
        ledger.insert_order(&number("2377225624"), user).await.unwrap();

        let balance = calculator.get_balance(user).await.unwrap();
        assert_eq!(balance.current, dec!(1000.60));
        assert_eq!(balance.withdrawn, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_withdraw_reduces_current_balance() {
        let (_ledger, calculator, user) = funded_user().await;

        let outcome = calculator
            .withdraw(user, &number("2377225624"), dec!(1000))
            .await
            .unwrap();
        assert!(matches!(outcome, WithdrawOutcome::Success(ref w) if w.sum == dec!(1000)));

        let balance = calculator.get_balance(user).await.unwrap();
        assert_eq!(balance.current, dec!(0.60));
        assert_eq!(balance.withdrawn, dec!(1000));

        let withdrawals = calculator.withdrawals(user).await.unwrap();
        assert_eq!(withdrawals.len(), 1);
        assert_eq!(withdrawals[0].order, number("2377225624"));
    }

    #[tokio::test]
    async fn test_insufficient_funds_changes_nothing() {
        let (_ledger, calculator, user) = funded_user().await;

        let outcome = calculator
            .withdraw(user, &number("2377225624"), dec!(1000.61))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WithdrawOutcome::InsufficientFunds {
                required: dec!(1000.61),
                available: dec!(1000.60),
            }
        );
        assert!(calculator.withdrawals(user).await.unwrap().is_empty());
        assert_eq!(calculator.get_balance(user).await.unwrap().current, dec!(1000.60));
    }

    #[tokio::test]
    async fn test_non_positive_sum_rejected() {
        let (_ledger, calculator, user) = funded_user().await;

        for sum in [Decimal::ZERO, dec!(-5)] {
            let err = calculator
                .withdraw(user, &number("2377225624"), sum)
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::InvalidInput(_)));
        }
        assert!(calculator.withdrawals(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sub_cent_sum_rejected() {
        let (_ledger, calculator, user) = funded_user().await;

        for sum in [dec!(0.001), dec!(10.005)] {
            let err = calculator
                .withdraw(user, &number("2377225624"), sum)
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::InvalidInput(_)));
        }
        assert!(calculator.withdrawals(user).await.unwrap().is_empty());

        // trailing zeros are not extra precision
        let outcome = calculator
            .withdraw(user, &number("2377225624"), dec!(10.500))
            .await
            .unwrap();
        assert!(matches!(outcome, WithdrawOutcome::Success(ref w) if w.sum == dec!(10.5)));
    }

    #[tokio::test]
    async fn test_user_locks_are_released() {
        let (_ledger, calculator, user) = funded_user().await;

        calculator
            .withdraw(user, &number("2377225624"), dec!(1))
            .await
            .unwrap();
        calculator
            .withdraw(Uuid::new_v4(), &number("18"), dec!(1))
            .await
            .unwrap();

        assert!(calculator.locks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_reused_withdrawal_order_is_conflict() {
        let (_ledger, calculator, user) = funded_user().await;
        let n = number("2377225624");

        calculator.withdraw(user, &n, dec!(10)).await.unwrap();
        let err = calculator.withdraw(user, &n, dec!(10)).await.unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(calculator.get_balance(user).await.unwrap().withdrawn, dec!(10));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_withdrawals_never_overdraw() {
        let ledger = Arc::new(InMemoryLedger::new());
        let user = Uuid::new_v4();
        credit(&ledger, user, "79927398713", dec!(100)).await;
        let calculator = Arc::new(BalanceCalculator::new(ledger));

        let mut tasks = Vec::new();
        for i in 0..10u64 {
            let calculator = calculator.clone();
            let order = valid_number(5_000_000 + i);
            tasks.push(tokio::spawn(async move {
                calculator.withdraw(user, &order, dec!(30)).await.unwrap()
            }));
        }

        let mut approved = 0;
        for task in tasks {
            if let WithdrawOutcome::Success(_) = task.await.unwrap() {
                approved += 1;
            }
        }

        assert_eq!(approved, 3);
        assert!(calculator.locks.lock().is_empty());
        let balance = calculator.get_balance(user).await.unwrap();
        assert_eq!(balance.current, dec!(10));
        assert_eq!(balance.withdrawn, dec!(90));
    }

    #[tokio::test]
    async fn test_storage_error_surfaces() {
        let mut ledger = MockLedgerStore::new();
        ledger
            .expect_sum_accrual_for_user()
            .returning(|_| Err(LedgerError::Database(sqlx::Error::PoolTimedOut)));

        let calculator = BalanceCalculator::new(Arc::new(ledger));
        let err = calculator.get_balance(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::Ledger(LedgerError::Database(_))));
    }
}
