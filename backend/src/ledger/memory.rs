use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::*;
use super::store::{LedgerError, LedgerResult, LedgerStore};
use crate::orders::OrderNumber;

#[derive(Default)]
struct LedgerState {
    users: HashMap<Uuid, User>,
    logins: HashMap<String, Uuid>,
    // insertion order doubles as upload order
    orders: Vec<Order>,
    order_index: HashMap<OrderNumber, usize>,
    withdrawals: Vec<Withdrawal>,
    withdrawal_orders: HashSet<OrderNumber>,
}

/// In-memory ledger used when no database is configured, and by tests.
///
/// Every operation takes the state lock once, so check-then-insert sequences
/// inside a single call are atomic just like a unique constraint would make them.
#[derive(Default)]
pub struct InMemoryLedger {
    state: RwLock<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn create_user(&self, login: &str, password_hash: &str) -> LedgerResult<User> {
        let mut state = self.state.write().await;
        if state.logins.contains_key(login) {
            return Err(LedgerError::Duplicate(login.to_string()));
        }

        let user = User {
            id: Uuid::new_v4(),
            login: login.to_string(),
            password_hash: password_hash.to_string(),
            created_at: Utc::now(),
        };
        state.logins.insert(user.login.clone(), user.id);
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user_by_login(&self, login: &str) -> LedgerResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state
            .logins
            .get(login)
            .and_then(|id| state.users.get(id))
            .cloned())
    }

    async fn insert_order(&self, number: &OrderNumber, user_id: Uuid) -> LedgerResult<Order> {
        let mut state = self.state.write().await;
        if state.order_index.contains_key(number) {
            return Err(LedgerError::Duplicate(number.to_string()));
        }

        let order = Order {
            number: number.clone(),
            user_id,
            status: OrderStatus::New,
            accrual: Decimal::ZERO,
            uploaded_at: Utc::now(),
        };
        let index = state.orders.len();
        state.orders.push(order.clone());
        state.order_index.insert(number.clone(), index);
        Ok(order)
    }

    async fn owner_of_order(&self, number: &OrderNumber) -> LedgerResult<Option<Uuid>> {
        let state = self.state.read().await;
        Ok(state
            .order_index
            .get(number)
            .map(|&index| state.orders[index].user_id))
    }

    async fn update_order_status(
        &self,
        number: &OrderNumber,
        status: OrderStatus,
        accrual: Decimal,
    ) -> LedgerResult<()> {
        let mut state = self.state.write().await;
        let index = *state
            .order_index
            .get(number)
            .ok_or_else(|| LedgerError::NotFound(number.to_string()))?;

        let order = &mut state.orders[index];
        order.status = status;
        order.accrual = accrual;
        Ok(())
    }

    async fn list_orders_for_user(&self, user_id: Uuid) -> LedgerResult<Vec<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .iter()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_unfinished_orders(&self) -> LedgerResult<Vec<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .iter()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn sum_accrual_for_user(&self, user_id: Uuid) -> LedgerResult<Decimal> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .iter()
            .filter(|o| o.user_id == user_id)
            .filter_map(Order::settled_accrual)
            .sum())
    }

    async fn sum_withdrawals_for_user(&self, user_id: Uuid) -> LedgerResult<Decimal> {
        let state = self.state.read().await;
        Ok(state
            .withdrawals
            .iter()
            .filter(|w| w.user_id == user_id)
            .map(|w| w.sum)
            .sum())
    }

    async fn insert_withdrawal(
        &self,
        user_id: Uuid,
        order: &OrderNumber,
        sum: Decimal,
    ) -> LedgerResult<Withdrawal> {
        let mut state = self.state.write().await;
        if !state.withdrawal_orders.insert(order.clone()) {
            return Err(LedgerError::Duplicate(order.to_string()));
        }

        let withdrawal = Withdrawal {
            order: order.clone(),
            user_id,
            sum,
            processed_at: Utc::now(),
        };
        state.withdrawals.push(withdrawal.clone());
        Ok(withdrawal)
    }

    async fn list_withdrawals_for_user(&self, user_id: Uuid) -> LedgerResult<Vec<Withdrawal>> {
        let state = self.state.read().await;
        Ok(state
            .withdrawals
            .iter()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect())
    }
}
