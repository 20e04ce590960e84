use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use super::models::{Order, OrderStatus, User, Withdrawal};
use crate::orders::OrderNumber;

/// Storage-level errors. The core treats them as opaque apart from
/// uniqueness conflicts, which carry meaning for registration.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl LedgerError {
    /// Maps a unique-constraint violation to `Duplicate`, anything else to `Database`
    pub fn from_insert(error: sqlx::Error, key: &str) -> Self {
        match &error {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                LedgerError::Duplicate(key.to_string())
            }
            _ => LedgerError::Database(error),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger store contract - THE source of truth for orders, users and withdrawals.
///
/// Order ownership and withdrawal identity are keyed by order number with a
/// uniqueness constraint; implementations report a second insert of the same
/// key as [`LedgerError::Duplicate`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // users
    async fn create_user(&self, login: &str, password_hash: &str) -> LedgerResult<User>;
    async fn find_user_by_login(&self, login: &str) -> LedgerResult<Option<User>>;

    // orders
    async fn insert_order(&self, number: &OrderNumber, user_id: Uuid) -> LedgerResult<Order>;
    async fn owner_of_order(&self, number: &OrderNumber) -> LedgerResult<Option<Uuid>>;
    async fn update_order_status(
        &self,
        number: &OrderNumber,
        status: OrderStatus,
        accrual: Decimal,
    ) -> LedgerResult<()>;
    async fn list_orders_for_user(&self, user_id: Uuid) -> LedgerResult<Vec<Order>>;
    /// Orders still in NEW or PROCESSING, oldest upload first
    async fn list_unfinished_orders(&self) -> LedgerResult<Vec<Order>>;

    // balance
    /// Sum of accruals over PROCESSED orders only
    async fn sum_accrual_for_user(&self, user_id: Uuid) -> LedgerResult<Decimal>;
    async fn sum_withdrawals_for_user(&self, user_id: Uuid) -> LedgerResult<Decimal>;

    // withdrawals
    async fn insert_withdrawal(
        &self,
        user_id: Uuid,
        order: &OrderNumber,
        sum: Decimal,
    ) -> LedgerResult<Withdrawal>;
    async fn list_withdrawals_for_user(&self, user_id: Uuid) -> LedgerResult<Vec<Withdrawal>>;
}
