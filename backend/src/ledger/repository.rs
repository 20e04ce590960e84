use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::*;
use super::store::{LedgerError, LedgerResult, LedgerStore};
use crate::orders::OrderNumber;

/// PostgreSQL ledger repository
pub struct LedgerRepository {
    pub pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for LedgerRepository {
    // ========== USER OPERATIONS ==========

    async fn create_user(&self, login: &str, password_hash: &str) -> LedgerResult<User> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, login, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, login, password_hash, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(login)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| LedgerError::from_insert(e, login))
    }

    async fn find_user_by_login(&self, login: &str) -> LedgerResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, login, password_hash, created_at
            FROM users
            WHERE login = $1
            "#,
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    // ========== ORDER OPERATIONS ==========

    async fn insert_order(&self, number: &OrderNumber, user_id: Uuid) -> LedgerResult<Order> {
        sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (order_number, user_id, status)
            VALUES ($1, $2, $3)
            RETURNING order_number, user_id, status, accrual, uploaded_at
            "#,
        )
        .bind(number)
        .bind(user_id)
        .bind(OrderStatus::New)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| LedgerError::from_insert(e, number.as_str()))
    }

    async fn owner_of_order(&self, number: &OrderNumber) -> LedgerResult<Option<Uuid>> {
        let owner = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT user_id FROM orders WHERE order_number = $1
            "#,
        )
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(owner)
    }

    /// Idempotent overwrite of status and accrual, keyed by order number
    async fn update_order_status(
        &self,
        number: &OrderNumber,
        status: OrderStatus,
        accrual: Decimal,
    ) -> LedgerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, accrual = $3, updated_at = NOW()
            WHERE order_number = $1
            "#,
        )
        .bind(number)
        .bind(status)
        .bind(accrual)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(number.to_string()));
        }

        Ok(())
    }

    async fn list_orders_for_user(&self, user_id: Uuid) -> LedgerResult<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT order_number, user_id, status, accrual, uploaded_at
            FROM orders
            WHERE user_id = $1
            ORDER BY uploaded_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }

    async fn list_unfinished_orders(&self) -> LedgerResult<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT order_number, user_id, status, accrual, uploaded_at
            FROM orders
            WHERE status = $1 OR status = $2
            ORDER BY uploaded_at ASC
            "#,
        )
        .bind(OrderStatus::New)
        .bind(OrderStatus::Processing)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }

    // ========== BALANCE OPERATIONS ==========

    async fn sum_accrual_for_user(&self, user_id: Uuid) -> LedgerResult<Decimal> {
        let total = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(accrual), 0)
            FROM orders
            WHERE user_id = $1 AND status = $2
            "#,
        )
        .bind(user_id)
        .bind(OrderStatus::Processed)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    async fn sum_withdrawals_for_user(&self, user_id: Uuid) -> LedgerResult<Decimal> {
        let total = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(amount), 0)
            FROM withdrawals
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    // ========== WITHDRAWAL OPERATIONS ==========

    async fn insert_withdrawal(
        &self,
        user_id: Uuid,
        order: &OrderNumber,
        sum: Decimal,
    ) -> LedgerResult<Withdrawal> {
        sqlx::query_as::<_, Withdrawal>(
            r#"
            INSERT INTO withdrawals (order_number, user_id, amount)
            VALUES ($1, $2, $3)
            RETURNING order_number, user_id, amount, processed_at
            "#,
        )
        .bind(order)
        .bind(user_id)
        .bind(sum)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| LedgerError::from_insert(e, order.as_str()))
    }

    async fn list_withdrawals_for_user(&self, user_id: Uuid) -> LedgerResult<Vec<Withdrawal>> {
        let withdrawals = sqlx::query_as::<_, Withdrawal>(
            r#"
            SELECT order_number, user_id, amount, processed_at
            FROM withdrawals
            WHERE user_id = $1
            ORDER BY processed_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(withdrawals)
    }
}
