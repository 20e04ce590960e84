use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use std::fmt;
use uuid::Uuid;

use crate::orders::OrderNumber;

/// Order status as tracked by the ledger.
///
/// Transitions are driven entirely by accrual service answers:
/// - New → Processing, Invalid, Processed
/// - Processing → Processing, Invalid, Processed
/// - Invalid, Processed are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "order_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    /// The accrual service reports freshly registered orders as REGISTERED
    #[serde(alias = "REGISTERED")]
    New,
    Processing,
    Invalid,
    Processed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }

    /// Terminal orders are never reconciled again
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Invalid | OrderStatus::Processed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// User entity
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub login: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Order entity - owner is fixed at registration
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Order {
    #[sqlx(rename = "order_number")]
    pub number: OrderNumber,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub accrual: Decimal,
    pub uploaded_at: DateTime<Utc>,
}

impl Order {
    /// Accrual is only meaningful once the order is processed
    pub fn settled_accrual(&self) -> Option<Decimal> {
        (self.status == OrderStatus::Processed).then_some(self.accrual)
    }
}

/// Withdrawal entity - immutable once recorded
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Withdrawal {
    #[sqlx(rename = "order_number")]
    pub order: OrderNumber,
    pub user_id: Uuid,
    #[sqlx(rename = "amount")]
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}

/// Derived balance, never persisted. Amounts serialize as JSON numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub current: Decimal,
    pub withdrawn: Decimal,
}

impl Balance {
    pub fn from_totals(accrued: Decimal, withdrawn: Decimal) -> Self {
        Self {
            current: accrued - withdrawn,
            withdrawn,
        }
    }

    pub fn covers(&self, required: Decimal) -> bool {
        self.current >= required
    }
}
