use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::ledger::models::*;

// ========== REQUEST MODELS ==========

/// Body of register and login
#[derive(Debug, Deserialize, Validate)]
pub struct Credentials {
    #[validate(length(min = 1, max = 256, message = "login must not be empty"))]
    pub login: String,
    #[validate(length(min = 1, max = 72, message = "password must be 1 to 72 bytes"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct WithdrawRequest {
    #[validate(length(min = 1, message = "order must not be empty"))]
    pub order: String,
    pub sum: Decimal,
}

// ========== RESPONSE MODELS ==========

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub number: String,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            accrual: order.settled_accrual(),
            number: order.number.to_string(),
            status: order.status,
            uploaded_at: order.uploaded_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WithdrawalResponse {
    pub order: String,
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}

impl From<Withdrawal> for WithdrawalResponse {
    fn from(withdrawal: Withdrawal) -> Self {
        Self {
            order: withdrawal.order.to_string(),
            sum: withdrawal.sum,
            processed_at: withdrawal.processed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub queued_orders: usize,
}
