use axum::{extract::FromRef, extract::State, Json};
use chrono::Utc;
use std::sync::Arc;

use super::models::HealthResponse;
use crate::auth::{JwtManager, UserService};
use crate::balance::BalanceCalculator;
use crate::orders::OrderRegistrar;
use crate::reconciliation::BoundedOrderQueue;

#[derive(Clone)]
pub struct AppState {
    pub registrar: Arc<OrderRegistrar>,
    pub balances: Arc<BalanceCalculator>,
    pub users: Arc<UserService>,
    pub jwt: Arc<JwtManager>,
    pub queue: Arc<BoundedOrderQueue>,
}

impl FromRef<AppState> for Arc<JwtManager> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        queued_orders: state.queue.len(),
    })
}
