use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::handler::AppState;
use super::models::{WithdrawRequest, WithdrawalResponse};
use crate::auth::AuthUser;
use crate::balance::WithdrawOutcome;
use crate::error::{AppError, AppResult};
use crate::ledger::Balance;
use crate::middleware::ValidatedJson;
use crate::orders::OrderNumber;

/// GET /api/user/balance
pub async fn get_balance(State(state): State<AppState>, user: AuthUser) -> AppResult<Json<Balance>> {
    Ok(Json(state.balances.get_balance(user.user_id).await?))
}

/// POST /api/user/balance/withdraw
pub async fn withdraw(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(request): ValidatedJson<WithdrawRequest>,
) -> AppResult<StatusCode> {
    let order = OrderNumber::parse(request.order.trim())?;

    match state
        .balances
        .withdraw(user.user_id, &order, request.sum)
        .await?
    {
        WithdrawOutcome::Success(_) => Ok(StatusCode::OK),
        WithdrawOutcome::InsufficientFunds {
            required,
            available,
        } => Err(AppError::InsufficientFunds {
            required: required.to_string(),
            available: available.to_string(),
        }),
    }
}

/// GET /api/user/withdrawals
pub async fn list_withdrawals(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Response> {
    let withdrawals = state.balances.withdrawals(user.user_id).await?;
    if withdrawals.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let body: Vec<WithdrawalResponse> = withdrawals
        .into_iter()
        .map(WithdrawalResponse::from)
        .collect();
    Ok(Json(body).into_response())
}
