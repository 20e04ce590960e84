use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::handler::AppState;
use super::models::OrderResponse;
use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::orders::{OrderNumber, Registration};

/// POST /api/user/orders, body is the bare order number
pub async fn upload_order(
    State(state): State<AppState>,
    user: AuthUser,
    body: String,
) -> AppResult<StatusCode> {
    let number = OrderNumber::parse(body.trim())?;

    match state.registrar.register_order(&number, user.user_id).await? {
        Registration::Accepted(_) => Ok(StatusCode::ACCEPTED),
        Registration::AlreadyOwnedBySameUser => Ok(StatusCode::OK),
        Registration::OwnedByOtherUser => Err(AppError::Conflict(format!(
            "Order {} was uploaded by another user",
            number
        ))),
    }
}

/// GET /api/user/orders
pub async fn list_orders(State(state): State<AppState>, user: AuthUser) -> AppResult<Response> {
    let orders = state.registrar.orders_for_user(user.user_id).await?;
    if orders.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let body: Vec<OrderResponse> = orders.into_iter().map(OrderResponse::from).collect();
    Ok(Json(body).into_response())
}
