use axum::{
    extract::State,
    http::{header::AUTHORIZATION, StatusCode},
    response::IntoResponse,
    Json,
};
use tracing::info;

use super::handler::AppState;
use super::models::{Credentials, TokenResponse};
use crate::error::AppResult;
use crate::middleware::ValidatedJson;

fn token_response(token: String) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(AUTHORIZATION, format!("Bearer {}", token))],
        Json(TokenResponse { token }),
    )
}

/// POST /api/user/register
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(credentials): ValidatedJson<Credentials>,
) -> AppResult<impl IntoResponse> {
    info!("Registering user: {}", credentials.login);
    let token = state
        .users
        .register(&credentials.login, &credentials.password)
        .await?;
    Ok(token_response(token))
}

/// POST /api/user/login
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(credentials): ValidatedJson<Credentials>,
) -> AppResult<impl IntoResponse> {
    let token = state
        .users
        .login(&credentials.login, &credentials.password)
        .await?;
    info!("User logged in: {}", credentials.login);
    Ok(token_response(token))
}
