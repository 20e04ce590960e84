use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use std::sync::Arc;
use uuid::Uuid;

use super::jwt::JwtManager;
use crate::error::AppError;

/// Authenticated caller, taken from the `Authorization` header.
/// Accepts the bare token as well as `Bearer <token>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub login: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    Arc<JwtManager>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("Missing authorization token".to_string()))?;

        let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
        if token.is_empty() {
            return Err(AppError::Unauthorized("Missing authorization token".to_string()));
        }

        let jwt = Arc::<JwtManager>::from_ref(state);
        let claims = jwt.verify_token(token)?;

        Ok(AuthUser {
            user_id: claims.user_id()?,
            login: claims.login,
        })
    }
}
