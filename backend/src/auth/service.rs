use std::sync::Arc;
use tracing::info;

use super::jwt::JwtManager;
use super::password::{hash_password, verify_password};
use crate::error::{AppError, AppResult};
use crate::ledger::{LedgerError, LedgerStore, User};

/// Registration and login; both hand back a signed token on success
pub struct UserService {
    ledger: Arc<dyn LedgerStore>,
    jwt: Arc<JwtManager>,
    bcrypt_cost: u32,
}

impl UserService {
    pub fn new(ledger: Arc<dyn LedgerStore>, jwt: Arc<JwtManager>, bcrypt_cost: u32) -> Self {
        Self {
            ledger,
            jwt,
            bcrypt_cost,
        }
    }

    pub async fn register(&self, login: &str, password: &str) -> AppResult<String> {
        let hash = hash_password(password.to_string(), self.bcrypt_cost).await?;

        let user = match self.ledger.create_user(login, &hash).await {
            Ok(user) => user,
            Err(LedgerError::Duplicate(_)) => return Err(AppError::LoginTaken(login.to_string())),
            Err(e) => return Err(e.into()),
        };

        info!(user_id = %user.id, login = %user.login, "user registered");
        self.issue_token(&user)
    }

    pub async fn login(&self, login: &str, password: &str) -> AppResult<String> {
        let user = self
            .ledger
            .find_user_by_login(login)
            .await?
            .ok_or(AppError::InvalidCredentials)?;

        if !verify_password(password.to_string(), user.password_hash.clone()).await? {
            return Err(AppError::InvalidCredentials);
        }

        self.issue_token(&user)
    }

    fn issue_token(&self, user: &User) -> AppResult<String> {
        self.jwt.generate_token(user.id, &user.login)
    }
}
