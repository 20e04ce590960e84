use bcrypt::{hash, verify};

use crate::error::AppResult;

/// bcrypt is CPU bound; both helpers run on the blocking pool
pub async fn hash_password(password: String, cost: u32) -> AppResult<String> {
    let hashed = tokio::task::spawn_blocking(move || hash(password, cost)).await??;
    Ok(hashed)
}

pub async fn verify_password(password: String, hash: String) -> AppResult<bool> {
    let valid = tokio::task::spawn_blocking(move || verify(password, &hash)).await??;
    Ok(valid)
}
