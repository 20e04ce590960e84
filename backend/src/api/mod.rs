pub mod balance;
pub mod handler;
pub mod models;
pub mod orders;
pub mod users;

use axum::{
    routing::{get, post},
    Router,
};

pub use handler::AppState;

/// Routes only; transport layers are added by the server
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handler::health_check))
        .nest(
            "/api/user",
            Router::new()
                .route("/register", post(users::register))
                .route("/login", post(users::login))
                .route("/orders", post(orders::upload_order).get(orders::list_orders))
                .route("/balance", get(balance::get_balance))
                .route("/balance/withdraw", post(balance::withdraw))
                .route("/withdrawals", get(balance::list_withdrawals)),
        )
        .with_state(state)
}
