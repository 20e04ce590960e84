use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

use crate::{
    accrual::HttpAccrualClient,
    api::AppState,
    auth::{JwtConfig, JwtManager, UserService},
    balance::BalanceCalculator,
    config::Config,
    error::AppResult,
    ledger::{InMemoryLedger, LedgerRepository, LedgerStore},
    orders::OrderRegistrar,
    reconciliation::{spawn_recovery, BoundedOrderQueue, Reconciler, ReconciliationPool},
};

/// Everything `main` needs to serve requests and to stop cleanly
pub struct Application {
    pub state: AppState,
    pub workers: ReconciliationPool,
    pub queue: Arc<BoundedOrderQueue>,
}

impl Application {
    pub async fn shutdown(self, grace: Duration) {
        self.workers.shutdown(grace).await;
        self.queue.close().await;
    }
}

pub async fn initialize_app(config: &Config) -> AppResult<Application> {
    info!("Initializing application components ...");

    // Ledger
    let ledger: Arc<dyn LedgerStore> = if config.uses_database() {
        let pool = initialize_database(&config.database_uri, config.db_max_connections).await?;
        Arc::new(LedgerRepository::new(pool))
    } else {
        warn!("⚠️  DATABASE_URI is empty - using the in-memory ledger, data is lost on exit");
        Arc::new(InMemoryLedger::new())
    };

    // Work queue and accrual client
    let queue = Arc::new(BoundedOrderQueue::new(config.queue_capacity));
    info!("✅ Work queue ready (capacity {})", config.queue_capacity);

    let oracle = Arc::new(HttpAccrualClient::new(
        &config.accrual_system_address,
        Duration::from_secs(config.accrual_timeout_secs),
    )?);
    info!("✅ Accrual client configured for {}", oracle.base_url());

    // Reconciliation workers
    let reconciler = Arc::new(Reconciler::new(
        ledger.clone(),
        oracle,
        queue.clone(),
        config.retry_policy(),
    ));
    let workers = ReconciliationPool::start(reconciler, config.worker_count());

    // Orders interrupted by a restart or dropped as stuck resume here
    let _recovery = spawn_recovery(ledger.clone(), queue.clone());

    // Services
    let jwt = Arc::new(JwtManager::new(JwtConfig::from_secret(
        config.jwt_secret.clone(),
        config.token_ttl_secs,
    )));
    let users = Arc::new(UserService::new(ledger.clone(), jwt.clone(), config.bcrypt_cost));
    let registrar = Arc::new(OrderRegistrar::new(ledger.clone(), queue.clone()));
    let balances = Arc::new(BalanceCalculator::new(ledger));

    let state = AppState {
        registrar,
        balances,
        users,
        jwt,
        queue: queue.clone(),
    };

    info!("✅ Application state initialized");
    Ok(Application {
        state,
        workers,
        queue,
    })
}

async fn initialize_database(database_url: &str, max_connections: u32) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured: {} max connections", max_connections);

    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
