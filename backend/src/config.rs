use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::reconciliation::{RetryPolicy, DEFAULT_QUEUE_CAPACITY};

/// Command-line flags. A set environment variable wins over the flag.
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "gophermart", about = "Loyalty points accrual service")]
pub struct Cli {
    /// HTTP listen address (RUN_ADDRESS)
    #[arg(short = 'a', long = "address")]
    pub run_address: Option<String>,

    /// PostgreSQL connection string, empty for the in-memory ledger (DATABASE_URI)
    #[arg(short = 'd', long = "database")]
    pub database_uri: Option<String>,

    /// Accrual service address (ACCRUAL_SYSTEM_ADDRESS)
    #[arg(short = 'r', long = "accrual")]
    pub accrual_system_address: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub run_address: String,
    pub database_uri: String,
    #[serde(default)]
    pub accrual_system_address: String,
    #[serde(default)]
    pub jwt_secret: Option<String>,
    pub token_ttl_secs: i64,
    pub bcrypt_cost: u32,
    #[serde(default)]
    pub worker_count: Option<usize>,
    pub queue_capacity: usize,
    pub db_max_connections: u32,
    pub accrual_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
    /// Comma separated; empty allows any origin
    #[serde(default)]
    pub cors_allowed_origins: String,
    pub retry_max_attempts: u32,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_multiplier: f64,
    pub retry_jitter: f64,
}

impl Config {
    pub fn load(cli: &Cli) -> AppResult<Self> {
        Self::load_from(cli, None)
    }

    /// `env` replaces the process environment when given
    pub fn load_from(cli: &Cli, env: Option<HashMap<String, String>>) -> AppResult<Self> {
        let retry = RetryPolicy::default();

        let mut builder = config::Config::builder()
            .set_default("run_address", "localhost:8080")?
            .set_default("database_uri", "postgresql://localhost:5432/postgres")?
            .set_default("token_ttl_secs", 86_400_i64)?
            .set_default("bcrypt_cost", i64::from(bcrypt::DEFAULT_COST))?
            .set_default("queue_capacity", DEFAULT_QUEUE_CAPACITY as i64)?
            .set_default("db_max_connections", 10_i64)?
            .set_default("accrual_timeout_secs", 10_i64)?
            .set_default("request_timeout_secs", 30_i64)?
            .set_default("shutdown_grace_secs", 10_i64)?
            .set_default("retry_max_attempts", i64::from(retry.max_attempts))?
            .set_default("retry_initial_delay_ms", retry.initial_delay.as_millis() as i64)?
            .set_default("retry_max_delay_ms", retry.max_delay.as_millis() as i64)?
            .set_default("retry_multiplier", retry.multiplier)?
            .set_default("retry_jitter", retry.jitter)?;

        // flags sit between the defaults and the environment
        if let Some(address) = &cli.run_address {
            builder = builder.set_default("run_address", address.as_str())?;
        }
        if let Some(uri) = &cli.database_uri {
            builder = builder.set_default("database_uri", uri.as_str())?;
        }
        if let Some(address) = &cli.accrual_system_address {
            builder = builder.set_default("accrual_system_address", address.as_str())?;
        }

        let config: Config = builder
            .add_source(config::Environment::default().try_parsing(true).source(env))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        if self.accrual_system_address.trim().is_empty() {
            return Err(AppError::Config(
                "accrual system address is required (-r or ACCRUAL_SYSTEM_ADDRESS)".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(AppError::Config("QUEUE_CAPACITY must be positive".to_string()));
        }
        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err(AppError::Config("BCRYPT_COST must be between 4 and 31".to_string()));
        }
        Ok(())
    }

    /// In-memory ledger when no database is configured
    pub fn uses_database(&self) -> bool {
        !self.database_uri.trim().is_empty()
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count.filter(|n| *n > 0).unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            multiplier: self.retry_multiplier,
            jitter: self.retry_jitter,
        }
    }

    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }
}
