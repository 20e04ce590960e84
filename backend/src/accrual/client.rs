use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::ledger::OrderStatus;
use crate::orders::OrderNumber;

/// Used when a 429 arrives without a usable `Retry-After` header
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Every variant means "try again later" to the reconciliation workers
#[derive(Debug, Error)]
pub enum AccrualError {
    #[error("accrual service unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("accrual service rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("accrual service answered with status {0}")]
    Unexpected(u16),

    #[error("malformed accrual response: {0}")]
    Decode(String),
}

/// Latest known state of one order in the accrual service
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccrualReport {
    pub order: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub accrual: Option<Decimal>,
}

impl AccrualReport {
    /// Rejects answers that cannot be recorded for `expected`: a report about a
    /// different order, or a negative accrual.
    pub fn verified_for(self, expected: &OrderNumber) -> Result<Self, AccrualError> {
        match OrderNumber::parse(self.order.trim()) {
            Ok(reported) if &reported == expected => {}
            _ => {
                return Err(AccrualError::Decode(format!(
                    "report for order {:?} does not match {}",
                    self.order, expected
                )))
            }
        }

        if let Some(accrual) = self.accrual.filter(|a| a.is_sign_negative() && !a.is_zero()) {
            return Err(AccrualError::Decode(format!(
                "negative accrual {} for order {}",
                accrual, expected
            )));
        }

        Ok(self)
    }

    /// Amount to record in the ledger. Only PROCESSED orders carry one.
    pub fn settled_amount(&self) -> Decimal {
        match self.status {
            OrderStatus::Processed => self.accrual.unwrap_or(Decimal::ZERO),
            _ => Decimal::ZERO,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccrualOracle: Send + Sync {
    async fn get_accrual(&self, order: &OrderNumber) -> Result<AccrualReport, AccrualError>;
}

/// HTTP client for `GET {base}/api/orders/{number}`
pub struct HttpAccrualClient {
    client: Client,
    base_url: String,
}

impl HttpAccrualClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AccrualError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: normalize_base_url(base_url),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Accepts `host:port` as well as a full URL, drops trailing slashes
fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

fn parse_retry_after(value: Option<&str>) -> Duration {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

#[async_trait]
impl AccrualOracle for HttpAccrualClient {
    async fn get_accrual(&self, order: &OrderNumber) -> Result<AccrualReport, AccrualError> {
        let url = format!("{}/api/orders/{}", self.base_url, order);
        let response = self.client.get(&url).send().await?;

        match response.status() {
            StatusCode::OK => {
                let body = response.bytes().await?;
                let report: AccrualReport = serde_json::from_slice(&body)
                    .map_err(|e| AccrualError::Decode(e.to_string()))?;
                debug!(order = %order, status = %report.status, "accrual report received");
                Ok(report)
            }
            // not yet known to the accrual service
            StatusCode::NO_CONTENT => Ok(AccrualReport {
                order: order.to_string(),
                status: OrderStatus::New,
                accrual: None,
            }),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = parse_retry_after(
                    response
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok()),
                );
                Err(AccrualError::RateLimited { retry_after })
            }
            other => Err(AccrualError::Unexpected(other.as_u16())),
        }
    }
}
