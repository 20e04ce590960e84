use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::OrderNumber;
use crate::error::AppResult;
use crate::ledger::{LedgerError, LedgerStore, Order};
use crate::reconciliation::{OrderQueue, ReconcileJob};

/// Outcome of an order submission. Ownership conflicts are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Accepted(Order),
    AlreadyOwnedBySameUser,
    OwnedByOtherUser,
}

/// Deduplicates submissions against the ledger and feeds fresh orders to the
/// reconciliation queue.
pub struct OrderRegistrar {
    ledger: Arc<dyn LedgerStore>,
    queue: Arc<dyn OrderQueue>,
}

impl OrderRegistrar {
    pub fn new(ledger: Arc<dyn LedgerStore>, queue: Arc<dyn OrderQueue>) -> Self {
        Self { ledger, queue }
    }

    pub async fn register_order(
        &self,
        number: &OrderNumber,
        user_id: Uuid,
    ) -> AppResult<Registration> {
        if let Some(owner) = self.ledger.owner_of_order(number).await? {
            return Ok(ownership(owner, user_id));
        }

        let order = match self.ledger.insert_order(number, user_id).await {
            Ok(order) => order,
            // lost a race with a concurrent submission of the same number
            Err(LedgerError::Duplicate(_)) => {
                return match self.ledger.owner_of_order(number).await? {
                    Some(owner) => Ok(ownership(owner, user_id)),
                    None => Err(LedgerError::NotFound(number.to_string()).into()),
                };
            }
            Err(e) => return Err(e.into()),
        };

        info!(order = %number, user_id = %user_id, "order registered");

        // The insert is durable; if the queue refuses the job the order stays NEW
        // and startup recovery picks it up.
        if let Err(e) = self.queue.push(ReconcileJob::new(number.clone())).await {
            warn!(order = %number, error = %e, "could not enqueue order for reconciliation");
        }

        Ok(Registration::Accepted(order))
    }

    /// Oldest upload first; empty when the user has no orders
    pub async fn orders_for_user(&self, user_id: Uuid) -> AppResult<Vec<Order>> {
        Ok(self.ledger.list_orders_for_user(user_id).await?)
    }
}

fn ownership(owner: Uuid, user_id: Uuid) -> Registration {
    if owner == user_id {
        Registration::AlreadyOwnedBySameUser
    } else {
        Registration::OwnedByOtherUser
    }
}
