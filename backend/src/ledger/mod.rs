pub mod memory;
pub mod models;
pub mod repository;
pub mod store;

pub use memory::InMemoryLedger;
pub use models::{Balance, Order, OrderStatus, User, Withdrawal};
pub use repository::LedgerRepository;
pub use store::{LedgerError, LedgerResult, LedgerStore};
