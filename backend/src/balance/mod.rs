pub mod calculator;

pub use calculator::{BalanceCalculator, WithdrawOutcome};
