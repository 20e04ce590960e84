pub mod client;

pub use client::{AccrualError, AccrualOracle, AccrualReport, HttpAccrualClient};
