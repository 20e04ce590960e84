use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderNumberError {
    #[error("order number is empty")]
    Empty,

    #[error("order number must contain only digits: {0}")]
    NonDigit(String),

    #[error("order number {0} failed the Luhn check")]
    Checksum(String),
}

/// Order number that passed the Luhn check, stored in canonical form.
///
/// Leading zeros are stripped (a number made only of zeros becomes `"0"`), so
/// `079927398713` and `79927398713` are the same order. The only way to build one from user input is [`OrderNumber::parse`], so every
/// value handed to the registrar or the balance calculator is already well formed.
/// Values read back from storage are decoded transparently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, sqlx::Type)]
#[sqlx(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    pub fn parse(raw: &str) -> Result<Self, OrderNumberError> {
        if raw.is_empty() {
            return Err(OrderNumberError::Empty);
        }
        if !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(OrderNumberError::NonDigit(raw.to_string()));
        }
        // leading zeros never change the Luhn sum
        if !luhn_valid(raw) {
            return Err(OrderNumberError::Checksum(raw.to_string()));
        }
        Ok(Self(canonical_digits(raw).to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn canonical_digits(raw: &str) -> &str {
    let trimmed = raw.trim_start_matches('0');
    if trimmed.is_empty() {
        "0"
    } else {
        trimmed
    }
}

/// Luhn checksum over an ASCII digit string.
///
/// Every second digit from the right is doubled; a doubled value above nine has
/// nine subtracted. The number is valid when the total is a multiple of ten.
pub fn luhn_valid(digits: &str) -> bool {
    let mut sum = 0u32;
    for (i, b) in digits.bytes().rev().enumerate() {
        let mut d = u32::from(b - b'0');
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }
    sum % 10 == 0
}

impl FromStr for OrderNumber {
    type Err = OrderNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for OrderNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}
