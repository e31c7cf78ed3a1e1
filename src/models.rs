// src/models.rs
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

pub type UserId = i64;

#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub hash: String,
    pub cash: Decimal,
}

/// One immutable ledger row. Positive shares are buys, negative are sells.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub id: i64,
    pub user_id: UserId,
    pub date: DateTime<Utc>,
    pub symbol: String,
    pub name: String,
    pub shares: Decimal,
    pub price: Decimal,
}

/// A ledger row that has not been written yet.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub symbol: String,
    pub name: String,
    pub shares: Decimal,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Holding {
    pub symbol: String,
    pub name: String,
    pub shares: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub name: String,
    pub symbol: String,
    pub price: Decimal,
}

#[derive(Debug, Default, Deserialize)]
pub struct TradeForm {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub shares: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct QuoteForm {
    #[serde(default)]
    pub symbol: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirmation: String,
}

/// Formats an amount as US dollars, e.g. `$1,234.56`.
pub fn usd(amount: Decimal) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };
    let text = format!("{:.2}", rounded.abs());
    let (whole, cents) = text.split_once('.').unwrap_or((&text, "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    format!("{}${}.{}", sign, grouped, cents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn usd_groups_thousands() {
        assert_eq!(usd(dec("10000")), "$10,000.00");
        assert_eq!(usd(dec("1234567.891")), "$1,234,567.89");
        assert_eq!(usd(dec("999.995")), "$1,000.00");
    }

    #[test]
    fn usd_small_and_negative_amounts() {
        assert_eq!(usd(dec("0")), "$0.00");
        assert_eq!(usd(dec("0.5")), "$0.50");
        assert_eq!(usd(dec("-42.1")), "-$42.10");
    }
}
