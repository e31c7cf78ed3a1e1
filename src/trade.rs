// src/trade.rs
use crate::db::{self, Database};
use crate::error::AppError;
use crate::models::{NewTransaction, TradeForm, Transaction, UserId};
use crate::portfolio::holdings_in;
use crate::quote::PriceLookup;
use log::info;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Smallest number of shares a single order may carry.
pub const MIN_SHARES: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

/// A validated, strictly positive share count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantity(Decimal);

impl Quantity {
    pub fn parse(input: &str) -> Result<Self, AppError> {
        let shares = Decimal::from_str(input.trim())
            .map_err(|_| AppError::InvalidQuantity("the number of shares must be numeric".into()))?;
        if shares < MIN_SHARES {
            return Err(AppError::InvalidQuantity(
                "the number of shares must be positive".into(),
            ));
        }
        let shares = shares.normalize();
        if shares.scale() > MIN_SHARES.scale() {
            return Err(AppError::InvalidQuantity(format!(
                "shares can have at most {} decimal places",
                MIN_SHARES.scale()
            )));
        }
        Ok(Quantity(shares))
    }

    pub fn value(self) -> Decimal {
        self.0
    }
}

/// Validates a buy or sell order and records it. The cash read, holdings
/// check, ledger append and cash update share one SQL transaction.
pub async fn execute(
    db: &Database,
    prices: &dyn PriceLookup,
    user_id: UserId,
    side: Side,
    form: &TradeForm,
) -> Result<Transaction, AppError> {
    let symbol = form.symbol.trim();
    if symbol.is_empty() {
        return Err(AppError::InvalidSymbol("you need to provide a symbol".into()));
    }
    let quote = prices
        .lookup(symbol)
        .await
        .ok_or_else(|| AppError::InvalidSymbol(format!("symbol doesn't exist: {}", symbol)))?;

    let shares = Quantity::parse(&form.shares)?.value();
    let total = shares
        .checked_mul(quote.price)
        .ok_or_else(|| AppError::InvalidQuantity("the number of shares is too large".into()))?;

    let transaction = db
        .transaction(|conn| {
            let cash = db::cash(conn, user_id)?;
            let (new_cash, signed_shares) = match side {
                Side::Buy => {
                    if cash > total {
                        (cash - total, shares)
                    } else {
                        return Err(AppError::InsufficientFunds);
                    }
                }
                Side::Sell => {
                    let held = holdings_in(conn, user_id)?
                        .get(&quote.symbol)
                        .copied()
                        .unwrap_or(Decimal::ZERO);
                    if held >= shares {
                        (cash + total, -shares)
                    } else {
                        return Err(AppError::InsufficientHoldings(quote.symbol.clone()));
                    }
                }
            };

            let entry = NewTransaction {
                user_id,
                symbol: quote.symbol.clone(),
                name: quote.name.clone(),
                shares: signed_shares,
                price: quote.price,
            };
            let transaction = db::append(conn, &entry)?;
            db::update_cash(conn, user_id, new_cash)?;
            Ok(transaction)
        })
        .await?;

    info!(
        "User {} {} {} {} at {}",
        user_id,
        match side {
            Side::Buy => "bought",
            Side::Sell => "sold",
        },
        shares,
        transaction.symbol,
        transaction.price
    );
    Ok(transaction)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_accepts_fractional_shares() {
        assert_eq!(Quantity::parse("0.01").unwrap().value(), MIN_SHARES);
        assert_eq!(Quantity::parse(" 12 ").unwrap().value(), Decimal::from(12));
        assert_eq!(Quantity::parse("1.500").unwrap().value(), Decimal::new(15, 1));
    }

    #[test]
    fn quantity_rejects_bad_input() {
        for input in ["", "abc", "1,5", "0", "0.009", "-3", "1.005", "3.14159265358979323846"] {
            assert!(
                matches!(Quantity::parse(input), Err(AppError::InvalidQuantity(_))),
                "accepted {:?}",
                input
            );
        }
    }
}
