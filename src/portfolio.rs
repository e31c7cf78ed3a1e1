// src/portfolio.rs
use crate::db::{self, Database, DbResult};
use crate::error::AppError;
use crate::models::{Holding, Transaction, UserId};
use crate::quote::PriceLookup;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

/// Sums signed shares per symbol. Symbols that net out to zero are kept.
pub fn sum_holdings(transactions: &[Transaction]) -> BTreeMap<String, Decimal> {
    let mut totals = BTreeMap::new();
    for tx in transactions {
        *totals.entry(tx.symbol.clone()).or_insert(Decimal::ZERO) += tx.shares;
    }
    totals
}

/// Non-zero holdings by symbol, named after the latest transaction.
pub fn sum_positions(transactions: &[Transaction]) -> Vec<Holding> {
    let mut positions: BTreeMap<&str, Holding> = BTreeMap::new();
    for tx in transactions {
        let holding = positions.entry(tx.symbol.as_str()).or_insert_with(|| Holding {
            symbol: tx.symbol.clone(),
            name: tx.name.clone(),
            shares: Decimal::ZERO,
        });
        holding.name = tx.name.clone();
        holding.shares += tx.shares;
    }
    positions
        .into_values()
        .filter(|h| !h.shares.is_zero())
        .collect()
}

pub fn holdings_in(conn: &Connection, user_id: UserId) -> DbResult<BTreeMap<String, Decimal>> {
    Ok(sum_holdings(&db::transactions_for(conn, user_id)?))
}

pub async fn holdings(db: &Database, user_id: UserId) -> DbResult<BTreeMap<String, Decimal>> {
    Ok(sum_holdings(&db.transactions_for(user_id).await?))
}

pub async fn positions(db: &Database, user_id: UserId) -> DbResult<Vec<Holding>> {
    Ok(sum_positions(&db.transactions_for(user_id).await?))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricedHolding {
    pub holding: Holding,
    pub price: Decimal,
    pub value: Decimal,
}

/// Prices every position. Fails as a whole if any single lookup fails.
pub async fn value_positions(
    positions: Vec<Holding>,
    prices: &dyn PriceLookup,
) -> Result<Vec<PricedHolding>, AppError> {
    let mut priced = Vec::with_capacity(positions.len());
    for holding in positions {
        let quote = prices
            .lookup(&holding.symbol)
            .await
            .ok_or_else(|| AppError::PriceLookup(holding.symbol.clone()))?;
        let value = quote.price * holding.shares;
        priced.push(PricedHolding {
            holding,
            price: quote.price,
            value,
        });
    }
    Ok(priced)
}

pub async fn portfolio_value(
    db: &Database,
    user_id: UserId,
    prices: &dyn PriceLookup,
) -> Result<Decimal, AppError> {
    let priced = value_positions(positions(db, user_id).await?, prices).await?;
    Ok(priced.iter().map(|p| p.value).sum())
}
