// src/quote.rs
use crate::models::Quote;
use async_trait::async_trait;
use log::{error, warn};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// Current-price source. Symbols are case-insensitive; any failure, unknown
/// symbol or transport error alike, comes back as `None`.
#[async_trait]
pub trait PriceLookup: Send + Sync {
    async fn lookup(&self, symbol: &str) -> Option<Quote>;
}

#[derive(Deserialize)]
struct GlobalQuoteData {
    #[serde(rename = "01. symbol", default)]
    symbol: String,
    #[serde(rename = "05. price", default)]
    price: String,
}

#[derive(Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    global_quote: Option<GlobalQuoteData>,
}

#[derive(Deserialize)]
struct SearchMatch {
    #[serde(rename = "1. symbol")]
    symbol: String,
    #[serde(rename = "2. name")]
    name: String,
}

#[derive(Deserialize)]
struct SymbolSearchResponse {
    #[serde(rename = "bestMatches", default)]
    best_matches: Vec<SearchMatch>,
}

pub struct AlphaVantage {
    client: Client,
    base_url: String,
    api_key: String,
}

impl AlphaVantage {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(AlphaVantage {
            client,
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn global_quote(&self, symbol: &str) -> Result<GlobalQuoteResponse, reqwest::Error> {
        self.client
            .get(&self.base_url)
            .query(&[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", symbol),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<GlobalQuoteResponse>()
            .await
    }

    async fn company_name(&self, symbol: &str) -> Option<String> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("function", "SYMBOL_SEARCH"),
                ("keywords", symbol),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match response {
            Ok(response) => match response.json::<SymbolSearchResponse>().await {
                Ok(search) => best_name(search, symbol),
                Err(e) => {
                    warn!("Failed to parse symbol search for {}: {}", symbol, e);
                    None
                }
            },
            Err(e) => {
                warn!("Symbol search failed for {}: {}", symbol, e);
                None
            }
        }
    }
}

fn best_name(search: SymbolSearchResponse, symbol: &str) -> Option<String> {
    search
        .best_matches
        .into_iter()
        .find(|m| m.symbol.eq_ignore_ascii_case(symbol))
        .map(|m| m.name)
}

fn parse_price(data: &GlobalQuoteData) -> Option<Decimal> {
    let price = Decimal::from_str(data.price.trim()).ok()?;
    if price > Decimal::ZERO {
        Some(price)
    } else {
        None
    }
}

#[async_trait]
impl PriceLookup for AlphaVantage {
    async fn lookup(&self, symbol: &str) -> Option<Quote> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return None;
        }

        let data = match self.global_quote(&symbol).await {
            Ok(GlobalQuoteResponse {
                global_quote: Some(data),
            }) if !data.symbol.is_empty() => data,
            Ok(_) => return None,
            Err(e) => {
                error!("Quote request for {} failed: {}", symbol, e);
                return None;
            }
        };
        let price = parse_price(&data)?;
        let name = self
            .company_name(&data.symbol)
            .await
            .unwrap_or_else(|| data.symbol.clone());

        Some(Quote {
            name,
            symbol: data.symbol,
            price,
        })
    }
}

/// Fixed price table held in memory. Prices can be changed or removed while
/// the table is shared.
#[derive(Default)]
pub struct StaticPrices {
    quotes: RwLock<HashMap<String, Quote>>,
}

impl StaticPrices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, symbol: &str, name: &str, price: Decimal) {
        let symbol = symbol.to_uppercase();
        let quote = Quote {
            name: name.to_string(),
            symbol: symbol.clone(),
            price,
        };
        self.quotes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(symbol, quote);
    }

    pub fn remove(&self, symbol: &str) {
        self.quotes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&symbol.to_uppercase());
    }
}

#[async_trait]
impl PriceLookup for StaticPrices {
    async fn lookup(&self, symbol: &str) -> Option<Quote> {
        let quotes = self.quotes.read().unwrap_or_else(PoisonError::into_inner);
        quotes.get(&symbol.trim().to_uppercase()).cloned()
    }
}
