// src/main.rs
use env_logger::Builder;
use log::{error, info, LevelFilter};
use std::sync::Arc;
use stock_trader::auth::{Accounts, SessionKeys};
use stock_trader::quote::AlphaVantage;
use stock_trader::{api, AppState, Config, Database};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    let db = match Database::open(&config.database_path).await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return;
        }
    };
    info!("Connected to database...");

    let prices = match AlphaVantage::new(
        &config.alphavantage_url,
        &config.alphavantage_api_key,
        config.quote_timeout,
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to build quote client: {}", e);
            return;
        }
    };

    let sessions = SessionKeys::new(&config.session_secret, config.session_ttl);
    let accounts = Accounts::new(
        db.clone(),
        sessions,
        config.initial_cash,
        config.password_rounds,
    );
    let state = AppState::new(db, prices, accounts);

    info!("Starting the stock trader application...");
    let (addr, server) = match warp::serve(api::routes(state)).try_bind_with_graceful_shutdown(
        config.bind_addr,
        async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
        },
    ) {
        Ok(bound) => bound,
        Err(e) => {
            error!("Failed to bind {}: {}", config.bind_addr, e);
            return;
        }
    };

    info!("Server running on http://{}", addr);
    server.await;
}
