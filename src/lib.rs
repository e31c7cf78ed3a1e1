// src/lib.rs
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod portfolio;
pub mod quote;
pub mod trade;

pub use api::{routes, AppState};
pub use config::Config;
pub use db::Database;
pub use error::AppError;
