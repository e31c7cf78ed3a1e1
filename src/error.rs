// src/error.rs
use crate::db::DbError;
use thiserror::Error;
use warp::http::StatusCode;
use warp::reject::Reject;

/// Every failure a request can end in. Rendered to the user as an apology.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    InvalidSymbol(String),

    #[error("{0}")]
    InvalidQuantity(String),

    #[error("you don't have enough cash for this buy")]
    InsufficientFunds,

    #[error("you don't own that many shares of {0}")]
    InsufficientHoldings(String),

    #[error("invalid username and/or password")]
    InvalidCredentials,

    #[error("you must log in first")]
    Unauthorized,

    #[error("storage error: {0}")]
    Storage(#[from] DbError),

    #[error("price lookup failed for {0}")]
    PriceLookup(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::InvalidSymbol(_)
            | AppError::InvalidQuantity(_)
            | AppError::InsufficientFunds
            | AppError::InsufficientHoldings(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidCredentials => StatusCode::FORBIDDEN,
            AppError::Unauthorized => StatusCode::SEE_OTHER,
            AppError::PriceLookup(_) => StatusCode::BAD_GATEWAY,
            AppError::Storage(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Reject for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_failures_are_forbidden() {
        assert_eq!(AppError::InvalidCredentials.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::InvalidCredentials.to_string(),
            "invalid username and/or password"
        );
    }

    #[test]
    fn unauthorized_is_a_redirect() {
        assert_eq!(AppError::Unauthorized.status(), StatusCode::SEE_OTHER);
        assert!(!AppError::Unauthorized.status().is_server_error());
    }

    #[test]
    fn storage_failures_are_server_errors() {
        let err = AppError::from(DbError::NotFound);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
