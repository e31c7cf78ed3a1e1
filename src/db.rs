// src/db.rs
//! SQLite-backed ledger store. The free functions take a borrowed connection so
//! several of them can run inside one SQL transaction; `Database` wraps them
//! for callers that only need a single statement.

use crate::models::{NewTransaction, Transaction, User, UserId};
use chrono::Utc;
use log::{error, info};
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("username already exists: {0}")]
    UsernameTaken(String),

    #[error("record not found")]
    NotFound,
}

pub type DbResult<T> = std::result::Result<T, DbError>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    username  TEXT NOT NULL UNIQUE,
    hash      TEXT NOT NULL,
    cash      TEXT NOT NULL             -- exact decimal
);

CREATE TABLE IF NOT EXISTS transactions (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    date      TEXT NOT NULL,            -- UTC
    name      TEXT NOT NULL,
    symbol    TEXT NOT NULL,
    shares    TEXT NOT NULL,            -- signed: +buy / -sell
    price     TEXT NOT NULL,
    user_id   INTEGER NOT NULL REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_transactions_user ON transactions(user_id);
"#;

fn apply_schema(conn: &Connection) -> DbResult<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

#[derive(Clone)]
pub struct Database {
    connection: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Database {
    pub async fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        info!("Opening database at {:?}", path);
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        if let Err(e) = apply_schema(&conn) {
            error!("Failed to create schema: {}", e);
            return Err(e);
        }

        info!("Database ready.");
        Ok(Database {
            connection: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub async fn new_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Database {
            connection: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn with_connection<F, R, E>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&Connection) -> Result<R, E> + Send,
        R: Send,
    {
        let conn = self.connection.lock().await;
        f(&*conn)
    }

    /// Runs `f` inside a SQL transaction. Commits only if `f` succeeds.
    pub async fn transaction<F, R, E>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&Connection) -> Result<R, E> + Send,
        R: Send,
        E: From<DbError>,
    {
        let mut conn = self.connection.lock().await;
        let tx = conn.transaction().map_err(DbError::from)?;
        let result = f(&*tx)?;
        tx.commit().map_err(DbError::from)?;
        Ok(result)
    }

    pub async fn create_user(&self, username: &str, hash: &str, cash: Decimal) -> DbResult<UserId> {
        self.with_connection(|conn| create_user(conn, username, hash, cash))
            .await
    }

    pub async fn find_user(&self, username: &str) -> DbResult<Option<User>> {
        self.with_connection(|conn| find_user(conn, username)).await
    }

    pub async fn cash(&self, user_id: UserId) -> DbResult<Decimal> {
        self.with_connection(|conn| cash(conn, user_id)).await
    }

    pub async fn append(&self, entry: &NewTransaction) -> DbResult<Transaction> {
        self.with_connection(|conn| append(conn, entry)).await
    }

    pub async fn update_cash(&self, user_id: UserId, new_cash: Decimal) -> DbResult<()> {
        self.with_connection(|conn| update_cash(conn, user_id, new_cash))
            .await
    }

    pub async fn transactions_for(&self, user_id: UserId) -> DbResult<Vec<Transaction>> {
        self.with_connection(|conn| transactions_for(conn, user_id))
            .await
    }
}

fn decimal_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub fn create_user(conn: &Connection, username: &str, hash: &str, cash: Decimal) -> DbResult<UserId> {
    let inserted = conn.execute(
        "INSERT INTO users (username, hash, cash) VALUES (?1, ?2, ?3)",
        params![username, hash, cash.to_string()],
    );
    match inserted {
        Ok(_) => Ok(conn.last_insert_rowid()),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            Err(DbError::UsernameTaken(username.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn find_user(conn: &Connection, username: &str) -> DbResult<Option<User>> {
    let user = conn
        .query_row(
            "SELECT id, username, hash, cash FROM users WHERE username = ?1",
            params![username],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    hash: row.get(2)?,
                    cash: decimal_column(row, 3)?,
                })
            },
        )
        .optional()?;
    Ok(user)
}

pub fn cash(conn: &Connection, user_id: UserId) -> DbResult<Decimal> {
    conn.query_row(
        "SELECT cash FROM users WHERE id = ?1",
        params![user_id],
        |row| decimal_column(row, 0),
    )
    .optional()?
    .ok_or(DbError::NotFound)
}

/// Inserts one ledger row stamped with the current time.
pub fn append(conn: &Connection, entry: &NewTransaction) -> DbResult<Transaction> {
    let date = Utc::now();
    conn.execute(
        "INSERT INTO transactions (date, name, symbol, shares, price, user_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            date,
            entry.name,
            entry.symbol,
            entry.shares.to_string(),
            entry.price.to_string(),
            entry.user_id
        ],
    )?;

    Ok(Transaction {
        id: conn.last_insert_rowid(),
        user_id: entry.user_id,
        date,
        symbol: entry.symbol.clone(),
        name: entry.name.clone(),
        shares: entry.shares,
        price: entry.price,
    })
}

pub fn update_cash(conn: &Connection, user_id: UserId, new_cash: Decimal) -> DbResult<()> {
    let updated = conn.execute(
        "UPDATE users SET cash = ?1 WHERE id = ?2",
        params![new_cash.to_string(), user_id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

pub fn transactions_for(conn: &Connection, user_id: UserId) -> DbResult<Vec<Transaction>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, date, symbol, name, shares, price
         FROM transactions WHERE user_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![user_id], |row| {
        Ok(Transaction {
            id: row.get(0)?,
            user_id: row.get(1)?,
            date: row.get(2)?,
            symbol: row.get(3)?,
            name: row.get(4)?,
            shares: decimal_column(row, 5)?,
            price: decimal_column(row, 6)?,
        })
    })?;

    let mut transactions = Vec::new();
    for row in rows {
        transactions.push(row?);
    }
    Ok(transactions)
}
