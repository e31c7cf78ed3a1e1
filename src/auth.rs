// src/auth.rs
use crate::db::{Database, DbError};
use crate::error::AppError;
use crate::models::{LoginForm, RegisterForm, UserId};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::{info, warn};
use pbkdf2::pbkdf2_hmac;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const SESSION_COOKIE: &str = "session";

const HASH_METHOD: &str = "pbkdf2:sha256";
const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
}

/// The authenticated user a request acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionUser {
    pub user_id: UserId,
}

/// Signs and checks session tokens.
#[derive(Clone)]
pub struct SessionKeys {
    secret: Arc<Vec<u8>>,
    ttl: Duration,
}

impl SessionKeys {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        SessionKeys {
            secret: Arc::new(secret.as_bytes().to_vec()),
            ttl,
        }
    }

    pub fn issue(&self, user_id: UserId) -> Result<String, AppError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AppError::Internal(e.to_string()))?;
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (now + self.ttl).as_secs() as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|e| AppError::Internal(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<SessionUser, AppError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(&self.secret),
            &Validation::default(),
        )
        .map_err(|_| AppError::Unauthorized)?;
        let user_id = data
            .claims
            .sub
            .parse::<UserId>()
            .map_err(|_| AppError::Unauthorized)?;
        Ok(SessionUser { user_id })
    }

    pub fn cookie(&self, token: &str) -> String {
        format!(
            "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
            SESSION_COOKIE,
            token,
            self.ttl.as_secs()
        )
    }

    pub fn clear_cookie() -> String {
        format!("{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0", SESSION_COOKIE)
    }
}

fn derive_key(password: &str, salt: &str, rounds: u32) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), rounds, &mut key);
    key
}

/// Hashes as `pbkdf2:sha256:<rounds>$<salt>$<hex digest>`.
pub fn hash_password(password: &str, rounds: u32) -> String {
    let salt: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SALT_LEN)
        .map(char::from)
        .collect();
    let key = derive_key(password, &salt, rounds);
    format!("{}:{}${}${}", HASH_METHOD, rounds, salt, hex::encode(key))
}

pub fn verify_password(stored: &str, password: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let (Some(method), Some(salt), Some(digest)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    let Some(rounds) = method
        .strip_prefix(HASH_METHOD)
        .and_then(|r| r.strip_prefix(':'))
        .and_then(|r| r.parse::<u32>().ok())
    else {
        return false;
    };
    let Ok(expected) = hex::decode(digest) else {
        return false;
    };

    let actual = derive_key(password, salt, rounds);
    expected.len() == actual.len()
        && expected
            .iter()
            .zip(actual.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Registration and login against the user table.
#[derive(Clone)]
pub struct Accounts {
    db: Database,
    sessions: SessionKeys,
    initial_cash: Decimal,
    password_rounds: u32,
}

impl Accounts {
    pub fn new(db: Database, sessions: SessionKeys, initial_cash: Decimal, password_rounds: u32) -> Self {
        Accounts {
            db,
            sessions,
            initial_cash,
            password_rounds,
        }
    }

    pub fn sessions(&self) -> &SessionKeys {
        &self.sessions
    }

    pub async fn register(&self, form: &RegisterForm) -> Result<UserId, AppError> {
        let username = form.username.trim();
        if username.is_empty() {
            return Err(AppError::Validation("must choose a username".into()));
        }
        if form.password.is_empty() {
            return Err(AppError::Validation("must choose a password".into()));
        }
        if form.confirmation.is_empty() {
            return Err(AppError::Validation("please confirm your password".into()));
        }
        if form.password != form.confirmation {
            return Err(AppError::Validation("your passwords don't match".into()));
        }

        let hash = hash_password(&form.password, self.password_rounds);
        match self.db.create_user(username, &hash, self.initial_cash).await {
            Ok(user_id) => {
                info!("Registered user {} ({})", username, user_id);
                Ok(user_id)
            }
            Err(DbError::UsernameTaken(_)) => Err(AppError::Validation(
                "that username already exists, choose another one".into(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Unknown usernames still pay for one hash so both failures cost the same.
    pub async fn login(&self, form: &LoginForm) -> Result<UserId, AppError> {
        let username = form.username.trim();
        if username.is_empty() {
            return Err(AppError::Validation("must provide username".into()));
        }
        if form.password.is_empty() {
            return Err(AppError::Validation("must provide password".into()));
        }

        match self.db.find_user(username).await? {
            Some(user) if verify_password(&user.hash, &form.password) => {
                info!("User {} logged in", user.id);
                Ok(user.id)
            }
            Some(_) => {
                warn!("Failed login for {}", username);
                Err(AppError::InvalidCredentials)
            }
            None => {
                std::hint::black_box(derive_key(&form.password, "", self.password_rounds));
                warn!("Failed login for {}", username);
                Err(AppError::InvalidCredentials)
            }
        }
    }
}
