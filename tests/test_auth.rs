use rust_decimal::Decimal;
use std::time::Duration;
use stock_trader::auth::{Accounts, SessionKeys};
use stock_trader::models::{LoginForm, RegisterForm};
use stock_trader::{AppError, Database};

const ROUNDS: u32 = 1_000;

async fn accounts() -> (Database, Accounts) {
    let db = Database::new_in_memory().await.expect("in-memory database");
    let sessions = SessionKeys::new("test-secret", Duration::from_secs(60));
    let accounts = Accounts::new(db.clone(), sessions, Decimal::new(10_000, 0), ROUNDS);
    (db, accounts)
}

fn register_form(username: &str, password: &str, confirmation: &str) -> RegisterForm {
    RegisterForm {
        username: username.to_string(),
        password: password.to_string(),
        confirmation: confirmation.to_string(),
    }
}

fn login_form(username: &str, password: &str) -> LoginForm {
    LoginForm {
        username: username.to_string(),
        password: password.to_string(),
    }
}

#[tokio::test]
async fn registration_starts_with_default_cash_and_can_log_in() {
    let (db, accounts) = accounts().await;
    let user = accounts.register(&register_form("alice", "pw", "pw")).await.unwrap();

    assert_eq!(db.cash(user).await.unwrap(), Decimal::new(10_000, 0));
    let stored = db.find_user("alice").await.unwrap().unwrap();
    assert_ne!(stored.hash, "pw");

    assert_eq!(accounts.login(&login_form("alice", "pw")).await.unwrap(), user);
}

#[tokio::test]
async fn duplicate_username_is_a_validation_error() {
    let (db, accounts) = accounts().await;
    let first = accounts.register(&register_form("bob", "one", "one")).await.unwrap();
    db.update_cash(first, Decimal::new(1234, 0)).await.unwrap();

    let err = accounts.register(&register_form("bob", "two", "two")).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    assert_eq!(accounts.login(&login_form("bob", "one")).await.unwrap(), first);
    assert!(accounts.login(&login_form("bob", "two")).await.is_err());
    assert_eq!(db.cash(first).await.unwrap(), Decimal::new(1234, 0));
}

#[tokio::test]
async fn incomplete_registrations_are_rejected() {
    let (db, accounts) = accounts().await;
    let cases = [
        register_form("", "pw", "pw"),
        register_form("   ", "pw", "pw"),
        register_form("carol", "", ""),
        register_form("carol", "pw", ""),
        register_form("carol", "pw", "wp"),
    ];
    for form in &cases {
        let err = accounts.register(form).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)), "accepted {:?}", form);
    }
    assert!(db.find_user("carol").await.unwrap().is_none());
}

#[tokio::test]
async fn bad_logins_are_indistinguishable() {
    let (_db, accounts) = accounts().await;
    accounts.register(&register_form("dave", "right", "right")).await.unwrap();

    let wrong_password = accounts.login(&login_form("dave", "wrong")).await.unwrap_err();
    let unknown_user = accounts.login(&login_form("nobody", "right")).await.unwrap_err();

    assert!(matches!(wrong_password, AppError::InvalidCredentials));
    assert!(matches!(unknown_user, AppError::InvalidCredentials));
    assert_eq!(wrong_password.to_string(), unknown_user.to_string());
    assert_eq!(wrong_password.status(), unknown_user.status());
}

#[tokio::test]
async fn empty_login_fields_are_validation_errors() {
    let (_db, accounts) = accounts().await;
    for form in [login_form("", "pw"), login_form("erin", "")] {
        let err = accounts.login(&form).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}

#[tokio::test]
async fn expired_sessions_are_rejected() {
    let keys = SessionKeys::new("test-secret", Duration::from_secs(0));
    let token = keys.issue(1).unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(matches!(keys.verify(&token), Err(AppError::Unauthorized)));
}
