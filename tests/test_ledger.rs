use rust_decimal::Decimal;
use std::str::FromStr;
use stock_trader::db::DbError;
use stock_trader::models::NewTransaction;
use stock_trader::portfolio;
use stock_trader::Database;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn entry(user_id: i64, symbol: &str, shares: &str, price: &str) -> NewTransaction {
    NewTransaction {
        user_id,
        symbol: symbol.to_string(),
        name: format!("{} Corp", symbol),
        shares: dec(shares),
        price: dec(price),
    }
}

#[tokio::test]
async fn transactions_come_back_in_insertion_order() {
    let db = Database::new_in_memory().await.expect("in-memory database");
    let user = db.create_user("alice", "hash", dec("10000.00")).await.unwrap();

    db.append(&entry(user, "BBB", "2", "10")).await.unwrap();
    db.append(&entry(user, "AAA", "1.5", "20.25")).await.unwrap();
    db.append(&entry(user, "BBB", "-1", "11")).await.unwrap();

    let txs = db.transactions_for(user).await.unwrap();
    let symbols: Vec<&str> = txs.iter().map(|t| t.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["BBB", "AAA", "BBB"]);
    assert_eq!(txs[1].shares, dec("1.5"));
    assert_eq!(txs[1].price, dec("20.25"));
    assert_eq!(txs[2].shares, dec("-1"));
    assert!(txs.windows(2).all(|w| w[0].id < w[1].id));
}

#[tokio::test]
async fn ledger_is_scoped_per_user() {
    let db = Database::new_in_memory().await.unwrap();
    let alice = db.create_user("alice", "h", dec("100")).await.unwrap();
    let bob = db.create_user("bob", "h", dec("100")).await.unwrap();

    db.append(&entry(alice, "AAA", "3", "1")).await.unwrap();
    db.append(&entry(bob, "AAA", "7", "1")).await.unwrap();

    let alice_holdings = portfolio::holdings(&db, alice).await.unwrap();
    assert_eq!(alice_holdings.get("AAA"), Some(&dec("3")));
    assert_eq!(db.transactions_for(bob).await.unwrap().len(), 1);
}

#[tokio::test]
async fn zero_holdings_are_still_reported() {
    let db = Database::new_in_memory().await.unwrap();
    let user = db.create_user("carol", "h", dec("100")).await.unwrap();

    db.append(&entry(user, "AAA", "4", "1")).await.unwrap();
    db.append(&entry(user, "AAA", "-4", "1")).await.unwrap();

    let holdings = portfolio::holdings(&db, user).await.unwrap();
    assert_eq!(holdings.get("AAA"), Some(&Decimal::ZERO));
    assert!(portfolio::positions(&db, user).await.unwrap().is_empty());
}

#[tokio::test]
async fn cash_updates_are_exact() {
    let db = Database::new_in_memory().await.unwrap();
    let user = db.create_user("dave", "h", dec("10000.00")).await.unwrap();

    db.update_cash(user, dec("9740.123456")).await.unwrap();
    assert_eq!(db.cash(user).await.unwrap(), dec("9740.123456"));
}

#[tokio::test]
async fn writes_for_unknown_users_fail() {
    let db = Database::new_in_memory().await.unwrap();

    let err = db.update_cash(999, dec("1")).await.unwrap_err();
    assert!(matches!(err, DbError::NotFound));

    let err = db.append(&entry(999, "AAA", "1", "1")).await.unwrap_err();
    assert!(matches!(err, DbError::Sqlite(_)));
    assert!(db.transactions_for(999).await.unwrap().is_empty());

    assert!(matches!(db.cash(999).await, Err(DbError::NotFound)));
}

#[tokio::test]
async fn usernames_are_unique() {
    let db = Database::new_in_memory().await.unwrap();
    db.create_user("erin", "first", dec("10")).await.unwrap();

    let err = db.create_user("erin", "second", dec("20")).await.unwrap_err();
    assert!(matches!(err, DbError::UsernameTaken(ref name) if name == "erin"));

    let user = db.find_user("erin").await.unwrap().expect("user kept");
    assert_eq!(user.hash, "first");
    assert_eq!(user.cash, dec("10"));
}

#[tokio::test]
async fn failed_transaction_rolls_back_every_write() {
    let db = Database::new_in_memory().await.unwrap();
    let user = db.create_user("frank", "h", dec("100")).await.unwrap();

    let result: Result<(), DbError> = db
        .transaction(|conn| {
            stock_trader::db::append(conn, &entry(user, "AAA", "1", "50"))?;
            stock_trader::db::update_cash(conn, user, dec("50"))?;
            Err(DbError::NotFound)
        })
        .await;
    assert!(result.is_err());

    assert!(db.transactions_for(user).await.unwrap().is_empty());
    assert_eq!(db.cash(user).await.unwrap(), dec("100"));
}

#[tokio::test]
async fn ledger_survives_reopening_from_disk() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("nested").join("finance.db");

    let user = {
        let db = Database::open(&path).await.unwrap();
        let user = db.create_user("gina", "h", dec("500")).await.unwrap();
        db.append(&entry(user, "AAA", "2", "25")).await.unwrap();
        db.update_cash(user, dec("450")).await.unwrap();
        user
    };

    let db = Database::open(&path).await.unwrap();
    assert_eq!(db.path(), path.as_path());
    assert_eq!(db.cash(user).await.unwrap(), dec("450"));
    let txs = db.transactions_for(user).await.unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].name, "AAA Corp");
}
