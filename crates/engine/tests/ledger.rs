use std::sync::Arc;

use chrono::{TimeZone, Utc};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use uuid::Uuid;

use engine::{
    CreditCmd, Engine, EngineError, HistoryFilter, TransactionKind, TransferCmd, Wallet,
};
use migration::MigratorTrait;

async fn engine_with_db() -> (Engine, DatabaseConnection) {
    // A single pooled connection keeps the in-memory database alive and
    // shared across operations.
    let mut opts = ConnectOptions::new("sqlite::memory:".to_string());
    opts.max_connections(1);
    let db = Database::connect(opts).await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    let engine = Engine::builder().database(db.clone()).build().await.unwrap();
    (engine, db)
}

async fn engine_with_file_db() -> (Engine, DatabaseConnection, String, std::path::PathBuf) {
    let root = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../target/test_dbs");
    std::fs::create_dir_all(&root).unwrap();

    let path = root.join(format!("engine_{}.db", Uuid::new_v4()));
    let url = format!("sqlite:{}?mode=rwc", path.display());

    let mut opts = ConnectOptions::new(url.clone());
    opts.max_connections(1);
    let db = Database::connect(opts).await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    let engine = Engine::builder().database(db.clone()).build().await.unwrap();

    (engine, db, url, path)
}

async fn register_with_wallet(engine: &Engine, name: &str, phone: &str) -> Wallet {
    engine.register(name, phone).await.unwrap();
    engine.find_wallet_by_phone(phone).await.unwrap()
}

#[tokio::test]
async fn register_creates_user_and_zero_balance_wallet() {
    let (engine, _db) = engine_with_db().await;

    let user = engine.register("Alice", "111").await.unwrap();
    assert_eq!(user.name, "Alice");
    assert_eq!(user.phone, "111");

    let wallet = engine.find_wallet_by_phone("111").await.unwrap();
    assert_eq!(wallet.user_id, user.id);
    assert_eq!(wallet.balance, 0);
    assert_eq!(engine.balance_of(wallet.id).await.unwrap(), 0);
}

#[tokio::test]
async fn register_duplicate_phone_leaves_first_untouched() {
    let (engine, _db) = engine_with_db().await;

    engine.register("Alice", "111").await.unwrap();
    let err = engine.register("Bob", "111").await.unwrap_err();
    assert_eq!(err, EngineError::DuplicatePhone("111".to_string()));

    let user = engine.user_by_phone("111").await.unwrap();
    assert_eq!(user.name, "Alice");
    let wallet = engine.find_wallet_by_phone("111").await.unwrap();
    assert_eq!(wallet.balance, 0);
}

#[tokio::test]
async fn register_rejects_blank_input() {
    let (engine, _db) = engine_with_db().await;

    let err = engine.register("Alice", "   ").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidPhone(_)));

    let err = engine.register("  ", "111").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidAmount(_)));

    let err = engine.user_by_phone("111").await.unwrap_err();
    assert!(matches!(err, EngineError::UserNotFound(_)));
}

#[tokio::test]
async fn update_phone_switches_lookup() {
    let (engine, _db) = engine_with_db().await;

    let alice = register_with_wallet(&engine, "Alice", "111").await;
    engine.update_phone("111", "222").await.unwrap();

    let err = engine.find_wallet_by_phone("111").await.unwrap_err();
    assert!(matches!(err, EngineError::UserNotFound(_)));
    let moved = engine.find_wallet_by_phone("222").await.unwrap();
    assert_eq!(moved.id, alice.id);

    // Re-submitting the current phone is a no-op success.
    assert!(engine.update_phone("222", "222").await.is_ok());

    engine.register("Bob", "333").await.unwrap();
    let err = engine.update_phone("333", "222").await.unwrap_err();
    assert_eq!(err, EngineError::DuplicatePhone("222".to_string()));

    let err = engine.update_phone("999", "444").await.unwrap_err();
    assert!(matches!(err, EngineError::UserNotFound(_)));
}

#[tokio::test]
async fn credit_tops_up_and_appends_log_row() {
    let (engine, _db) = engine_with_db().await;
    let wallet = register_with_wallet(&engine, "Alice", "111").await;

    let tx = engine
        .credit(CreditCmd::new(wallet.id, 10_000, Utc::now()).note("Top-up"))
        .await
        .unwrap();
    assert_eq!(tx.kind, TransactionKind::TopUp);
    assert_eq!(tx.sender_wallet, None);
    assert_eq!(tx.receiver_wallet, Some(wallet.id));
    assert_eq!(tx.amount_minor, 10_000);
    assert_eq!(tx.note.as_deref(), Some("Top-up"));

    assert_eq!(engine.balance_of(wallet.id).await.unwrap(), 10_000);

    let history = engine
        .history_of(wallet.id, 10, &HistoryFilter::default())
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, tx.id);
    assert_eq!(history[0].signed_amount_for(wallet.id), 10_000);
}

#[tokio::test]
async fn credit_rejects_non_positive_amounts_without_effect() {
    let (engine, _db) = engine_with_db().await;
    let wallet = register_with_wallet(&engine, "Alice", "111").await;

    for amount_minor in [0, -500] {
        let err = engine
            .credit(CreditCmd::new(wallet.id, amount_minor, Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidAmount(_)));
    }

    assert_eq!(engine.balance_of(wallet.id).await.unwrap(), 0);
    let history = engine
        .history_of(wallet.id, 10, &HistoryFilter::default())
        .await
        .unwrap();
    assert!(history.is_empty());
}

#[tokio::test]
async fn unknown_wallet_is_reported_on_every_read_and_write() {
    let (engine, _db) = engine_with_db().await;
    register_with_wallet(&engine, "Alice", "111").await;
    let missing = Uuid::new_v4();

    let err = engine
        .credit(CreditCmd::new(missing, 100, Utc::now()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::WalletNotFound(_)));

    let err = engine.balance_of(missing).await.unwrap_err();
    assert!(matches!(err, EngineError::WalletNotFound(_)));

    let err = engine
        .history_of(missing, 10, &HistoryFilter::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::WalletNotFound(_)));
}

#[tokio::test]
async fn transfer_moves_funds_and_conserves_value() {
    let (engine, _db) = engine_with_db().await;
    let alice = register_with_wallet(&engine, "Alice", "111").await;
    let bob = register_with_wallet(&engine, "Bob", "222").await;

    engine
        .credit(CreditCmd::new(alice.id, 10_000, Utc::now()))
        .await
        .unwrap();
    assert_eq!(engine.balance_of(alice.id).await.unwrap(), 10_000);

    let tx = engine
        .transfer(TransferCmd::new(alice.id, bob.id, 4_000, Utc::now()).note("lunch"))
        .await
        .unwrap();
    assert_eq!(tx.kind, TransactionKind::Transfer);
    assert_eq!(tx.sender_wallet, Some(alice.id));
    assert_eq!(tx.receiver_wallet, Some(bob.id));

    let alice_balance = engine.balance_of(alice.id).await.unwrap();
    let bob_balance = engine.balance_of(bob.id).await.unwrap();
    assert_eq!(alice_balance, 6_000);
    assert_eq!(bob_balance, 4_000);
    assert_eq!(alice_balance + bob_balance, 10_000);

    let history = engine
        .history_of(alice.id, 10, &HistoryFilter::default())
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, tx.id);
    assert_eq!(history[0].signed_amount_for(alice.id), -4_000);
    assert_eq!(history[1].signed_amount_for(alice.id), 10_000);

    let bob_history = engine
        .history_of(bob.id, 10, &HistoryFilter::default())
        .await
        .unwrap();
    assert_eq!(bob_history.len(), 1);
    assert_eq!(bob_history[0].signed_amount_for(bob.id), 4_000);
}

#[tokio::test]
async fn transfer_with_insufficient_funds_has_no_effect() {
    let (engine, _db) = engine_with_db().await;
    let alice = register_with_wallet(&engine, "Alice", "111").await;
    let bob = register_with_wallet(&engine, "Bob", "222").await;

    engine
        .credit(CreditCmd::new(alice.id, 6_000, Utc::now()))
        .await
        .unwrap();

    let err = engine
        .transfer(TransferCmd::new(alice.id, bob.id, 10_000, Utc::now()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientFunds(_)));

    assert_eq!(engine.balance_of(alice.id).await.unwrap(), 6_000);
    assert_eq!(engine.balance_of(bob.id).await.unwrap(), 0);

    // The aborted transfer must not leave a log row behind.
    let history = engine
        .history_of(alice.id, 10, &HistoryFilter::default())
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, TransactionKind::TopUp);
}

#[tokio::test]
async fn transfer_validation_runs_before_store_access() {
    let (engine, _db) = engine_with_db().await;
    let alice = register_with_wallet(&engine, "Alice", "111").await;
    let bob = register_with_wallet(&engine, "Bob", "222").await;

    let err = engine
        .transfer(TransferCmd::new(alice.id, alice.id, 100, Utc::now()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SameWalletTransfer(_)));

    let err = engine
        .transfer(TransferCmd::new(alice.id, bob.id, 0, Utc::now()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidAmount(_)));

    let missing = Uuid::new_v4();
    let err = engine
        .transfer(TransferCmd::new(missing, bob.id, 100, Utc::now()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::WalletNotFound(_)));
    let err = engine
        .transfer(TransferCmd::new(alice.id, missing, 100, Utc::now()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::WalletNotFound(_)));
}

#[tokio::test]
async fn history_orders_newest_first_with_id_tiebreak() {
    let (engine, _db) = engine_with_db().await;
    let wallet = register_with_wallet(&engine, "Alice", "111").await;

    // Same timestamp on purpose: ordering must fall back to the strictly
    // increasing transaction id.
    let at = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
    let mut ids = Vec::new();
    for amount_minor in [100, 200, 300] {
        let tx = engine
            .credit(CreditCmd::new(wallet.id, amount_minor, at))
            .await
            .unwrap();
        ids.push(tx.id);
    }

    let history = engine
        .history_of(wallet.id, 10, &HistoryFilter::default())
        .await
        .unwrap();
    let listed: Vec<i64> = history.iter().map(|tx| tx.id).collect();
    let mut expected = ids.clone();
    expected.reverse();
    assert_eq!(listed, expected);
}

#[tokio::test]
async fn history_filter_limits_kinds_and_range() {
    let (engine, _db) = engine_with_db().await;
    let alice = register_with_wallet(&engine, "Alice", "111").await;
    let bob = register_with_wallet(&engine, "Bob", "222").await;

    let day1 = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
    let day2 = Utc.with_ymd_and_hms(2026, 1, 2, 9, 0, 0).unwrap();
    engine
        .credit(CreditCmd::new(alice.id, 1_000, day1))
        .await
        .unwrap();
    engine
        .credit(CreditCmd::new(alice.id, 2_000, day2))
        .await
        .unwrap();
    engine
        .transfer(TransferCmd::new(alice.id, bob.id, 500, day2))
        .await
        .unwrap();

    let top_ups_only = HistoryFilter {
        kinds: Some(vec![TransactionKind::TopUp]),
        ..Default::default()
    };
    let history = engine.history_of(alice.id, 10, &top_ups_only).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|tx| tx.kind == TransactionKind::TopUp));

    let second_day = HistoryFilter {
        from: Some(day2),
        ..Default::default()
    };
    let history = engine.history_of(alice.id, 10, &second_day).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|tx| tx.occurred_at >= day2));

    let inverted = HistoryFilter {
        from: Some(day2),
        to: Some(day1),
        ..Default::default()
    };
    let err = engine.history_of(alice.id, 10, &inverted).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidAmount(_)));
}

#[tokio::test]
async fn history_pages_restart_with_cursor() {
    let (engine, _db) = engine_with_db().await;
    let wallet = register_with_wallet(&engine, "Alice", "111").await;

    let at = Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap();
    for _ in 0..5 {
        engine
            .credit(CreditCmd::new(wallet.id, 100, at))
            .await
            .unwrap();
    }

    let filter = HistoryFilter::default();
    let full = engine.history_of(wallet.id, 10, &filter).await.unwrap();
    assert_eq!(full.len(), 5);

    let mut collected = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let (page, next) = engine
            .history_of_page(wallet.id, 2, cursor.as_deref(), &filter)
            .await
            .unwrap();
        assert!(page.len() <= 2);
        collected.extend(page.into_iter().map(|tx| tx.id));
        match next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    let expected: Vec<i64> = full.iter().map(|tx| tx.id).collect();
    assert_eq!(collected, expected);
}

#[tokio::test]
async fn credit_with_idempotency_key_applies_once() {
    let (engine, _db) = engine_with_db().await;
    let wallet = register_with_wallet(&engine, "Alice", "111").await;

    let cmd = CreditCmd::new(wallet.id, 2_500, Utc::now()).idempotency_key("topup-1");
    let first = engine.credit(cmd.clone()).await.unwrap();
    let second = engine.credit(cmd).await.unwrap();
    assert_eq!(first.id, second.id);

    assert_eq!(engine.balance_of(wallet.id).await.unwrap(), 2_500);
    let history = engine
        .history_of(wallet.id, 10, &HistoryFilter::default())
        .await
        .unwrap();
    assert_eq!(history.len(), 1);

    // A different key is a different operation.
    engine
        .credit(CreditCmd::new(wallet.id, 2_500, Utc::now()).idempotency_key("topup-2"))
        .await
        .unwrap();
    assert_eq!(engine.balance_of(wallet.id).await.unwrap(), 5_000);
}

#[tokio::test]
async fn transfer_with_idempotency_key_applies_once() {
    let (engine, _db) = engine_with_db().await;
    let alice = register_with_wallet(&engine, "Alice", "111").await;
    let bob = register_with_wallet(&engine, "Bob", "222").await;

    engine
        .credit(CreditCmd::new(alice.id, 1_000, Utc::now()))
        .await
        .unwrap();

    let cmd = TransferCmd::new(alice.id, bob.id, 400, Utc::now()).idempotency_key("xfer-1");
    let first = engine.transfer(cmd.clone()).await.unwrap();
    let second = engine.transfer(cmd).await.unwrap();
    assert_eq!(first.id, second.id);

    assert_eq!(engine.balance_of(alice.id).await.unwrap(), 600);
    assert_eq!(engine.balance_of(bob.id).await.unwrap(), 400);
}

#[tokio::test]
async fn verify_detects_and_recompute_repairs_drift() {
    let (engine, db) = engine_with_db().await;
    let backend = db.get_database_backend();
    let alice = register_with_wallet(&engine, "Alice", "111").await;
    let bob = register_with_wallet(&engine, "Bob", "222").await;

    engine
        .credit(CreditCmd::new(alice.id, 1_000, Utc::now()))
        .await
        .unwrap();
    engine
        .transfer(TransferCmd::new(alice.id, bob.id, 400, Utc::now()))
        .await
        .unwrap();

    assert!(engine.verify_balances().await.unwrap().is_empty());

    // Corrupt the denormalized balance directly in the store.
    db.execute(Statement::from_sql_and_values(
        backend,
        "UPDATE wallets SET balance = ? WHERE id = ?;",
        vec![999i64.into(), alice.id.to_string().into()],
    ))
    .await
    .unwrap();

    let drift = engine.verify_balances().await.unwrap();
    assert_eq!(drift.len(), 1);
    assert_eq!(drift[0].wallet_id, alice.id);
    assert_eq!(drift[0].stored_minor, 999);
    assert_eq!(drift[0].computed_minor, 600);

    let repaired = engine.recompute_balances().await.unwrap();
    assert_eq!(repaired.len(), 1);
    assert_eq!(engine.balance_of(alice.id).await.unwrap(), 600);
    assert!(engine.verify_balances().await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_transfers_cannot_overdraw() {
    let (engine, _db, _url, path) = engine_with_file_db().await;
    let alice = register_with_wallet(&engine, "Alice", "111").await;
    let bob = register_with_wallet(&engine, "Bob", "222").await;

    engine
        .credit(CreditCmd::new(alice.id, 3, Utc::now()))
        .await
        .unwrap();

    let engine = Arc::new(engine);
    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..4 {
        let engine = engine.clone();
        let (sender, receiver) = (alice.id, bob.id);
        tasks.spawn(async move {
            engine
                .transfer(TransferCmd::new(sender, receiver, 1, Utc::now()))
                .await
        });
    }

    let mut succeeded = 0;
    let mut rejected = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(_) => succeeded += 1,
            Err(EngineError::InsufficientFunds(_)) => rejected += 1,
            Err(err) => panic!("unexpected error: {err}"),
        }
    }
    assert_eq!(succeeded, 3);
    assert_eq!(rejected, 1);

    assert_eq!(engine.balance_of(alice.id).await.unwrap(), 0);
    assert_eq!(engine.balance_of(bob.id).await.unwrap(), 3);
    assert!(engine.verify_balances().await.unwrap().is_empty());

    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn crossing_transfers_both_complete() {
    let (engine, _db, _url, path) = engine_with_file_db().await;
    let alice = register_with_wallet(&engine, "Alice", "111").await;
    let bob = register_with_wallet(&engine, "Bob", "222").await;

    engine
        .credit(CreditCmd::new(alice.id, 500, Utc::now()))
        .await
        .unwrap();
    engine
        .credit(CreditCmd::new(bob.id, 500, Utc::now()))
        .await
        .unwrap();

    let engine = Arc::new(engine);
    let mut tasks = tokio::task::JoinSet::new();
    for (sender, receiver, amount_minor) in [(alice.id, bob.id, 200), (bob.id, alice.id, 300)] {
        let engine = engine.clone();
        tasks.spawn(async move {
            engine
                .transfer(TransferCmd::new(sender, receiver, amount_minor, Utc::now()))
                .await
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    let alice_balance = engine.balance_of(alice.id).await.unwrap();
    let bob_balance = engine.balance_of(bob.id).await.unwrap();
    assert_eq!(alice_balance, 600);
    assert_eq!(bob_balance, 400);
    assert_eq!(alice_balance + bob_balance, 1_000);

    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn restart_reads_same_state() {
    let (engine, db, url, path) = engine_with_file_db().await;
    let wallet = register_with_wallet(&engine, "Alice", "111").await;
    engine
        .credit(CreditCmd::new(wallet.id, 1_000, Utc::now()))
        .await
        .unwrap();

    drop(engine);
    drop(db);

    let db2 = Database::connect(&url).await.unwrap();
    let engine2 = Engine::builder().database(db2.clone()).build().await.unwrap();

    assert_eq!(engine2.balance_of(wallet.id).await.unwrap(), 1_000);
    let history = engine2
        .history_of(wallet.id, 10, &HistoryFilter::default())
        .await
        .unwrap();
    assert_eq!(history.len(), 1);

    drop(db2);
    let _ = std::fs::remove_file(path);
}
