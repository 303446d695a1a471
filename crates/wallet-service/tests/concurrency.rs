//! Concurrent workflow steps against one account.

mod common;

use std::future::IntoFuture;
use std::sync::Arc;

use common::TestHarness;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;

use wallet_core::{AccountId, Initiation, Resolution, Settlement, TransactionType, WalletError};
use wallet_service::{EngineError, WalletEngine};

async fn funded_account(engine: &WalletEngine, amount: Decimal) -> AccountId {
    let account = engine.create_account("merchant-race", "KES").await.unwrap();
    engine
        .initiate(
            TransactionType::Topup,
            &account.id,
            &Initiation {
                reference: "FUND-1",
                amount,
                description: None,
            },
        )
        .await
        .unwrap();
    engine
        .settle(
            TransactionType::Topup,
            Resolution::Approve,
            &Settlement {
                reference: "FUND-1",
                receipt: Some("RCPT-FUND-1"),
                ..Settlement::default()
            },
        )
        .await
        .unwrap();
    account.id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_payments_never_overdraw() {
    let harness = TestHarness::new();
    let engine = Arc::clone(&harness.state.engine);
    let account_id = funded_account(&engine, dec!(1000)).await;

    let tasks: Vec<_> = (0..10)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let reference = format!("PAY-{i}");
                engine
                    .initiate(
                        TransactionType::Payment,
                        &account_id,
                        &Initiation {
                            reference: &reference,
                            amount: dec!(200),
                            description: None,
                        },
                    )
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(EngineError::Wallet(WalletError::InsufficientBalance { .. })) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(succeeded, 5);

    let account = engine.accounts().get(&account_id).unwrap();
    assert_eq!(account.current, dec!(1000));
    assert_eq!(account.available, dec!(0));
    assert_eq!(account.reserved, dec!(1000));

    let report = engine.reconcile(&account_id).await.unwrap();
    assert!(report.is_consistent());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_settlements_apply_once() {
    let harness = TestHarness::new();
    let engine = Arc::clone(&harness.state.engine);
    let account_id = funded_account(&engine, dec!(500)).await;
    engine
        .initiate(
            TransactionType::Payment,
            &account_id,
            &Initiation {
                reference: "PAY-ONCE",
                amount: dec!(100),
                description: None,
            },
        )
        .await
        .unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let resolution = if i % 2 == 0 {
                Resolution::Approve
            } else {
                Resolution::Reject
            };
            tokio::spawn(async move {
                engine
                    .settle(
                        TransactionType::Payment,
                        resolution,
                        &Settlement {
                            reference: "PAY-ONCE",
                            receipt: Some("RCPT-ONCE"),
                            ..Settlement::default()
                        },
                    )
                    .await
            })
        })
        .collect();

    let mut settled = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            settled += 1;
        }
    }
    assert_eq!(settled, 1);

    let account = engine.accounts().get(&account_id).unwrap();
    assert_eq!(account.reserved, dec!(0));
    assert!(account.current == dec!(400) || account.current == dec!(500));
    assert_eq!(account.available, account.current);

    let report = engine.reconcile(&account_id).await.unwrap();
    assert!(report.is_consistent());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_http_topups_all_land() {
    let harness = TestHarness::new();
    let account_id = harness.create_account("merchant-http").await;

    let requests = (0..6).map(|i| {
        harness.post("/v1/topups").json(&json!({
            "account_id": account_id,
            "amount": "25",
            "reference": format!("TOP-{i}"),
        }))
        .into_future()
    });
    for response in futures::future::join_all(requests).await {
        response.assert_status(axum::http::StatusCode::CREATED);
    }

    let (current, available, reserved, uncleared) = harness.balances(&account_id).await;
    assert_eq!(current, dec!(150));
    assert_eq!(uncleared, dec!(150));
    assert_eq!(available, dec!(0));
    assert_eq!(reserved, dec!(0));
}
