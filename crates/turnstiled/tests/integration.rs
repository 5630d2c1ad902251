//! Integration tests for turnstiled
//!
//! These tests verify the end-to-end behavior of the entitlement engine
//! against a file-backed store, and the IPC layer over a real socket.

use std::sync::Arc;
use std::time::Duration;

use turnstile_api::{Command, Component, ResponsePayload, ResponseResult, Tier};
use turnstile_catalog::{Catalog, parse_catalog};
use turnstile_core::{Issuer, UnlockError, sweep_once};
use turnstile_ipc::{IpcClient, IpcServer, ServerMessage};
use turnstile_store::{AccountRecord, SqliteStore, Store, TransactionReason};
use turnstile_util::AccountId;

fn seeded_issuer(
    store: Arc<SqliteStore>,
    balance: u32,
    tier: Tier,
) -> (Arc<Issuer>, AccountId) {
    let issuer = Arc::new(Issuer::new(Catalog::default(), store.clone()));
    let account_id = AccountId::new("acct-1");

    store
        .create_account(&AccountRecord::new(account_id.clone(), tier))
        .unwrap();
    if balance > 0 {
        store
            .refill(
                &account_id,
                balance,
                TransactionReason::Refill {
                    source: "signup".into(),
                },
            )
            .unwrap();
    }

    (issuer, account_id)
}

#[tokio::test]
async fn unlock_scenario_end_to_end() {
    // Balance 20, free tier (30 min window), social_posts at 5 credits:
    // charge, idempotent re-entry, fresh charge after the window.
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let (issuer, account_id) = seeded_issuer(store.clone(), 20, Tier::Free);
    let now = turnstile_util::now();

    let (first, _) = issuer
        .request_unlock(&account_id, Component::SocialPosts, 5, Tier::Free, now)
        .await
        .unwrap();
    assert!(!first.existing_session);
    assert_eq!(first.expires_at, now + chrono::Duration::minutes(30));
    assert_eq!(store.balance(&account_id).unwrap(), 15);

    let (second, _) = issuer
        .request_unlock(
            &account_id,
            Component::SocialPosts,
            5,
            Tier::Free,
            now + chrono::Duration::minutes(10),
        )
        .await
        .unwrap();
    assert!(second.existing_session);
    assert_eq!(second.session_id, first.session_id);
    assert_eq!(store.balance(&account_id).unwrap(), 15);

    let (third, _) = issuer
        .request_unlock(
            &account_id,
            Component::SocialPosts,
            5,
            Tier::Free,
            now + chrono::Duration::minutes(31),
        )
        .await
        .unwrap();
    assert!(!third.existing_session);
    assert_ne!(third.session_id, first.session_id);
    assert_eq!(store.balance(&account_id).unwrap(), 10);
}

#[tokio::test]
async fn grants_survive_process_restart() {
    // Normal navigation includes an app restart: a paid grant must not be
    // re-charged by a new process.
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("turnstiled.db");
    let now = turnstile_util::now();
    let account_id = AccountId::new("acct-1");

    let first_session_id = {
        let store = Arc::new(SqliteStore::open(&db_path).unwrap());
        let (issuer, _) = seeded_issuer(store, 20, Tier::Pro);

        let (receipt, _) = issuer
            .request_unlock(&account_id, Component::Chart, 10, Tier::Pro, now)
            .await
            .unwrap();
        receipt.session_id
    };

    // New process: fresh store handle, fresh issuer
    let store = Arc::new(SqliteStore::open(&db_path).unwrap());
    let issuer = Issuer::new(Catalog::default(), store.clone());

    let (receipt, _) = issuer
        .request_unlock(
            &account_id,
            Component::Chart,
            10,
            Tier::Pro,
            now + chrono::Duration::minutes(5),
        )
        .await
        .unwrap();

    assert!(receipt.existing_session);
    assert_eq!(receipt.session_id, first_session_id);
    assert_eq!(store.balance(&account_id).unwrap(), 10);
}

#[tokio::test]
async fn sweeper_cleanup_matches_live_reads() {
    // Reads are correct before the sweeper runs; the sweep then brings
    // the stored statuses in line with what reads already reported.
    let content = r#"
        catalog_version = 1

        [components.chart]
        cost = 1
        window_override_minutes = 1
    "#;
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let issuer = Issuer::new(parse_catalog(content).unwrap(), store.clone());
    let account_id = AccountId::new("acct-1");

    store
        .create_account(&AccountRecord::new(account_id.clone(), Tier::Free))
        .unwrap();
    store
        .refill(&account_id, 5, TransactionReason::Refill { source: "t".into() })
        .unwrap();

    // Grant in the past so the one-minute window has already closed
    let past = turnstile_util::now() - chrono::Duration::minutes(5);
    issuer
        .request_unlock(&account_id, Component::Chart, 1, Tier::Free, past)
        .await
        .unwrap();

    // Live read already reports nothing active, sweeper or not
    let now = turnstile_util::now();
    assert!(issuer.active_sessions(&account_id, now).unwrap().is_empty());

    // The sweep transitions exactly that stale row
    assert_eq!(sweep_once(store.as_ref()).unwrap(), 1);
    assert_eq!(sweep_once(store.as_ref()).unwrap(), 0);
}

#[tokio::test]
async fn denial_reports_structured_detail() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let (issuer, account_id) = seeded_issuer(store, 3, Tier::Free);
    let now = turnstile_util::now();

    let err = issuer
        .request_unlock(&account_id, Component::Chart, 10, Tier::Free, now)
        .await
        .unwrap_err();

    match err {
        UnlockError::InsufficientCredits {
            required,
            available,
        } => {
            assert_eq!(required, 10);
            assert_eq!(available, 3);
        }
        other => panic!("expected InsufficientCredits, got {}", other),
    }
}

#[tokio::test]
async fn ipc_round_trip_over_socket() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("turnstiled.sock");

    let mut server = IpcServer::new(&socket_path);
    server.start().await.unwrap();
    let server = Arc::new(server);
    let mut messages = server.take_message_receiver().await.unwrap();

    let accept = server.clone();
    tokio::spawn(async move {
        let _ = accept.run().await;
    });

    // Minimal dispatch loop: answer pings
    let responder = server.clone();
    tokio::spawn(async move {
        while let Some(msg) = messages.recv().await {
            if let ServerMessage::Request { client_id, request } = msg {
                let response = match request.command {
                    Command::Ping => turnstile_api::Response::success(
                        request.request_id,
                        ResponsePayload::Pong,
                    ),
                    _ => turnstile_api::Response::error(
                        request.request_id,
                        turnstile_api::ErrorInfo::new(
                            turnstile_api::ErrorCode::InvalidRequest,
                            "unexpected command",
                        ),
                    ),
                };
                let _ = responder.send_response(&client_id, response).await;
            }
        }
    });

    let mut client = IpcClient::connect(&socket_path).await.unwrap();
    let response = tokio::time::timeout(Duration::from_secs(5), client.send(Command::Ping))
        .await
        .expect("response within timeout")
        .unwrap();

    assert_eq!(response.request_id, 1);
    match response.result {
        ResponseResult::Ok(ResponsePayload::Pong) => {}
        other => panic!("expected pong, got {:?}", other),
    }
}
