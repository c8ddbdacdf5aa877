//! Search behaviour of the direct store over an in-memory database.

mod test_utils;

use flow_monitor::config::SnapshotStrategy;
use flow_monitor::monitor::{LogEntry, Transaction};
use flow_monitor::query::TransactionSearch;
use flow_monitor::store::{DirectStore, MonitorStore, StoreError};
use test_utils::setup_test_store;

/// 03.02.2024 00:00:00 UTC
const DAY_START: i64 = 1_706_918_400_000;
const DAY_MS: i64 = 86_400_000;

fn closed(id: &str, start: i64) -> Transaction {
    let mut tx = Transaction::open(id, start);
    tx.end = Some(start + 10);
    tx
}

fn log(transaction: &str, text: &str, created_at: i64) -> LogEntry {
    LogEntry {
        level: "info".to_string(),
        node: "worker".to_string(),
        text: text.to_string(),
        transaction: transaction.to_string(),
        created_at,
    }
}

fn search(query: &str, count: u64, offset: u64) -> TransactionSearch {
    TransactionSearch {
        query: query.to_string(),
        count,
        offset,
        advanced: false,
    }
}

fn ids(views: &[flow_monitor::monitor::TransactionView]) -> Vec<&str> {
    views.iter().map(|v| v.id()).collect()
}

async fn seeded_store() -> DirectStore {
    let store = setup_test_store(SnapshotStrategy::Collection).await.unwrap();
    for (i, id) in ["t1", "t2", "t3", "t4", "t5"].iter().enumerate() {
        store
            .insert_transaction(&closed(id, 1_000 + i as i64))
            .await
            .unwrap();
    }
    store
}

#[tokio::test]
async fn empty_query_pages_newest_first() {
    let store = seeded_store().await;

    let page = store.query_transactions(&search("", 10, 0)).await.unwrap();
    assert_eq!(ids(&page), vec!["t5", "t4", "t3", "t2", "t1"]);

    let page = store.query_transactions(&search("", 2, 1)).await.unwrap();
    assert_eq!(ids(&page), vec!["t4", "t3"]);

    let page = store.query_transactions(&search("", 10, 9)).await.unwrap();
    assert!(page.is_empty());
}

#[tokio::test]
async fn day_query_selects_one_utc_day() {
    let store = setup_test_store(SnapshotStrategy::Collection).await.unwrap();
    store.insert_transaction(&closed("before", DAY_START - 1)).await.unwrap();
    store.insert_transaction(&closed("morning", DAY_START)).await.unwrap();
    store.insert_transaction(&closed("evening", DAY_START + DAY_MS - 1)).await.unwrap();
    store.insert_transaction(&closed("next", DAY_START + DAY_MS)).await.unwrap();

    let page = store
        .query_transactions(&search("03.02.2024", 10, 0))
        .await
        .unwrap();
    assert_eq!(ids(&page), vec!["evening", "morning"]);
}

#[tokio::test]
async fn text_query_matches_logs_case_insensitively() {
    let store = seeded_store().await;
    store
        .insert_logs(&[log("t2", "Payment DECLINED", 1_001), log("t4", "declined again", 1_003)])
        .await
        .unwrap();

    let page = store
        .query_transactions(&search("declined", 10, 0))
        .await
        .unwrap();
    assert_eq!(ids(&page), vec!["t4", "t2"]);
    assert!(page.iter().all(|v| v.snapshots.is_none()));

    // Skip and limit apply after matching.
    let page = store
        .query_transactions(&search("declined", 1, 1))
        .await
        .unwrap();
    assert_eq!(ids(&page), vec!["t2"]);
}

#[tokio::test]
async fn text_query_matches_transaction_ids_by_regex() {
    let store = seeded_store().await;

    let page = store.query_transactions(&search("^t[13]$", 10, 0)).await.unwrap();
    assert_eq!(ids(&page), vec!["t3", "t1"]);
}

#[tokio::test]
async fn invalid_pattern_is_reported() {
    let store = seeded_store().await;

    let err = store
        .query_transactions(&search("[unclosed", 10, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Query(_)));
}

#[tokio::test]
async fn malformed_day_falls_back_to_text_search() {
    let store = seeded_store().await;
    store.insert_logs(&[log("t1", "batch 31.02.2024", 1_000)]).await.unwrap();

    let page = store
        .query_transactions(&search("31.02.2024", 10, 0))
        .await
        .unwrap();
    assert_eq!(ids(&page), vec!["t1"]);
}

#[tokio::test]
async fn closed_transaction_merges_receivers_with_stored_copy() {
    let store = setup_test_store(SnapshotStrategy::Collection).await.unwrap();

    let mut first = closed("m1", 100);
    first.receivers = vec!["billing".to_string()];
    store.insert_transaction(&first).await.unwrap();

    let mut second = closed("m1", 100);
    second.receivers = vec!["audit".to_string()];
    second.sender = "shop".to_string();
    store.insert_transaction(&second).await.unwrap();

    let view = store.query_transaction_by_id("m1").await.unwrap().unwrap();
    assert_eq!(view.transaction.receivers, vec!["audit", "billing"]);
    assert_eq!(view.transaction.sender, "shop");
}
