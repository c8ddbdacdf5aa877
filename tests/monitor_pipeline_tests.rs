//! End-to-end correlation tests: deliveries observed by the monitor and
//! persisted to an in-memory SQLite store.

mod test_utils;

use std::num::NonZeroUsize;
use std::sync::Arc;

use flow_monitor::config::{SnapshotPolicy, SnapshotStrategy};
use flow_monitor::monitor::{CorrelationTracker, Monitor, TrackerSettings, spawn_dispatcher};
use flow_monitor::store::MonitorStore;
use serde_json::json;
use test_utils::{DeliveryBuilder, node, setup_test_store};
use tokio_util::sync::CancellationToken;

fn settings(policy: SnapshotPolicy, ignore: &[&str]) -> TrackerSettings {
    TrackerSettings {
        ignore: ignore.iter().map(|s| s.to_string()).collect(),
        snapshot_policy: policy,
        capacity: NonZeroUsize::new(64).unwrap(),
    }
}

async fn monitor_with(policy: SnapshotPolicy, ignore: &[&str]) -> (Monitor, Arc<dyn MonitorStore>) {
    let store: Arc<dyn MonitorStore> =
        Arc::new(setup_test_store(SnapshotStrategy::Collection).await.unwrap());
    let monitor = Monitor::new(CorrelationTracker::new(settings(policy, ignore)), store.clone());
    (monitor, store)
}

#[tokio::test]
async fn linear_flow_is_persisted_when_it_reaches_the_end() {
    let (monitor, store) = monitor_with(SnapshotPolicy::All, &[]).await;

    let mut first = DeliveryBuilder::new("m1", node("in", "http in"), node("fn", "function"))
        .topic("orders")
        .sender("shop")
        .field("payload", json!({ "sku": "A-1" }))
        .build();
    let observation = monitor.deliver(&mut first).await;
    assert!(observation.transaction.is_none());

    // Open transactions are not written.
    assert!(store.query_transaction_by_id("m1").await.unwrap().is_none());

    let mut last = DeliveryBuilder::new("m1", node("fn", "function"), node("out", "http response"))
        .receiver("billing")
        .log(json!({ "level": "info", "text": "priced" }))
        .terminal()
        .build();
    let observation = monitor.deliver(&mut last).await;
    assert!(observation.transaction.is_some());
    assert!(last.msg.log.is_none());

    let view = store.query_transaction_by_id("m1").await.unwrap().unwrap();
    assert_eq!(view.transaction.sender, "shop");
    assert_eq!(view.transaction.receivers, vec!["billing"]);
    assert!(view.transaction.end.unwrap() >= view.transaction.start);

    let mut steps: Vec<_> = view.steps.iter().map(|s| s.id.as_str()).collect();
    steps.sort();
    assert_eq!(steps, vec!["fn-0", "in-0"]);
    let first_step = view.steps.iter().find(|s| s.id == "in-0").unwrap();
    assert_eq!(first_step.topic, "orders");
    assert_eq!(first_step.snapshot_id.as_deref(), Some("m1-in-0"));
    let last_step = view.steps.iter().find(|s| s.id == "fn-0").unwrap();
    assert_eq!(last_step.topic, "None");

    assert_eq!(view.logs.len(), 1);
    assert_eq!(view.logs[0].level, "info");
    assert_eq!(view.logs[0].text, "priced");
    assert_eq!(view.logs[0].node, "fn");

    let snapshots = view.snapshots.unwrap();
    assert_eq!(snapshots.len(), 2);
    let entry = snapshots.iter().find(|s| s.id == "m1-in-0").unwrap();
    assert_eq!(entry.msg["payload"]["sku"], "A-1");
    assert_eq!(entry.node.node_type, "http in");
}

#[tokio::test]
async fn repeated_hop_is_stored_once() {
    let (monitor, store) = monitor_with(SnapshotPolicy::All, &[]).await;

    // One output port wired to two nodes yields the same hop twice.
    let mut to_b = DeliveryBuilder::new("m2", node("a", "switch"), node("b", "function")).build();
    let mut to_c = DeliveryBuilder::new("m2", node("a", "switch"), node("c", "function")).build();
    let first = monitor.deliver(&mut to_b).await;
    let second = monitor.deliver(&mut to_c).await;
    assert!(first.step_is_new);
    assert!(!second.step_is_new);

    let mut end = DeliveryBuilder::new("m2", node("b", "function"), node("d", "debug"))
        .terminal()
        .build();
    monitor.deliver(&mut end).await;

    let view = store.query_transaction_by_id("m2").await.unwrap().unwrap();
    assert_eq!(view.steps.iter().filter(|s| s.id == "a-0").count(), 1);
    assert_eq!(view.steps.len(), 2);
    assert_eq!(view.transaction.sender, "Unknown");
}

#[tokio::test]
async fn first_and_last_policy_skips_intermediate_snapshots() {
    let (monitor, store) = monitor_with(SnapshotPolicy::FirstAndLast, &[]).await;

    let hops = [("a", "b", false), ("b", "c", false), ("c", "d", true)];
    for (from, to, terminal) in hops {
        let mut builder = DeliveryBuilder::new("m3", node(from, "function"), node(to, "function"));
        if terminal {
            builder = builder.terminal();
        }
        let mut event = builder.build();
        monitor.deliver(&mut event).await;
    }

    let snapshots = store.query_snapshots_for_transaction("m3").await.unwrap();
    let mut ids: Vec<_> = snapshots.iter().map(|s| s.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["m3-a-0", "m3-c-0"]);

    let view = store.query_transaction_by_id("m3").await.unwrap().unwrap();
    let middle = view.steps.iter().find(|s| s.id == "b-0").unwrap();
    assert!(middle.snapshot_id.is_none());
}

#[tokio::test]
async fn ignored_node_types_taint_the_whole_message() {
    let (monitor, store) = monitor_with(SnapshotPolicy::All, &["inject"]).await;

    let mut tick = DeliveryBuilder::new("m4", node("timer", "inject"), node("fn", "function")).build();
    assert!(monitor.deliver(&mut tick).await.internal);

    let mut next = DeliveryBuilder::new("m4", node("fn", "function"), node("out", "debug"))
        .terminal()
        .build();
    assert!(monitor.deliver(&mut next).await.internal);

    assert!(store.query_transaction_by_id("m4").await.unwrap().is_none());
    assert!(store.query_snapshots_for_transaction("m4").await.unwrap().is_empty());
}

#[tokio::test]
async fn monitor_node_traffic_is_never_recorded() {
    let (monitor, store) = monitor_with(SnapshotPolicy::All, &[]).await;

    let mut event = DeliveryBuilder::new("m5", node("mon", "monitor"), node("x", "debug"))
        .terminal()
        .build();
    assert!(monitor.deliver(&mut event).await.internal);
    assert!(store.query_transaction_by_id("m5").await.unwrap().is_none());
}

#[tokio::test]
async fn receivers_accumulate_across_hops() {
    let (monitor, store) = monitor_with(SnapshotPolicy::None, &[]).await;

    let mut a = DeliveryBuilder::new("m6", node("a", "function"), node("b", "function"))
        .receiver("crm")
        .build();
    let mut b = DeliveryBuilder::new("m6", node("b", "function"), node("c", "function"))
        .receiver("audit")
        .build();
    let mut c = DeliveryBuilder::new("m6", node("c", "function"), node("d", "debug"))
        .receiver("crm")
        .terminal()
        .build();
    for event in [&mut a, &mut b, &mut c] {
        monitor.deliver(event).await;
    }

    let view = store.query_transaction_by_id("m6").await.unwrap().unwrap();
    assert_eq!(view.transaction.receivers, vec!["audit", "crm"]);
    assert!(view.snapshots.unwrap().is_empty());
}

#[tokio::test]
async fn dispatcher_returns_message_with_log_cleared() {
    let (monitor, store) = monitor_with(SnapshotPolicy::All, &[]).await;
    let shutdown = CancellationToken::new();
    let (handle, workers) = spawn_dispatcher(Arc::new(monitor), 3, 8, shutdown.clone());

    let event = DeliveryBuilder::new("m7", node("a", "function"), node("b", "debug"))
        .log(json!(["first", { "text": "second", "level": "error" }]))
        .field("payload", json!(42))
        .terminal()
        .build();
    let msg = handle.deliver(event).await.unwrap();
    assert!(msg.log.is_none());
    assert_eq!(msg.body["payload"], json!(42));

    let view = store.query_transaction_by_id("m7").await.unwrap().unwrap();
    let mut levels: Vec<_> = view.logs.iter().map(|l| l.level.as_str()).collect();
    levels.sort();
    assert_eq!(levels, vec!["error", "warn"]);

    shutdown.cancel();
    for worker in workers {
        worker.await.unwrap();
    }
    assert!(handle
        .deliver(DeliveryBuilder::new("m8", node("a", "function"), node("b", "debug")).build())
        .await
        .is_err());
}
