//! Test utilities for database testing.
//!
//! This module provides utilities for setting up in-memory SQLite databases
//! with migrations, plus builders for delivery events.

use anyhow::Result;
use flow_monitor::config::SnapshotStrategy;
use flow_monitor::monitor::{
    DeliveryDestination, DeliveryEvent, DeliverySource, Message, NodeInfo,
};
use flow_monitor::store::DirectStore;
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use serde_json::Value;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// A direct store over a fresh in-memory database.
#[allow(dead_code)]
pub async fn setup_test_store(strategy: SnapshotStrategy) -> Result<DirectStore> {
    let db = setup_test_db().await?;
    Ok(DirectStore::with_connection(db, strategy))
}

/// Builds a node description with an optional name.
#[allow(dead_code)]
pub fn node(id: &str, node_type: &str) -> NodeInfo {
    NodeInfo {
        id: id.to_string(),
        node_type: node_type.to_string(),
        name: None,
    }
}

/// Builder for a delivery of message `msg_id` from `source` port 0 to
/// `destination`.
#[allow(dead_code)]
pub struct DeliveryBuilder {
    event: DeliveryEvent,
}

#[allow(dead_code)]
impl DeliveryBuilder {
    pub fn new(msg_id: &str, source: NodeInfo, destination: NodeInfo) -> Self {
        Self {
            event: DeliveryEvent {
                source: DeliverySource {
                    node: source,
                    port: 0,
                },
                destination: DeliveryDestination {
                    node: destination,
                    wire_count: 1,
                },
                msg: Message::new(msg_id),
            },
        }
    }

    pub fn port(mut self, port: u32) -> Self {
        self.event.source.port = port;
        self
    }

    /// Marks the destination as the end of the flow.
    pub fn terminal(mut self) -> Self {
        self.event.destination.wire_count = 0;
        self
    }

    pub fn topic(mut self, topic: &str) -> Self {
        self.event.msg.topic = Some(topic.to_string());
        self
    }

    pub fn sender(mut self, sender: &str) -> Self {
        self.event.msg.sender = Some(sender.to_string());
        self
    }

    pub fn receiver(mut self, receiver: &str) -> Self {
        self.event.msg.receiver = Some(receiver.to_string());
        self
    }

    pub fn log(mut self, log: Value) -> Self {
        self.event.msg.log = Some(log);
        self
    }

    pub fn field(mut self, key: &str, value: Value) -> Self {
        self.event.msg.body.insert(key.to_string(), value);
        self
    }

    pub fn build(self) -> DeliveryEvent {
        self.event
    }
}
