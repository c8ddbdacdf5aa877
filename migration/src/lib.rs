//! Database migrations for the flow monitor.
//!
//! Tables mirror the monitor's record kinds: transactions, steps, logs,
//! snapshot documents, and the chunked snapshot bucket.

pub use sea_orm_migration::prelude::*;

mod m2025_01_01_000001_create_transactions;
mod m2025_01_01_000002_create_steps;
mod m2025_01_01_000003_create_logs;
mod m2025_01_01_000004_create_snapshots;
mod m2025_01_01_000005_create_snapshot_bucket;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_01_01_000001_create_transactions::Migration),
            Box::new(m2025_01_01_000002_create_steps::Migration),
            Box::new(m2025_01_01_000003_create_logs::Migration),
            Box::new(m2025_01_01_000004_create_snapshots::Migration),
            Box::new(m2025_01_01_000005_create_snapshot_bucket::Migration),
        ]
    }
}
