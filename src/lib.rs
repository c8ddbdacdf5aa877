//! # Flow Monitor Library
//!
//! This library provides the core functionality of the flow monitor:
//! correlation of delivery events into transactions, their persistence and
//! search, transaction replay, and the HTTP server exposing them.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod monitor;
pub mod query;
pub mod replay;
pub mod server;
pub mod store;
pub mod telemetry;
pub use migration;
