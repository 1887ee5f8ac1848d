//! Database layer for capturr
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - The outbox queue of capture records
//! - Per-device profiles

pub mod repo;
pub mod schema;

pub use repo::{Database, QueueStore, StatusCounts};
