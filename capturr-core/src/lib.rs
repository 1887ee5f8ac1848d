//! # capturr-core
//!
//! Core library for capturr - a quick-capture outbox for a remote notes graph.
//!
//! Captures are written to a local SQLite queue first and delivered later by
//! the sync orchestrator, so nothing typed offline is lost.
//!
//! This library provides:
//! - Domain types for capture records and the device profile
//! - Queue storage with SQLite
//! - The sync orchestrator (tick selection, single-flight dispatch, backoff)
//! - The append API client and reachability signal
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use capturr_core::{Config, Database};
//! use capturr_core::profile::{load_or_create_device_id, ProfileStore};
//! use capturr_core::remote::GraphClient;
//! use capturr_core::reachability::Reachability;
//! use capturr_core::sync::{SyncEngine, SyncOrchestrator, SyncSettings};
//!
//! # async fn example() -> capturr_core::Result<()> {
//! let config = Config::load()?;
//! let db = Arc::new(Database::open(&Config::database_path())?);
//! db.migrate()?;
//!
//! let device_id = load_or_create_device_id(&Config::device_id_path())?;
//! let profiles = Arc::new(ProfileStore::new(db.clone(), device_id));
//! let client = GraphClient::new(&config.sync.api_base_url, config.sync.request_timeout())?;
//!
//! let engine = SyncEngine::new(db.clone(), profiles, SyncSettings::from(&config.sync));
//! let orchestrator = SyncOrchestrator::spawn(engine, Arc::new(client), Reachability::default());
//!
//! if let Some(record) = capturr_core::capture::capture_note(&db, "Buy milk")? {
//!     orchestrator.handle().sync_one(record.id).await?;
//! }
//! orchestrator.shutdown().await;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::{Database, QueueStore, StatusCounts};
pub use error::{Error, Result};
pub use sync::{SyncHandle, SyncOrchestrator, TickOutcome, TickReport};
pub use types::*;

// Public modules
pub mod backoff;
pub mod capture;
pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod logging;
pub mod profile;
pub mod reachability;
pub mod remote;
pub mod sync;
pub mod types;
