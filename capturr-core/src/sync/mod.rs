//! Sync orchestrator
//!
//! Drains the capture outbox to the remote graph.
//!
//! [`SyncEngine`] is the record state machine. It owns the in-flight set and
//! is only ever touched from one task. [`SyncOrchestrator`] is that task: it
//! serializes ticks, `sync_one` requests and send completions, while the sends
//! themselves run concurrently.
//!
//! ```text
//! pending ──dispatch──► in_progress ──200──► success
//!    ▲                      │
//!    └──── failure ─────────┘   (401/403 also latches hard_error)
//! ```

mod engine;
mod orchestrator;

pub use engine::{Dispatch, SyncEngine, SyncSettings, TickOutcome, TickReport};
pub use orchestrator::{SyncHandle, SyncOrchestrator};
