//! Core domain types for capturr
//!
//! These types describe the outbox: every note or to-do captured on the
//! device becomes a [`CaptureRecord`] that the sync orchestrator drains
//! towards the remote graph.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Capture** | One outbox item: text captured by the user, waiting for delivery |
//! | **Graph** | The remote note database a capture is appended to |
//! | **Profile** | Per-device settings: destination graph, credential, formatting |
//! | **Daily note** | A page implicitly keyed by the current local calendar date |
//! | **Hard error** | An auth failure latch that disables automatic retry |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================
// Capture records
// ============================================

/// Delivery state of a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Waiting to be sent (first attempt or retry)
    Pending,
    /// A send has been started and no completion recorded yet
    InProgress,
    /// Delivered (terminal)
    Success,
    /// Reserved. No code path assigns it; it only round-trips through storage.
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::InProgress => "in_progress",
            SyncStatus::Success => "success",
            SyncStatus::Failed => "failed",
        }
    }

    /// Human readable label for status listings
    pub fn display_name(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "Pending",
            SyncStatus::InProgress => "In Progress",
            SyncStatus::Success => "Success",
            SyncStatus::Failed => "Failed",
        }
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "in_progress" => Ok(SyncStatus::InProgress),
            "success" => Ok(SyncStatus::Success),
            "failed" => Ok(SyncStatus::Failed),
            _ => Err(format!("unknown sync status: {}", s)),
        }
    }
}

/// What a capture renders as in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureKind {
    /// Plain block
    #[default]
    Note,
    /// Block wrapped in a checkbox marker
    Todo,
}

impl CaptureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureKind::Note => "note",
            CaptureKind::Todo => "todo",
        }
    }
}

impl std::str::FromStr for CaptureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "note" => Ok(CaptureKind::Note),
            "todo" => Ok(CaptureKind::Todo),
            _ => Err(format!("unknown capture kind: {}", s)),
        }
    }
}

/// One outbox item.
///
/// Created `pending` by a capture collaborator, mutated only by the sync
/// orchestrator, and deleted only by explicit user action.
///
/// Invariants:
/// - `status == Success` implies `hard_error == false`
/// - `attempt_count` grows by exactly one per dispatch and never resets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    /// Stable unique id, also the in-flight guard key
    pub id: Uuid,
    /// Raw captured text (undecorated)
    pub content: String,
    pub kind: CaptureKind,
    pub status: SyncStatus,
    pub created_at: DateTime<Utc>,
    /// When the remote acknowledged the capture
    pub sent_at: Option<DateTime<Utc>>,
    /// Start of the most recent dispatch
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Earliest time the next automatic retry may run
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub attempt_count: u32,
    /// First-attempt time, used for the timestamp decoration on every retry
    pub stamp_at: Option<DateTime<Utc>>,
    /// Auth failure latch; suppresses automatic retries while set
    pub hard_error: bool,
    /// Diagnostic text from the last attempt ("OK" after success)
    pub last_error: Option<String>,
}

impl CaptureRecord {
    /// A fresh `pending` record created now.
    pub fn new(content: impl Into<String>, kind: CaptureKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            kind,
            status: SyncStatus::Pending,
            created_at: Utc::now(),
            sent_at: None,
            last_attempt_at: None,
            next_attempt_at: None,
            attempt_count: 0,
            stamp_at: None,
            hard_error: false,
            last_error: None,
        }
    }

    /// Convenience constructor for a note capture
    pub fn note(content: impl Into<String>) -> Self {
        Self::new(content, CaptureKind::Note)
    }

    /// Convenience constructor for a to-do capture
    pub fn todo(content: impl Into<String>) -> Self {
        Self::new(content, CaptureKind::Todo)
    }

    /// Whether the record is delivered.
    pub fn is_sent(&self) -> bool {
        self.status == SyncStatus::Success
    }
}

// ============================================
// Profile
// ============================================

/// Per-device destination and formatting settings.
///
/// Read-only from the orchestrator's perspective. Sync is inert until both
/// `graph_name` and `api_token` are non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Device identity this profile belongs to
    pub id: String,
    pub graph_name: Option<String>,
    pub api_token: Option<String>,
    /// Appended to every capture when set
    pub default_tag: Option<String>,
    /// Append the first-attempt time (HH:MM) to every capture
    pub add_timestamp: bool,
    /// Send to today's daily note instead of `custom_location`
    pub use_daily_notes: bool,
    /// Page title used when daily notes are off
    pub custom_location: Option<String>,
    /// Block text to nest captures under
    pub custom_block: Option<String>,
    /// Share-import formats URLs as `[title](url)` links
    pub share_format_links: bool,
}

impl Profile {
    /// A blank profile for a device, as created on first launch.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            graph_name: None,
            api_token: None,
            default_tag: None,
            add_timestamp: false,
            use_daily_notes: true,
            custom_location: None,
            custom_block: None,
            share_format_links: false,
        }
    }

    /// Graph name and API token, when both are non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let graph = self.graph_name.as_deref().filter(|g| !g.is_empty())?;
        let token = self.api_token.as_deref().filter(|t| !t.is_empty())?;
        Some((graph, token))
    }

    /// Check if sync has everything it needs to send
    pub fn is_configured(&self) -> bool {
        self.credentials().is_some()
    }
}
