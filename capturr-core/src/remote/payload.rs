//! Request types for the append API
//!
//! `AppendBody` matches the JSON document the endpoint expects; `Location`
//! is the logical destination resolved from the profile.

use chrono::NaiveDate;
use serde::Serialize;

use crate::format::daily_note_key;
use crate::types::{CaptureKind, Profile};

/// Prefix that renders a block as an unchecked to-do
pub const TODO_MARKER: &str = "{{[[TODO]]}}";

/// Where a capture lands in the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// The daily note page for a local calendar date
    DailyNote(NaiveDate),
    /// A page by title
    Page(String),
}

impl Location {
    /// Resolve the destination from profile settings.
    ///
    /// Daily notes win when enabled; otherwise the trimmed custom location is
    /// used, falling back to the daily note when it is blank.
    pub fn resolve(profile: &Profile, today: NaiveDate) -> Self {
        if profile.use_daily_notes {
            return Location::DailyNote(today);
        }

        match profile
            .custom_location
            .as_deref()
            .map(str::trim)
            .filter(|page| !page.is_empty())
        {
            Some(page) => Location::Page(page.to_string()),
            None => Location::DailyNote(today),
        }
    }

    /// The page key sent on the wire
    pub fn page_key(&self) -> String {
        match self {
            Location::DailyNote(date) => daily_note_key(*date),
            Location::Page(title) => title.clone(),
        }
    }
}

/// Trimmed nesting block from the profile, when non-empty
pub fn nest_target(profile: &Profile) -> Option<String> {
    profile
        .custom_block
        .as_deref()
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .map(str::to_string)
}

/// Block text for a capture kind.
pub fn render_block(kind: CaptureKind, content: &str) -> String {
    match kind {
        CaptureKind::Note => content.to_string(),
        CaptureKind::Todo => format!("{} {}", TODO_MARKER, content),
    }
}

/// Everything needed for one outbound append call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendRequest {
    pub graph: String,
    pub token: String,
    /// Decorated capture text (before to-do rendering)
    pub content: String,
    pub kind: CaptureKind,
    pub location: Location,
    pub nest_under: Option<String>,
}

impl AppendRequest {
    /// Build a request from a configured profile.
    ///
    /// Returns None when the profile lacks a graph or token.
    pub fn for_profile(
        profile: &Profile,
        content: String,
        kind: CaptureKind,
        today: NaiveDate,
    ) -> Option<Self> {
        let (graph, token) = profile.credentials()?;
        Some(Self {
            graph: graph.to_string(),
            token: token.to_string(),
            content,
            kind,
            location: Location::resolve(profile, today),
            nest_under: nest_target(profile),
        })
    }

    /// JSON body for this request
    pub fn body(&self) -> AppendBody {
        let title = match &self.location {
            Location::DailyNote(date) => PageTitle::Daily {
                daily_note_page: daily_note_key(*date),
            },
            Location::Page(title) => PageTitle::Named(title.clone()),
        };

        AppendBody {
            location: LocationBody {
                page: PageRef { title },
                nest_under: self
                    .nest_under
                    .as_ref()
                    .map(|block| BlockString { string: block.clone() }),
            },
            append_data: vec![BlockString {
                string: render_block(self.kind, &self.content),
            }],
        }
    }
}

/// Request body for POST /api/graph/{graph}/append-blocks
#[derive(Debug, Clone, Serialize)]
pub struct AppendBody {
    location: LocationBody,
    #[serde(rename = "append-data")]
    append_data: Vec<BlockString>,
}

#[derive(Debug, Clone, Serialize)]
struct LocationBody {
    page: PageRef,
    #[serde(rename = "nest-under", skip_serializing_if = "Option::is_none")]
    nest_under: Option<BlockString>,
}

#[derive(Debug, Clone, Serialize)]
struct PageRef {
    title: PageTitle,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum PageTitle {
    Named(String),
    Daily {
        #[serde(rename = "daily-note-page")]
        daily_note_page: String,
    },
}

#[derive(Debug, Clone, Serialize)]
struct BlockString {
    string: String,
}
