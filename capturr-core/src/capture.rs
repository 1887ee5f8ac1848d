//! Capture entry points
//!
//! Each function inserts `pending` records into the outbox and returns them,
//! so the caller can request an immediate send with
//! [`crate::sync::SyncHandle::sync_one`]. Nothing here talks to the network.

use crate::db::Database;
use crate::error::Result;
use crate::types::CaptureRecord;

/// Longest shared text accepted, in characters
pub const MAX_SHARE_CHARS: usize = 50_000;

/// Characters a transcript may consist of and still count as empty
const TRANSCRIPT_NOISE: &[char] = &['.', ',', ';', ':', '!', '?', '…', '—', '-', '•', '·'];

/// Insert one note. Whitespace-only text inserts nothing.
pub fn capture_note(db: &Database, text: &str) -> Result<Option<CaptureRecord>> {
    if text.trim().is_empty() {
        return Ok(None);
    }

    let record = CaptureRecord::note(text);
    db.insert_capture(&record)?;
    tracing::debug!(record_id = %record.id, "Captured note");
    Ok(Some(record))
}

/// Insert one to-do per non-empty line, trimmed, in line order.
pub fn capture_todos(db: &Database, text: &str) -> Result<Vec<CaptureRecord>> {
    let mut records = Vec::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let record = CaptureRecord::todo(line);
        db.insert_capture(&record)?;
        records.push(record);
    }

    tracing::debug!(count = records.len(), "Captured to-dos");
    Ok(records)
}

/// Insert a voice transcript after sanitizing it.
pub fn capture_transcript(db: &Database, raw: &str) -> Result<Option<CaptureRecord>> {
    capture_note(db, &sanitize_transcript(raw))
}

/// Insert text arriving from the share sheet (see [`share_text`] / [`share_url`]).
pub fn import_share(db: &Database, content: &str) -> Result<Option<CaptureRecord>> {
    let content = clamp(content.trim());
    capture_note(db, &content)
}

/// Shared plain text: clamped to [`MAX_SHARE_CHARS`].
pub fn share_text(raw: &str) -> String {
    clamp(raw)
}

/// Shared URL with an optional page title.
///
/// With `format_links` the result is a bracketed link `[title](url)`, using the
/// URL as the visible text when there is no title. Otherwise `title - url`
/// when a distinct title exists, else just the URL.
pub fn share_url(url: &str, title: Option<&str>, format_links: bool) -> String {
    let title = title.map(str::trim).filter(|t| !t.is_empty());

    let text = if format_links {
        format!("[{}]({})", title.unwrap_or(url), url)
    } else {
        match title {
            Some(title) if title != url => format!("{} - {}", title, url),
            _ => url.to_string(),
        }
    };
    clamp(&text)
}

/// Trim a transcript; punctuation-only transcripts become empty.
pub fn sanitize_transcript(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed
        .chars()
        .all(|c| c.is_whitespace() || TRANSCRIPT_NOISE.contains(&c))
    {
        return String::new();
    }
    trimmed.to_string()
}

fn clamp(text: &str) -> String {
    match text.char_indices().nth(MAX_SHARE_CHARS) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}
