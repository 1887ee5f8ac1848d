//! Record state machine and dispatch selection

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backoff;
use crate::config::SyncConfig;
use crate::db::QueueStore;
use crate::error::Error;
use crate::format::decorate_content;
use crate::profile::ProfileSource;
use crate::remote::{AppendRequest, SendError};
use crate::types::{CaptureRecord, Profile, SyncStatus};

/// Scheduling knobs for the orchestrator.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Period of the background tick
    pub tick_interval: Duration,
    /// An `in_progress` record younger than this is assumed to still be sending
    pub min_retry_gap: Duration,
    /// Upper bound on outstanding sends
    pub max_concurrent_sends: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            min_retry_gap: Duration::from_secs(5),
            max_concurrent_sends: 1,
        }
    }
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            min_retry_gap: config.min_retry_gap(),
            max_concurrent_sends: config.max_concurrent_sends,
        }
    }
}

/// Why a tick did or did not look at the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Reachability reported offline; the queue was not read
    Offline,
    /// Graph name or token missing
    NotConfigured,
    /// The queue was scanned
    Ran,
}

/// Result of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub outcome: TickOutcome,
    /// Records handed to the sender
    pub dispatched: usize,
}

impl TickReport {
    fn skipped(outcome: TickOutcome) -> Self {
        Self {
            outcome,
            dispatched: 0,
        }
    }
}

/// A send the engine has committed to. The record is already `in_progress`
/// and in the in-flight set; the caller must report back via
/// [`SyncEngine::complete`].
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub record_id: Uuid,
    /// Attempt number of this send (1 for the first)
    pub attempt: u32,
    pub request: AppendRequest,
}

/// Outbox state machine.
///
/// Not thread-safe by itself: every method takes `&mut self` and the
/// orchestrator task is the only owner.
pub struct SyncEngine {
    store: Arc<dyn QueueStore>,
    profiles: Arc<dyn ProfileSource>,
    settings: SyncSettings,
    /// In-flight set, keyed by record id, holding the latest copy of each record
    in_flight: HashMap<Uuid, CaptureRecord>,
    /// Records whose last write failed; these shadow the stored rows
    unsaved: HashMap<Uuid, CaptureRecord>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn QueueStore>,
        profiles: Arc<dyn ProfileSource>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            profiles,
            settings,
            in_flight: HashMap::new(),
            unsaved: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn is_in_flight(&self, id: &Uuid) -> bool {
        self.in_flight.contains_key(id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Scan the queue and start as many sends as capacity allows.
    pub fn tick(&mut self, online: bool, now: DateTime<Utc>) -> (TickReport, Vec<Dispatch>) {
        if !online {
            debug!("Offline, skipping sync tick");
            return (TickReport::skipped(TickOutcome::Offline), Vec::new());
        }

        let Some(profile) = self.configured_profile() else {
            return (TickReport::skipped(TickOutcome::NotConfigured), Vec::new());
        };

        self.flush_unsaved();

        let records = match self
            .store
            .captures_with_status(&[SyncStatus::Pending, SyncStatus::InProgress])
        {
            Ok(records) => self.overlay_unsaved(records),
            Err(e) => {
                warn!(error = %e, "Failed to read outbox");
                return (TickReport::skipped(TickOutcome::Ran), Vec::new());
            }
        };

        let grace_cutoff = now - to_chrono(self.settings.min_retry_gap);
        let candidates: Vec<CaptureRecord> = records
            .into_iter()
            .filter(|record| self.is_eligible(record, now, grace_cutoff))
            .take(self.capacity())
            .collect();

        let mut dispatches = Vec::with_capacity(candidates.len());
        for record in candidates {
            if record.status == SyncStatus::InProgress {
                info!(
                    record_id = %record.id,
                    attempt = record.attempt_count,
                    "Re-dispatching abandoned in-progress capture"
                );
                self.in_flight.remove(&record.id);
            }
            if let Some(dispatch) = self.begin(record, &profile, now) {
                dispatches.push(dispatch);
            }
        }

        let report = TickReport {
            outcome: TickOutcome::Ran,
            dispatched: dispatches.len(),
        };
        if report.dispatched > 0 {
            debug!(dispatched = report.dispatched, "Sync tick dispatched");
        }
        (report, dispatches)
    }

    /// Try to send one record right away, skipping the queue scan.
    ///
    /// Applies the same single-flight, status and capacity guards as a tick,
    /// but ignores `next_attempt_at`.
    pub fn sync_one(&mut self, id: &Uuid, online: bool, now: DateTime<Utc>) -> Option<Dispatch> {
        if !online {
            debug!(record_id = %id, "Offline, deferring immediate sync");
            return None;
        }
        if self.in_flight.contains_key(id) {
            debug!(record_id = %id, "Capture already in flight");
            return None;
        }
        if self.capacity() == 0 {
            debug!(record_id = %id, "Send capacity in use, leaving capture for the next tick");
            return None;
        }

        let profile = self.configured_profile()?;
        let record = self.load(id)?;

        if record.hard_error {
            return None;
        }
        let grace_cutoff = now - to_chrono(self.settings.min_retry_gap);
        let runnable = match record.status {
            SyncStatus::Pending => true,
            SyncStatus::InProgress => record.last_attempt_at.map_or(true, |t| t <= grace_cutoff),
            SyncStatus::Success | SyncStatus::Failed => false,
        };
        if !runnable {
            return None;
        }

        self.begin(record, &profile, now)
    }

    /// Apply a send result to its record.
    pub fn complete(
        &mut self,
        id: Uuid,
        result: std::result::Result<(), SendError>,
        now: DateTime<Utc>,
    ) {
        let record = match self.in_flight.remove(&id) {
            Some(record) => Some(record),
            None => self.load(&id),
        };
        let Some(mut record) = record else {
            debug!(record_id = %id, "Completed capture no longer exists");
            return;
        };

        match result {
            Ok(()) => {
                record.status = SyncStatus::Success;
                record.sent_at = Some(now);
                record.hard_error = false;
                record.next_attempt_at = None;
                record.last_error = Some("OK".to_string());
                info!(record_id = %id, attempt = record.attempt_count, "Capture sent");
            }
            Err(err) if err.is_auth() => {
                record.status = SyncStatus::Pending;
                record.hard_error = true;
                record.next_attempt_at = None;
                record.last_error = Some(err.message.clone());
                warn!(
                    record_id = %id,
                    attempt = record.attempt_count,
                    status_code = ?err.status,
                    error = %err,
                    "Capture rejected by credentials, retries suspended"
                );
            }
            Err(err) => {
                let delay = backoff::delay(record.attempt_count, err.status);
                record.status = SyncStatus::Pending;
                record.next_attempt_at = Some(now + to_chrono(delay));
                record.last_error = Some(err.message.clone());
                warn!(
                    record_id = %id,
                    attempt = record.attempt_count,
                    status_code = ?err.status,
                    delay_secs = delay.as_secs_f64(),
                    error = %err,
                    "Capture send failed, will retry"
                );
            }
        }

        self.persist(&record);
    }

    /// Mark a record in flight and build its request.
    fn begin(
        &mut self,
        mut record: CaptureRecord,
        profile: &Profile,
        now: DateTime<Utc>,
    ) -> Option<Dispatch> {
        if self.in_flight.contains_key(&record.id) || record.status == SyncStatus::Success {
            return None;
        }

        record.status = SyncStatus::InProgress;
        record.last_attempt_at = Some(now);
        if profile.add_timestamp && record.stamp_at.is_none() {
            record.stamp_at = Some(now);
        }

        let stamp = if profile.add_timestamp {
            record.stamp_at.map(|ts| ts.with_timezone(&Local))
        } else {
            None
        };
        let content = decorate_content(&record.content, stamp.as_ref(), profile.default_tag.as_deref());
        let today = now.with_timezone(&Local).date_naive();
        let request = AppendRequest::for_profile(profile, content, record.kind, today)?;

        self.in_flight.insert(record.id, record.clone());
        if !self.persist(&record) {
            self.in_flight.remove(&record.id);
            return None;
        }

        record.attempt_count = record.attempt_count.saturating_add(1);
        self.persist(&record);

        debug!(
            record_id = %record.id,
            attempt = record.attempt_count,
            location = %request.location.page_key(),
            "Dispatching capture"
        );

        let dispatch = Dispatch {
            record_id: record.id,
            attempt: record.attempt_count,
            request,
        };
        self.in_flight.insert(record.id, record);
        Some(dispatch)
    }

    fn is_eligible(
        &self,
        record: &CaptureRecord,
        now: DateTime<Utc>,
        grace_cutoff: DateTime<Utc>,
    ) -> bool {
        if self.in_flight.contains_key(&record.id) || record.hard_error {
            return false;
        }
        match record.status {
            SyncStatus::Pending => record.next_attempt_at.map_or(true, |t| t <= now),
            SyncStatus::InProgress => record.last_attempt_at.map_or(true, |t| t <= grace_cutoff),
            SyncStatus::Success | SyncStatus::Failed => false,
        }
    }

    fn capacity(&self) -> usize {
        self.settings
            .max_concurrent_sends
            .saturating_sub(self.in_flight.len())
    }

    fn configured_profile(&self) -> Option<Profile> {
        match self.profiles.current_profile() {
            Ok(profile) if profile.is_configured() => Some(profile),
            Ok(_) => {
                debug!("Profile has no graph or token, sync idle");
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to read profile");
                None
            }
        }
    }

    /// Latest known state of a record: unsaved copy first, then the store.
    fn load(&self, id: &Uuid) -> Option<CaptureRecord> {
        if let Some(record) = self.unsaved.get(id) {
            return Some(record.clone());
        }
        match self.store.get_capture(id) {
            Ok(record) => record,
            Err(e) => {
                warn!(record_id = %id, error = %e, "Failed to load capture");
                None
            }
        }
    }

    fn overlay_unsaved(&self, mut records: Vec<CaptureRecord>) -> Vec<CaptureRecord> {
        if self.unsaved.is_empty() {
            return records;
        }
        for record in records.iter_mut() {
            if let Some(latest) = self.unsaved.get(&record.id) {
                *record = latest.clone();
            }
        }
        records
    }

    /// Write a record, keeping it in memory if the write fails.
    ///
    /// Returns false only when the record no longer exists.
    fn persist(&mut self, record: &CaptureRecord) -> bool {
        match self.store.save_capture(record) {
            Ok(()) => {
                self.unsaved.remove(&record.id);
                true
            }
            Err(Error::NotFound(_)) => {
                debug!(record_id = %record.id, "Capture deleted while syncing");
                self.unsaved.remove(&record.id);
                false
            }
            Err(e) => {
                warn!(record_id = %record.id, error = %e, "Failed to persist capture state");
                self.unsaved.insert(record.id, record.clone());
                true
            }
        }
    }

    fn flush_unsaved(&mut self) {
        if self.unsaved.is_empty() {
            return;
        }
        let records: Vec<CaptureRecord> = self.unsaved.values().cloned().collect();
        for record in records {
            self.persist(&record);
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}
