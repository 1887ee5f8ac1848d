//! Per-device profile access
//!
//! One profile exists per device identity. It is created lazily on first use
//! and edited by settings flows; the orchestrator only ever reads it.

use std::path::Path;
use std::sync::Arc;

use uuid::Uuid;

use crate::db::Database;
use crate::error::Result;
use crate::types::Profile;

/// Read side of the profile, as consumed by the orchestrator.
pub trait ProfileSource: Send + Sync {
    /// The current profile (created with defaults if missing)
    fn current_profile(&self) -> Result<Profile>;
}

/// Profile store bound to one device identity.
pub struct ProfileStore {
    db: Arc<Database>,
    device_id: String,
}

impl ProfileStore {
    pub fn new(db: Arc<Database>, device_id: impl Into<String>) -> Self {
        Self {
            db,
            device_id: device_id.into(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Save an edited profile.
    ///
    /// Changing the graph name or API token releases every hard-error latch,
    /// since those records were blocked on the old credential. Returns the
    /// number of records released.
    pub fn update(&self, profile: &Profile) -> Result<usize> {
        let previous = self.current_profile()?;

        let mut profile = profile.clone();
        profile.id = self.device_id.clone();
        self.db.upsert_profile(&profile)?;

        let credentials_changed = previous.graph_name != profile.graph_name
            || previous.api_token != profile.api_token;
        if !credentials_changed {
            return Ok(0);
        }

        let released = self.db.clear_hard_errors()?;
        if released > 0 {
            tracing::info!(released, "Credentials changed, cleared hard-error latches");
        }
        Ok(released)
    }
}

impl ProfileSource for ProfileStore {
    fn current_profile(&self) -> Result<Profile> {
        if let Some(profile) = self.db.get_profile(&self.device_id)? {
            return Ok(profile);
        }

        let profile = Profile::new(self.device_id.clone());
        self.db.upsert_profile(&profile)?;
        tracing::info!(device_id = %self.device_id, "Created device profile");
        Ok(profile)
    }
}

/// Read the device identity from `path`, generating and saving one if absent.
pub fn load_or_create_device_id(path: &Path) -> Result<String> {
    if let Ok(existing) = std::fs::read_to_string(path) {
        let existing = existing.trim();
        if !existing.is_empty() {
            return Ok(existing.to_string());
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let id = Uuid::new_v4().to_string();
    std::fs::write(path, &id)?;
    tracing::info!(path = %path.display(), "Generated device identity");
    Ok(id)
}
