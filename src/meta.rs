//! Storage bookkeeping carried by every mutable aggregate
use crate::types::TimeStamp;
use chrono::Utc;

/// Timestamps and the version come from storage. Domain code only ever flips
/// the two flags; the store bumps `version` when a save commits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeTracking {
    pub created_at: Option<TimeStamp<Utc>>,
    pub updated_at: Option<TimeStamp<Utc>>,
    pub version: u64, // 0 until the first successful save
    is_deleted: bool,
    is_changed: bool,
}

impl ChangeTracking {
    /// Tracking for an aggregate built in memory, not yet persisted.
    pub fn fresh() -> Self {
        Self {
            is_changed: true,
            ..Self::default()
        }
    }
    /// Tracking for an aggregate hydrated from storage.
    pub fn stored(
        created_at: TimeStamp<Utc>,
        updated_at: TimeStamp<Utc>,
        version: u64,
        is_deleted: bool,
    ) -> Self {
        Self {
            created_at: Some(created_at),
            updated_at: Some(updated_at),
            version,
            is_deleted,
            is_changed: false,
        }
    }
    pub fn mark_changed(&mut self) {
        self.is_changed = true;
    }
    pub fn mark_deleted(&mut self) {
        self.is_deleted = true;
        self.is_changed = true;
    }
    pub fn is_changed(&self) -> bool {
        self.is_changed
    }
    pub fn is_deleted(&self) -> bool {
        self.is_deleted
    }
    /// Called by the store once the aggregate has been written.
    pub fn committed(&mut self, version: u64, at: TimeStamp<Utc>) {
        if self.created_at.is_none() {
            self.created_at = Some(at.clone());
        }
        self.updated_at = Some(at);
        self.version = version;
        self.is_changed = false;
    }
}
