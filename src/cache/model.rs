//! Cache entity and view models used by the repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ProductId, ScopeId};

/// Sync state of one product for one destination scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub id: i64,
    pub product_id: ProductId,
    pub scope_id: ScopeId,
    pub is_dirty: bool,
    /// Bumped on every invalidation; a sync run only cleans the revision it read.
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn clean_target(&self) -> CleanTarget {
        CleanTarget {
            product_id: self.product_id,
            revision: self.revision,
        }
    }
}

/// Entry to mark clean, pinned to the revision observed when it was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanTarget {
    pub product_id: ProductId,
    pub revision: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvalidateOutcome {
    pub created: u64,
    pub dirtied: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeStats {
    pub total: i64,
    pub dirty: i64,
    pub deleted: i64,
}
