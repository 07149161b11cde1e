use thiserror::Error;

use crate::model::{ProductId, ScopeId};

/// Errors that end a sync run early.
///
/// Per-batch push failures and per-scope configuration gaps are logged and
/// skipped instead; only broken invariants and storage faults surface here.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("batch {batch} for scope {expected} contains product {product_id} of scope {found}")]
    ScopeMismatch {
        expected: ScopeId,
        found: ScopeId,
        batch: usize,
        product_id: ProductId,
    },
    #[error("product {product_id} queued twice for scope {scope_id} in one run")]
    DuplicateCanonical {
        scope_id: ScopeId,
        product_id: ProductId,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SyncError {
    /// Invariant violations abort the whole run; other errors only the scope.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            SyncError::ScopeMismatch { .. } | SyncError::DuplicateCanonical { .. }
        )
    }
}
