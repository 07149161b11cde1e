//! Run-scoped record of which products were already folded into a canonical
//! product. A fresh tracker is created for every sync run and dropped with it.

use std::collections::HashMap;

use crate::model::ProductId;

#[derive(Debug, Default)]
pub struct DedupTracker {
    canonical_by_id: HashMap<ProductId, ProductId>,
}

impl DedupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `id` is represented by `canonical_id` in this run.
    pub fn mark_processed(&mut self, id: ProductId, canonical_id: ProductId) {
        self.canonical_by_id.entry(id).or_insert(canonical_id);
        self.canonical_by_id
            .entry(canonical_id)
            .or_insert(canonical_id);
    }

    /// True if `id` is a canonical id of this run or was folded into one.
    pub fn is_processed(&self, id: ProductId) -> bool {
        self.canonical_by_id.contains_key(&id)
    }

    /// The canonical id `id` was first folded into.
    pub fn canonical_of(&self, id: ProductId) -> Option<ProductId> {
        self.canonical_by_id.get(&id).copied()
    }
}
