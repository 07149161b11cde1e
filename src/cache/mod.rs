//! Cache store: one row per (product, scope) recording whether the product
//! must be pushed to that scope's index again.
//!
//! - `model`: entity types returned by the repository.
//! - `repo`: SQL-only functions over the `product_cache` table.

pub mod model;
pub mod repo;

pub use model::{CacheEntry, CleanTarget, InvalidateOutcome, ScopeStats};
pub use repo::*;
