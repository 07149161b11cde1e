//! Parent/variant lookups over stored option linkage.
//!
//! The graph is built from [`VariantLink`] rows read up front, so every lookup
//! here is a pure in-memory query.

use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::VariantLink;
use crate::model::ProductId;

/// Outcome of looking up the composite parents of a variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentResolution {
    /// No composite owns the product.
    Standalone,
    /// The product should be represented by these parents.
    Parents(BTreeSet<ProductId>),
    /// Several parents and no option attribute to tell them apart.
    Ambiguous(BTreeSet<ProductId>),
}

#[derive(Debug, Clone, Default)]
pub struct RelationGraph {
    // child -> (parent -> option attribute)
    parents: BTreeMap<ProductId, BTreeMap<ProductId, Option<String>>>,
    children: BTreeMap<ProductId, BTreeSet<ProductId>>,
}

impl RelationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_links<I>(links: I) -> Self
    where
        I: IntoIterator<Item = VariantLink>,
    {
        let mut graph = Self::new();
        graph.extend(links);
        graph
    }

    pub fn extend<I>(&mut self, links: I)
    where
        I: IntoIterator<Item = VariantLink>,
    {
        for link in links {
            let attribute = link.attribute_code.filter(|code| !code.trim().is_empty());
            self.parents
                .entry(link.child_id)
                .or_default()
                .insert(link.parent_id, attribute);
            self.children
                .entry(link.parent_id)
                .or_default()
                .insert(link.child_id);
        }
    }

    /// Parents of `variant_id` with the reason when there are none to use.
    ///
    /// A single parent is always used. With several parents every link must
    /// carry an option attribute; otherwise the variant is its own canonical
    /// product and no parent is guessed.
    pub fn resolve_parents(&self, variant_id: ProductId) -> ParentResolution {
        let Some(links) = self.parents.get(&variant_id) else {
            return ParentResolution::Standalone;
        };
        let ids: BTreeSet<ProductId> = links.keys().copied().collect();
        match ids.len() {
            0 => ParentResolution::Standalone,
            1 => ParentResolution::Parents(ids),
            _ if links.values().all(Option::is_some) => ParentResolution::Parents(ids),
            _ => ParentResolution::Ambiguous(ids),
        }
    }

    pub fn parents_of(&self, variant_id: ProductId) -> BTreeSet<ProductId> {
        match self.resolve_parents(variant_id) {
            ParentResolution::Parents(ids) => ids,
            ParentResolution::Standalone | ParentResolution::Ambiguous(_) => BTreeSet::new(),
        }
    }

    pub fn children_of(&self, composite_id: ProductId) -> BTreeSet<ProductId> {
        self.children
            .get(&composite_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Parent ids referenced by any link, used to fetch parent records.
    pub fn all_parent_ids(&self) -> BTreeSet<ProductId> {
        self.children.keys().copied().collect()
    }
}
