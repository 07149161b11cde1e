//! Placed orders change stock levels, so purchased products get resynced.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::Inventory;
use crate::invalidate::{InvalidationReport, Invalidator};
use crate::model::ProductId;

/// Line id the storefront uses for items without a catalog product.
const PLACEHOLDER_LINE_ID: &str = "-1";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    /// Catalog product id as reported by the storefront.
    pub product_id: Option<String>,
    #[serde(default)]
    pub quantity: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub number: String,
    pub lines: Vec<OrderLine>,
}

impl PlacedOrder {
    /// Product ids of the order lines, without placeholders or duplicates.
    pub fn purchased_product_ids(&self) -> Vec<ProductId> {
        let mut ids: Vec<ProductId> = self
            .lines
            .iter()
            .filter_map(|line| line.product_id.as_deref())
            .map(str::trim)
            .filter(|raw| *raw != PLACEHOLDER_LINE_ID)
            .filter_map(|raw| raw.parse().ok())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Invalidate the products of a placed order when inventory sync is on.
/// Returns `None` when nothing was invalidated.
#[instrument(skip_all, fields(order = %order.number))]
pub async fn on_order_placed(
    invalidator: &Invalidator,
    inventory: &Inventory,
    order: &PlacedOrder,
) -> Option<InvalidationReport> {
    if !inventory.sync_on_order {
        return None;
    }
    let ids = order.purchased_product_ids();
    if ids.is_empty() {
        debug!("order has no catalog products");
        return None;
    }
    Some(invalidator.invalidate(&ids).await)
}
