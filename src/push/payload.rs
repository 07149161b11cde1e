//! Mapping from catalog records to the index's upsert payload.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::batch::SyncBatch;
use crate::model::ProductRecord;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductPayload {
    pub product_id: String,
    pub sku: String,
    pub name: String,
    pub product_type: String,
    pub price: f64,
    pub available: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UpsertPayload {
    pub products: Vec<ProductPayload>,
}

impl UpsertPayload {
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }
}

/// `None` when the record cannot be represented in the index (disabled).
pub fn build_product(record: &ProductRecord) -> Option<ProductPayload> {
    if !record.enabled {
        return None;
    }
    let price = match record.price {
        Some(price) if price.is_finite() => price,
        other => {
            warn!(
                product_id = record.id,
                scope_id = record.scope_id,
                price = ?other,
                "product has no usable price; sending 0"
            );
            0.0
        }
    };
    Some(ProductPayload {
        product_id: record.id.to_string(),
        sku: record.sku.clone(),
        name: record.name.clone(),
        product_type: record.kind.as_str().to_string(),
        price,
        available: record.visible,
    })
}

pub fn build_upsert_payload(batch: &SyncBatch) -> UpsertPayload {
    UpsertPayload {
        products: batch.records.iter().filter_map(build_product).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CompositeKind, ProductKind};

    fn record(id: i64) -> ProductRecord {
        ProductRecord {
            id,
            sku: format!("SKU-{id}"),
            name: format!("Product {id}"),
            kind: ProductKind::Composite(CompositeKind::Configurable),
            enabled: true,
            visible: true,
            price: Some(19.9),
            scope_id: 1,
        }
    }

    #[test]
    fn maps_record_fields() {
        let payload = build_product(&record(500)).unwrap();
        assert_eq!(payload.product_id, "500");
        assert_eq!(payload.product_type, "configurable");
        assert_eq!(payload.price, 19.9);
        assert!(payload.available);
    }

    #[test]
    fn missing_price_falls_back_to_zero() {
        let mut r = record(1);
        r.price = None;
        assert_eq!(build_product(&r).unwrap().price, 0.0);
        r.price = Some(f64::NAN);
        assert_eq!(build_product(&r).unwrap().price, 0.0);
    }

    #[test]
    fn disabled_records_are_dropped() {
        let mut r = record(1);
        r.enabled = false;
        assert!(build_product(&r).is_none());
    }

    #[test]
    fn serialises_as_products_array() {
        let payload = UpsertPayload {
            products: vec![build_product(&record(2)).unwrap()],
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["products"][0]["sku"], "SKU-2");
        assert_eq!(json["products"][0]["available"], true);
    }
}
