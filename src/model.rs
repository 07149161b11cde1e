use serde::{Deserialize, Serialize};

pub type ProductId = i64;
pub type ScopeId = i64;

/// Flavour of a product that aggregates other products.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CompositeKind {
    Configurable,
    Bundle,
    Grouped,
}

/// Closed set of product shapes the pipeline distinguishes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    Simple,
    Composite(CompositeKind),
    Variant,
}

impl ProductKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductKind::Simple => "simple",
            ProductKind::Composite(CompositeKind::Configurable) => "configurable",
            ProductKind::Composite(CompositeKind::Bundle) => "bundle",
            ProductKind::Composite(CompositeKind::Grouped) => "grouped",
            ProductKind::Variant => "variant",
        }
    }

    pub fn parse_kind(s: &str) -> Option<Self> {
        match s {
            "simple" => Some(ProductKind::Simple),
            "configurable" => Some(ProductKind::Composite(CompositeKind::Configurable)),
            "bundle" => Some(ProductKind::Composite(CompositeKind::Bundle)),
            "grouped" => Some(ProductKind::Composite(CompositeKind::Grouped)),
            "variant" => Some(ProductKind::Variant),
            _ => None,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, ProductKind::Composite(_))
    }
}

/// Read-only snapshot of a catalog row as seen from one scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductRecord {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub kind: ProductKind,
    pub enabled: bool,
    pub visible: bool,
    pub price: Option<f64>,
    pub scope_id: ScopeId,
}

/// Credentials of the remote index account bound to a scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub api_token: String,
}

/// A store boundary that fans out to its own remote account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DestinationScope {
    pub id: ScopeId,
    pub code: String,
}

/// Where an invalidation request originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionContext {
    #[default]
    Normal,
    /// Schema setup or upgrade is running; the cache table may not exist yet.
    SetupUpgrade,
}

impl ExecutionContext {
    pub fn allows_full_reindex(&self) -> bool {
        matches!(self, ExecutionContext::Normal)
    }
}
