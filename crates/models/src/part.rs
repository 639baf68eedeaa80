use crate::id::IntegrationId;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A money amount tagged with its currency code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub amount: BigDecimal,
    pub currency: String,
}

/// The canonical normalized record this engine produces. One Part per
/// `(integration, part number, supplier)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// Uppercase-normalized part number.
    pub part_number: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub supplier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
    /// Zero means out of stock.
    #[serde(default)]
    pub quantity: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uom: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Source columns with no canonical mapping, preserved as-is.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
    pub integration_id: IntegrationId,
    #[serde(default)]
    pub integration_name: String,
    pub imported_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Part {
    pub fn key(&self) -> PartKey<'_> {
        PartKey {
            integration_id: self.integration_id,
            part_number: &self.part_number,
            supplier: &self.supplier,
        }
    }
}

/// Identity of a Part within the primary store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartKey<'a> {
    pub integration_id: IntegrationId,
    pub part_number: &'a str,
    pub supplier: &'a str,
}
