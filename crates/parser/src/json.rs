//! Normalization of JSON records pulled from API feeds. The same
//! validation rules apply as for file rows; only the source shape differs.

use crate::mapping::{CanonicalField, ColumnMapping};
use crate::parse::{parse_price, parse_quantity, RecordContext};
use models::{Part, Price};
use serde_json::Value;
use std::collections::BTreeMap;

/// Maps one API record onto a canonical Part.
///
/// With a non-empty `field_mapping` (source dot-path → canonical field
/// name), only mapped paths feed canonical fields and every unmapped
/// top-level key is preserved as an attribute. With an empty mapping, the
/// record's own keys are resolved through the standard header aliases.
pub fn map_json_record(
    record: &Value,
    field_mapping: &BTreeMap<String, String>,
    ctx: &RecordContext,
) -> Result<Part, String> {
    let Value::Object(fields) = record else {
        return Err(format!("record is not an object: {record}"));
    };

    let mut assignments: Vec<(CanonicalField, &Value)> = Vec::new();
    let mut consumed_keys: Vec<&str> = Vec::new();

    if field_mapping.is_empty() {
        let aliases = ColumnMapping::default();
        for (key, value) in fields {
            if let Some(field) = aliases.resolve(key) {
                assignments.push((field, value));
                consumed_keys.push(key.as_str());
            }
        }
    } else {
        for (source_path, target) in field_mapping {
            let Some(field) = CanonicalField::from_name(target) else {
                tracing::warn!(
                    source_path,
                    target,
                    "ignoring mapping to unknown canonical field"
                );
                continue;
            };
            let Some(value) = project(record, source_path) else {
                continue;
            };
            assignments.push((field, value));
            // The whole top-level subtree the path descends into is
            // considered consumed.
            if let Some(head) = source_path.split('.').next() {
                consumed_keys.push(head);
            }
        }
    }

    let mut part = Part {
        part_number: String::new(),
        description: String::new(),
        brand: String::new(),
        supplier: String::new(),
        price: None,
        quantity: 0,
        delivery_days: None,
        weight: None,
        condition: None,
        uom: None,
        category: None,
        subcategory: None,
        origin: None,
        attributes: BTreeMap::new(),
        integration_id: ctx.integration_id,
        integration_name: ctx.integration_name.clone(),
        imported_at: ctx.now,
        last_updated: ctx.now,
    };

    for (field, value) in assignments {
        apply(&mut part, field, value, ctx)?;
    }

    if part.part_number.is_empty() {
        return Err("missing part number".to_string());
    }

    for (key, value) in fields {
        if !consumed_keys.contains(&key.as_str()) && !value.is_null() {
            part.attributes.insert(key.clone(), value.clone());
        }
    }
    Ok(part)
}

fn apply(
    part: &mut Part,
    field: CanonicalField,
    value: &Value,
    ctx: &RecordContext,
) -> Result<(), String> {
    if value.is_null() {
        return Ok(());
    }
    match field {
        CanonicalField::PartNumber => {
            if let Some(s) = scalar_string(value) {
                part.part_number = s.trim().to_uppercase();
            }
        }
        CanonicalField::Description => part.description = string_of(value),
        CanonicalField::Brand => part.brand = string_of(value),
        CanonicalField::Supplier => part.supplier = string_of(value),
        CanonicalField::Price => {
            let amount = match value {
                Value::Number(n) => parse_price(&n.to_string()),
                Value::String(s) if s.trim().is_empty() => return Ok(()),
                Value::String(s) => parse_price(s),
                _ => None,
            }
            .ok_or_else(|| format!("invalid price {value}"))?;
            part.price = Some(Price {
                amount,
                currency: ctx.currency.clone(),
            });
        }
        CanonicalField::Quantity => {
            let quantity = match value {
                Value::Number(n) => parse_quantity(&n.to_string()),
                Value::String(s) if s.trim().is_empty() => return Ok(()),
                Value::String(s) => parse_quantity(s.trim()),
                _ => None,
            }
            .ok_or_else(|| format!("invalid quantity {value}"))?;
            part.quantity = quantity;
        }
        CanonicalField::DeliveryDays => {
            part.delivery_days = match value {
                Value::Number(n) => n.as_u64().map(|n| n as u32),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            };
        }
        CanonicalField::Weight => {
            part.weight = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }
            .filter(|w| *w >= 0.0);
        }
        CanonicalField::Condition => part.condition = non_empty(value),
        CanonicalField::Uom => part.uom = non_empty(value),
        CanonicalField::Category => part.category = non_empty(value),
        CanonicalField::Subcategory => part.subcategory = non_empty(value),
        CanonicalField::Origin => part.origin = non_empty(value),
    }
    Ok(())
}

fn project<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current = value;
    for key in path.split('.') {
        current = current.get(key)?;
    }
    Some(current)
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn string_of(value: &Value) -> String {
    scalar_string(value).unwrap_or_default().trim().to_string()
}

fn non_empty(value: &Value) -> Option<String> {
    let s = string_of(value);
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
