//! Source-column to canonical-field mapping. A mapping is derived from the
//! integration configuration plus a table of common header aliases, so the
//! typical supplier export needs no explicit configuration at all.

use std::collections::BTreeMap;

/// Canonical Part fields a source column can map onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalField {
    PartNumber,
    Description,
    Brand,
    Supplier,
    Price,
    Quantity,
    DeliveryDays,
    Weight,
    Condition,
    Uom,
    Category,
    Subcategory,
    Origin,
}

impl CanonicalField {
    /// The config-facing name of the field, as used in `fieldMapping`.
    pub fn name(&self) -> &'static str {
        match self {
            CanonicalField::PartNumber => "partNumber",
            CanonicalField::Description => "description",
            CanonicalField::Brand => "brand",
            CanonicalField::Supplier => "supplier",
            CanonicalField::Price => "price",
            CanonicalField::Quantity => "quantity",
            CanonicalField::DeliveryDays => "deliveryDays",
            CanonicalField::Weight => "weight",
            CanonicalField::Condition => "condition",
            CanonicalField::Uom => "uom",
            CanonicalField::Category => "category",
            CanonicalField::Subcategory => "subcategory",
            CanonicalField::Origin => "origin",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let all = [
            CanonicalField::PartNumber,
            CanonicalField::Description,
            CanonicalField::Brand,
            CanonicalField::Supplier,
            CanonicalField::Price,
            CanonicalField::Quantity,
            CanonicalField::DeliveryDays,
            CanonicalField::Weight,
            CanonicalField::Condition,
            CanonicalField::Uom,
            CanonicalField::Category,
            CanonicalField::Subcategory,
            CanonicalField::Origin,
        ];
        all.into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(name))
    }
}

/// Header aliases recognized out of the box. Keys are normalized (lowercase,
/// separators stripped).
const ALIASES: &[(&str, CanonicalField)] = &[
    ("partnumber", CanonicalField::PartNumber),
    ("partno", CanonicalField::PartNumber),
    ("partnum", CanonicalField::PartNumber),
    ("part", CanonicalField::PartNumber),
    ("sku", CanonicalField::PartNumber),
    ("articlenumber", CanonicalField::PartNumber),
    ("itemnumber", CanonicalField::PartNumber),
    ("mpn", CanonicalField::PartNumber),
    ("description", CanonicalField::Description),
    ("desc", CanonicalField::Description),
    ("name", CanonicalField::Description),
    ("productname", CanonicalField::Description),
    ("title", CanonicalField::Description),
    ("brand", CanonicalField::Brand),
    ("manufacturer", CanonicalField::Brand),
    ("make", CanonicalField::Brand),
    ("oem", CanonicalField::Brand),
    ("supplier", CanonicalField::Supplier),
    ("vendor", CanonicalField::Supplier),
    ("seller", CanonicalField::Supplier),
    ("price", CanonicalField::Price),
    ("unitprice", CanonicalField::Price),
    ("cost", CanonicalField::Price),
    ("listprice", CanonicalField::Price),
    ("quantity", CanonicalField::Quantity),
    ("qty", CanonicalField::Quantity),
    ("stock", CanonicalField::Quantity),
    ("onhand", CanonicalField::Quantity),
    ("available", CanonicalField::Quantity),
    ("deliverydays", CanonicalField::DeliveryDays),
    ("leadtime", CanonicalField::DeliveryDays),
    ("leadtimedays", CanonicalField::DeliveryDays),
    ("weight", CanonicalField::Weight),
    ("weightkg", CanonicalField::Weight),
    ("condition", CanonicalField::Condition),
    ("uom", CanonicalField::Uom),
    ("unit", CanonicalField::Uom),
    ("unitofmeasure", CanonicalField::Uom),
    ("category", CanonicalField::Category),
    ("productcategory", CanonicalField::Category),
    ("subcategory", CanonicalField::Subcategory),
    ("origin", CanonicalField::Origin),
    ("countryoforigin", CanonicalField::Origin),
    ("country", CanonicalField::Origin),
];

/// Resolves source headers to canonical fields. Headers that resolve to no
/// canonical field are preserved as passthrough attributes.
#[derive(Debug, Clone, Default)]
pub struct ColumnMapping {
    /// Explicit source-header → canonical-field overrides from the
    /// integration config. Checked before the alias table.
    overrides: BTreeMap<String, CanonicalField>,
}

impl ColumnMapping {
    /// Builds a mapping from config `fieldMapping` entries of the form
    /// source-header → canonical field name. Entries naming an unknown
    /// canonical field are ignored with a warning.
    pub fn with_overrides<'a>(
        entries: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> ColumnMapping {
        let mut overrides = BTreeMap::new();
        for (source, target) in entries {
            match CanonicalField::from_name(target) {
                Some(field) => {
                    overrides.insert(normalize(source), field);
                }
                None => {
                    tracing::warn!(source, target, "ignoring mapping to unknown canonical field");
                }
            }
        }
        ColumnMapping { overrides }
    }

    /// Resolve one source header.
    pub fn resolve(&self, header: &str) -> Option<CanonicalField> {
        let normalized = normalize(header);
        if let Some(field) = self.overrides.get(&normalized) {
            return Some(*field);
        }
        ALIASES
            .iter()
            .find(|(alias, _)| *alias == normalized)
            .map(|(_, field)| *field)
    }
}

fn normalize(header: &str) -> String {
    header
        .trim()
        .trim_start_matches('\u{feff}')
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-' | '.' | '#'))
        .flat_map(|c| c.to_lowercase())
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn common_aliases_resolve() {
        let mapping = ColumnMapping::default();
        assert_eq!(
            mapping.resolve("Part Number"),
            Some(CanonicalField::PartNumber)
        );
        assert_eq!(mapping.resolve("SKU"), Some(CanonicalField::PartNumber));
        assert_eq!(mapping.resolve("Unit_Price"), Some(CanonicalField::Price));
        assert_eq!(mapping.resolve("QTY"), Some(CanonicalField::Quantity));
        assert_eq!(
            mapping.resolve("Lead-Time"),
            Some(CanonicalField::DeliveryDays)
        );
        assert_eq!(mapping.resolve("unheard_of"), None);
    }

    #[test]
    fn overrides_win_over_aliases() {
        let mapping = ColumnMapping::with_overrides([("stock", "weight"), ("artnr", "partNumber")]);
        assert_eq!(mapping.resolve("Stock"), Some(CanonicalField::Weight));
        assert_eq!(mapping.resolve("ARTNR"), Some(CanonicalField::PartNumber));
        // Unmapped headers still use the alias table.
        assert_eq!(mapping.resolve("price"), Some(CanonicalField::Price));
    }

    #[test]
    fn unknown_canonical_targets_are_ignored() {
        let mapping = ColumnMapping::with_overrides([("col", "notAField")]);
        assert_eq!(mapping.resolve("col"), None);
    }
}
