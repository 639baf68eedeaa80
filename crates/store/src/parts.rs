use crate::db::{PrimaryStore, StoreError, WriteSummary};
use bigdecimal::ToPrimitive;
use chrono::{DateTime, Utc};
use models::{IntegrationId, Part, SearchRequest, SearchSort};
use rusqlite::{params, Connection, OptionalExtension, Row};

const SELECT_IMPORTED_AT: &str = r#"
SELECT imported_at FROM parts
WHERE integration_id = ?1 AND part_number = ?2 AND supplier = ?3
"#;

const INSERT_PART: &str = r#"
INSERT INTO parts (
    integration_id, part_number, supplier, description, brand,
    price, quantity, imported_at, last_updated, document
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
"#;

const UPDATE_PART: &str = r#"
UPDATE parts SET
    description = ?4, brand = ?5, price = ?6, quantity = ?7,
    imported_at = ?8, last_updated = ?9, document = ?10
WHERE integration_id = ?1 AND part_number = ?2 AND supplier = ?3
"#;

/// Applies one batch inside a single transaction. Inserts stamp
/// `imported_at`; updates preserve the original one and replace every
/// other canonical field.
pub(crate) fn apply_batch(
    connection: &mut Connection,
    parts: Vec<Part>,
) -> Result<WriteSummary, StoreError> {
    let mut summary = WriteSummary {
        acknowledged: true,
        ..Default::default()
    };
    let tx = connection.transaction()?;
    {
        let mut select = tx.prepare_cached(SELECT_IMPORTED_AT)?;
        let mut insert = tx.prepare_cached(INSERT_PART)?;
        let mut update = tx.prepare_cached(UPDATE_PART)?;

        for mut part in parts {
            let integration_id = part.integration_id.to_string();
            let existing: Option<String> = select
                .query_row(
                    params![integration_id, part.part_number, part.supplier],
                    |row| row.get(0),
                )
                .optional()?;

            let price = part
                .price
                .as_ref()
                .and_then(|p| p.amount.to_f64());
            match existing {
                Some(imported_at) => {
                    // Keep the original import instant on the document too.
                    if let Ok(original) = imported_at.parse::<DateTime<Utc>>() {
                        part.imported_at = original;
                    }
                    let document = serde_json::to_string(&part)?;
                    update.execute(params![
                        integration_id,
                        part.part_number,
                        part.supplier,
                        part.description,
                        part.brand,
                        price,
                        part.quantity as i64,
                        imported_at,
                        part.last_updated.to_rfc3339(),
                        document,
                    ])?;
                    summary.updated += 1;
                }
                None => {
                    let document = serde_json::to_string(&part)?;
                    insert.execute(params![
                        integration_id,
                        part.part_number,
                        part.supplier,
                        part.description,
                        part.brand,
                        price,
                        part.quantity as i64,
                        part.imported_at.to_rfc3339(),
                        part.last_updated.to_rfc3339(),
                        document,
                    ])?;
                    summary.inserted += 1;
                }
            }
        }
    }
    tx.commit()?;
    Ok(summary)
}

fn part_from_row(row: &Row<'_>) -> rusqlite::Result<Part> {
    let document: String = row.get(0)?;
    serde_json::from_str(&document).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(err),
        )
    })
}

impl PrimaryStore {
    /// Deletes every part belonging to the integration, returning the
    /// number removed.
    pub fn delete_parts_by_integration(
        &self,
        integration_id: IntegrationId,
    ) -> Result<u64, StoreError> {
        let inner = self.inner.lock();
        let deleted = inner.connection.execute(
            "DELETE FROM parts WHERE integration_id = ?1",
            params![integration_id.to_string()],
        )?;
        Ok(deleted as u64)
    }

    pub fn count_parts(&self, integration_id: IntegrationId) -> Result<u64, StoreError> {
        let inner = self.inner.lock();
        let count: i64 = inner.connection.query_row(
            "SELECT COUNT(*) FROM parts WHERE integration_id = ?1",
            params![integration_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn get_part(
        &self,
        integration_id: IntegrationId,
        part_number: &str,
        supplier: &str,
    ) -> Result<Option<Part>, StoreError> {
        let inner = self.inner.lock();
        let part = inner
            .connection
            .query_row(
                "SELECT document FROM parts
                 WHERE integration_id = ?1 AND part_number = ?2 AND supplier = ?3",
                params![integration_id.to_string(), part_number, supplier],
                part_from_row,
            )
            .optional()?;
        Ok(part)
    }

    /// One page of an integration's parts in stable key order, for the
    /// deferred reindex scan.
    pub fn parts_for_integration(
        &self,
        integration_id: IntegrationId,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Part>, StoreError> {
        let inner = self.inner.lock();
        let mut stmt = inner.connection.prepare_cached(
            "SELECT document FROM parts WHERE integration_id = ?1
             ORDER BY part_number, supplier LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(
            params![integration_id.to_string(), limit as i64, offset as i64],
            part_from_row,
        )?;
        let mut parts = Vec::new();
        for row in rows {
            parts.push(row?);
        }
        Ok(parts)
    }

    /// Degraded-mode part search, used while the search store has no
    /// documents. Same filter semantics as the indexer, over a `LIKE` scan.
    pub fn search_parts(
        &self,
        request: &SearchRequest,
    ) -> Result<(Vec<Part>, u64), StoreError> {
        let (page, limit) = request.clamped();

        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        let query = request.query.trim();
        if !query.is_empty() {
            args.push(Box::new(format!("%{query}%")));
            let n = args.len();
            clauses.push(format!(
                "(part_number LIKE ?{n} OR description LIKE ?{n} OR brand LIKE ?{n})"
            ));
        }
        if let Some(brand) = &request.brand {
            args.push(Box::new(brand.clone()));
            clauses.push(format!("brand = ?{} COLLATE NOCASE", args.len()));
        }
        if let Some(supplier) = &request.supplier {
            args.push(Box::new(supplier.clone()));
            clauses.push(format!("supplier = ?{} COLLATE NOCASE", args.len()));
        }
        if let Some(min) = request.min_price {
            args.push(Box::new(min));
            clauses.push(format!("price >= ?{}", args.len()));
        }
        if let Some(max) = request.max_price {
            args.push(Box::new(max));
            clauses.push(format!("price <= ?{}", args.len()));
        }
        if request.in_stock {
            clauses.push("quantity > 0".to_string());
        }
        let filter = if clauses.is_empty() {
            "1 = 1".to_string()
        } else {
            clauses.join(" AND ")
        };

        let order = match request.sort {
            SearchSort::Relevance => "part_number ASC",
            SearchSort::PriceAsc => "price ASC NULLS LAST",
            SearchSort::PriceDesc => "price DESC NULLS LAST",
            SearchSort::Newest => "last_updated DESC",
        };

        let inner = self.inner.lock();
        let total: i64 = inner.connection.query_row(
            &format!("SELECT COUNT(*) FROM parts WHERE {filter}"),
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT document FROM parts WHERE {filter} ORDER BY {order} LIMIT {limit} OFFSET {}",
            (page - 1) * limit,
        );
        let mut stmt = inner.connection.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            part_from_row,
        )?;
        let mut parts = Vec::new();
        for row in rows {
            parts.push(row?);
        }
        Ok((parts, total as u64))
    }
}
