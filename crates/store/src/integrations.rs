use crate::db::{PrimaryStore, StoreError};
use models::{Integration, IntegrationId, IntegrationStatus};
use rusqlite::{params, OptionalExtension, Row};

fn integration_from_row(row: &Row<'_>) -> rusqlite::Result<Integration> {
    let document: String = row.get(0)?;
    serde_json::from_str(&document).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(err),
        )
    })
}

fn status_text(status: IntegrationStatus) -> &'static str {
    match status {
        IntegrationStatus::Active => "active",
        IntegrationStatus::Inactive => "inactive",
        IntegrationStatus::Syncing => "syncing",
        IntegrationStatus::Error => "error",
    }
}

impl PrimaryStore {
    /// Inserts or fully replaces one integration document.
    pub fn put_integration(&self, integration: &Integration) -> Result<(), StoreError> {
        let document = serde_json::to_string(integration)?;
        let inner = self.inner.lock();
        inner.connection.execute(
            "INSERT INTO integrations (id, name, status, document)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (id) DO UPDATE SET
                 name = excluded.name,
                 status = excluded.status,
                 document = excluded.document",
            params![
                integration.id.to_string(),
                integration.name,
                status_text(integration.status),
                document,
            ],
        )?;
        Ok(())
    }

    pub fn get_integration(
        &self,
        id: IntegrationId,
    ) -> Result<Option<Integration>, StoreError> {
        let inner = self.inner.lock();
        let integration = inner
            .connection
            .query_row(
                "SELECT document FROM integrations WHERE id = ?1",
                params![id.to_string()],
                integration_from_row,
            )
            .optional()?;
        Ok(integration)
    }

    pub fn list_integrations(&self) -> Result<Vec<Integration>, StoreError> {
        let inner = self.inner.lock();
        let mut stmt = inner
            .connection
            .prepare_cached("SELECT document FROM integrations ORDER BY name")?;
        let rows = stmt.query_map([], integration_from_row)?;
        let mut integrations = Vec::new();
        for row in rows {
            integrations.push(row?);
        }
        Ok(integrations)
    }

    /// Integrations whose denormalized status matches, used by the boot
    /// reconcile to find stale `syncing` records without parsing every
    /// document.
    pub fn list_integrations_by_status(
        &self,
        status: IntegrationStatus,
    ) -> Result<Vec<Integration>, StoreError> {
        let inner = self.inner.lock();
        let mut stmt = inner
            .connection
            .prepare_cached("SELECT document FROM integrations WHERE status = ?1")?;
        let rows = stmt.query_map(params![status_text(status)], integration_from_row)?;
        let mut integrations = Vec::new();
        for row in rows {
            integrations.push(row?);
        }
        Ok(integrations)
    }

    /// Removes the integration record itself. Part and search cleanup is
    /// the engine's job.
    pub fn delete_integration(&self, id: IntegrationId) -> Result<bool, StoreError> {
        let inner = self.inner.lock();
        let deleted = inner.connection.execute(
            "DELETE FROM integrations WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(deleted > 0)
    }
}
