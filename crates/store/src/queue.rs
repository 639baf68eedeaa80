//! The durable sync-request queue used in worker mode, plus the
//! append-only sync history. Claims are atomic `pending → processing`
//! transitions, so cooperating worker processes never double-run an
//! integration.

use crate::db::{PrimaryStore, StoreError};
use chrono::{DateTime, Utc};
use models::{IntegrationId, RequestStatus, SyncOutcome, SyncRequest};
use rusqlite::{params, OptionalExtension, Row};

fn request_status_text(status: RequestStatus) -> &'static str {
    match status {
        RequestStatus::Pending => "pending",
        RequestStatus::Processing => "processing",
        RequestStatus::Done => "done",
        RequestStatus::Failed => "failed",
    }
}

fn request_status_parse(text: &str) -> Result<RequestStatus, StoreError> {
    match text {
        "pending" => Ok(RequestStatus::Pending),
        "processing" => Ok(RequestStatus::Processing),
        "done" => Ok(RequestStatus::Done),
        "failed" => Ok(RequestStatus::Failed),
        other => Err(StoreError::Corrupt(format!(
            "unknown sync request status {other:?}"
        ))),
    }
}

fn request_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, String, String, String, Option<String>)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn into_request(
    (id, integration_id, status, created_at, error): (i64, String, String, String, Option<String>),
    source: String,
) -> Result<SyncRequest, StoreError> {
    Ok(SyncRequest {
        id,
        integration_id: integration_id
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("bad integration id {integration_id:?}")))?,
        status: request_status_parse(&status)?,
        created_at: created_at
            .parse::<DateTime<Utc>>()
            .map_err(|err| StoreError::Corrupt(format!("bad created_at: {err}")))?,
        source,
        error,
    })
}

impl PrimaryStore {
    /// Enqueues a sync request unless one is already pending or processing
    /// for the integration. Returns the request id, or None when deduped.
    pub fn enqueue_sync_request(
        &self,
        integration_id: IntegrationId,
        source: &str,
    ) -> Result<Option<i64>, StoreError> {
        let inner = self.inner.lock();
        let existing: Option<i64> = inner
            .connection
            .query_row(
                "SELECT id FROM sync_requests
                 WHERE integration_id = ?1 AND status IN ('pending', 'processing')
                 LIMIT 1",
                params![integration_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Ok(None);
        }
        inner.connection.execute(
            "INSERT INTO sync_requests (integration_id, status, created_at, source)
             VALUES (?1, 'pending', ?2, ?3)",
            params![
                integration_id.to_string(),
                Utc::now().to_rfc3339(),
                source,
            ],
        )?;
        Ok(Some(inner.connection.last_insert_rowid()))
    }

    /// Atomically claims the oldest pending request, marking it
    /// `processing`.
    pub fn claim_sync_request(&self) -> Result<Option<SyncRequest>, StoreError> {
        let mut inner = self.inner.lock();
        let tx = inner.connection.transaction()?;
        let picked = tx
            .query_row(
                "SELECT id, integration_id, status, created_at, error, source
                 FROM sync_requests WHERE status = 'pending'
                 ORDER BY id LIMIT 1",
                [],
                |row| {
                    let source: String = row.get(5)?;
                    request_from_row(row).map(|tuple| (tuple, source))
                },
            )
            .optional()?;
        let Some((tuple, source)) = picked else {
            tx.commit()?;
            return Ok(None);
        };
        tx.execute(
            "UPDATE sync_requests SET status = 'processing' WHERE id = ?1",
            params![tuple.0],
        )?;
        tx.commit()?;

        let mut request = into_request(tuple, source)?;
        request.status = RequestStatus::Processing;
        Ok(Some(request))
    }

    /// Records the terminal status of a claimed request.
    pub fn finish_sync_request(
        &self,
        id: i64,
        status: RequestStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let inner = self.inner.lock();
        inner.connection.execute(
            "UPDATE sync_requests SET status = ?2, error = ?3 WHERE id = ?1",
            params![id, request_status_text(status), error],
        )?;
        Ok(())
    }

    pub fn pending_sync_requests(&self) -> Result<Vec<SyncRequest>, StoreError> {
        let inner = self.inner.lock();
        let mut stmt = inner.connection.prepare_cached(
            "SELECT id, integration_id, status, created_at, error, source
             FROM sync_requests WHERE status = 'pending' ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            let source: String = row.get(5)?;
            request_from_row(row).map(|tuple| (tuple, source))
        })?;
        let mut requests = Vec::new();
        for row in rows {
            let (tuple, source) = row?;
            requests.push(into_request(tuple, source)?);
        }
        Ok(requests)
    }

    /// Appends one run outcome to the audit log.
    pub fn append_sync_history(
        &self,
        integration_id: IntegrationId,
        started_at: DateTime<Utc>,
        outcome: &SyncOutcome,
    ) -> Result<(), StoreError> {
        let inner = self.inner.lock();
        inner.connection.execute(
            "INSERT INTO sync_history (integration_id, started_at, outcome)
             VALUES (?1, ?2, ?3)",
            params![
                integration_id.to_string(),
                started_at.to_rfc3339(),
                serde_json::to_string(outcome)?,
            ],
        )?;
        Ok(())
    }

    pub fn sync_history(
        &self,
        integration_id: IntegrationId,
        limit: u64,
    ) -> Result<Vec<SyncOutcome>, StoreError> {
        let inner = self.inner.lock();
        let mut stmt = inner.connection.prepare_cached(
            "SELECT outcome FROM sync_history WHERE integration_id = ?1
             ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            params![integration_id.to_string(), limit as i64],
            |row| {
                let outcome: String = row.get(0)?;
                Ok(outcome)
            },
        )?;
        let mut outcomes = Vec::new();
        for row in rows {
            outcomes.push(serde_json::from_str(&row?)?);
        }
        Ok(outcomes)
    }
}
