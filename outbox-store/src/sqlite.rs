//! SQLite implementation of the [`SyncStore`] contract.
//!
//! A single file (or in-memory database for tests) holds all four
//! collections. Access goes through one mutex-guarded connection; each
//! operation is a single statement or a short read-modify-write under the
//! lock, which gives the single-record atomicity the contract asks for.

use crate::error::{StoreError, StoreResult};
use crate::store::{ActionEntry, SyncStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use outbox_types::{
    CacheEntry, CacheId, ConflictId, ConflictRecord, ConflictResolution, MutationId, MutationKind,
    MutationRecord, MutationStatus, MutationUpdate,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Durable queue store backed by SQLite.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Unavailable(format!("failed to open queue store: {e}")))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            StoreError::Unavailable(format!("failed to open in-memory queue store: {e}"))
        })?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.lock();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sync_queue (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                payload TEXT,
                created_at TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                last_error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_sync_queue_status ON sync_queue(status);
            CREATE INDEX IF NOT EXISTS idx_sync_queue_created_at ON sync_queue(created_at);
            CREATE INDEX IF NOT EXISTS idx_sync_queue_entity_type ON sync_queue(entity_type);

            CREATE TABLE IF NOT EXISTS cached_data (
                id TEXT PRIMARY KEY,
                entity_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                cached_at TEXT NOT NULL,
                expires_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_cached_data_entity_type ON cached_data(entity_type);

            CREATE TABLE IF NOT EXISTS conflicts (
                id TEXT PRIMARY KEY,
                mutation_id TEXT,
                local_payload TEXT NOT NULL,
                remote_payload TEXT NOT NULL,
                detected_at TEXT NOT NULL,
                resolved INTEGER NOT NULL DEFAULT 0,
                resolution TEXT,
                merged_payload TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_conflicts_resolved ON conflicts(resolved);

            CREATE TABLE IF NOT EXISTS offline_actions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                action TEXT NOT NULL,
                detail TEXT,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_offline_actions_timestamp ON offline_actions(timestamp);
            ",
        )
        .map_err(|e| StoreError::Unavailable(format!("failed to init queue schema: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned mutex means a panic mid-statement; the connection is
        // still usable for independent statements.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_timestamp(s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow(format!("invalid timestamp {s:?}: {e}")))
}

fn parse_payload(s: &str) -> StoreResult<Value> {
    serde_json::from_str(s).map_err(|e| StoreError::CorruptRow(format!("invalid payload: {e}")))
}

type QueueRow = (
    String,
    String,
    String,
    Option<String>,
    String,
    i64,
    String,
    Option<String>,
);

fn queue_row_to_record(row: QueueRow) -> StoreResult<MutationRecord> {
    let (id, kind, entity_type, payload, created_at, retry_count, status, last_error) = row;
    Ok(MutationRecord {
        id: MutationId::parse(&id).map_err(|e| StoreError::CorruptRow(format!("{e}")))?,
        kind: kind
            .parse::<MutationKind>()
            .map_err(|e| StoreError::CorruptRow(format!("{e}")))?,
        entity_type,
        payload: payload.as_deref().map(parse_payload).transpose()?,
        created_at: parse_timestamp(&created_at)?,
        retry_count: retry_count as u32,
        status: status
            .parse::<MutationStatus>()
            .map_err(|e| StoreError::CorruptRow(format!("{e}")))?,
        last_error,
    })
}

type ConflictRow = (
    String,
    Option<String>,
    String,
    String,
    String,
    bool,
    Option<String>,
    Option<String>,
);

fn conflict_row_to_record(row: ConflictRow) -> StoreResult<ConflictRecord> {
    let (id, mutation_id, local, remote, detected_at, resolved, resolution, merged) = row;
    Ok(ConflictRecord {
        id: ConflictId::parse(&id).map_err(|e| StoreError::CorruptRow(format!("{e}")))?,
        mutation_id: mutation_id
            .as_deref()
            .map(|s| MutationId::parse(s).map_err(|e| StoreError::CorruptRow(format!("{e}"))))
            .transpose()?,
        local: parse_payload(&local)?,
        remote: parse_payload(&remote)?,
        detected_at: parse_timestamp(&detected_at)?,
        resolved,
        resolution: resolution
            .as_deref()
            .map(|s| {
                s.parse::<ConflictResolution>()
                    .map_err(|e| StoreError::CorruptRow(format!("{e}")))
            })
            .transpose()?,
        merged_payload: merged.as_deref().map(parse_payload).transpose()?,
    })
}

#[async_trait]
impl SyncStore for SqliteStore {
    async fn enqueue(
        &self,
        kind: MutationKind,
        entity_type: &str,
        payload: Option<Value>,
    ) -> StoreResult<MutationId> {
        if payload.is_none() && kind != MutationKind::Delete {
            return Err(StoreError::MissingPayload(kind.as_str()));
        }

        let record = MutationRecord::new(kind, entity_type, payload);
        let payload_json = record
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.lock();
        conn.execute(
            "INSERT INTO sync_queue (id, kind, entity_type, payload, created_at, retry_count, status, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL)",
            params![
                record.id.to_string(),
                record.kind.as_str(),
                record.entity_type,
                payload_json,
                record.created_at.to_rfc3339(),
                record.retry_count as i64,
                record.status.as_str(),
            ],
        )
        .map_err(|e| StoreError::Unavailable(format!("failed to enqueue mutation: {e}")))?;

        debug!(
            "Enqueued {} mutation {} for entity type {}",
            record.kind, record.id, record.entity_type
        );
        Ok(record.id)
    }

    async fn get(&self, id: MutationId) -> StoreResult<Option<MutationRecord>> {
        let conn = self.lock();
        let row: Option<QueueRow> = conn
            .query_row(
                "SELECT id, kind, entity_type, payload, created_at, retry_count, status, last_error
                 FROM sync_queue WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| StoreError::Unavailable(format!("failed to read mutation: {e}")))?;

        row.map(queue_row_to_record).transpose()
    }

    async fn list_by_status(&self, status: MutationStatus) -> StoreResult<Vec<MutationRecord>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, kind, entity_type, payload, created_at, retry_count, status, last_error
                 FROM sync_queue WHERE status = ?1 ORDER BY id",
            )
            .map_err(|e| StoreError::Unavailable(format!("failed to prepare queue query: {e}")))?;

        let rows = stmt
            .query_map(params![status.as_str()], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            })
            .map_err(|e| StoreError::Unavailable(format!("failed to query queue: {e}")))?;

        let mut result = Vec::new();
        for row in rows {
            let row: QueueRow =
                row.map_err(|e| StoreError::Unavailable(format!("failed to read queue row: {e}")))?;
            result.push(queue_row_to_record(row)?);
        }
        Ok(result)
    }

    async fn update(&self, id: MutationId, update: MutationUpdate) -> StoreResult<()> {
        let conn = self.lock();

        let existing: Option<(i64, String, Option<String>, Option<String>)> = conn
            .query_row(
                "SELECT retry_count, status, last_error, payload FROM sync_queue WHERE id = ?1",
                params![id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()
            .map_err(|e| StoreError::Unavailable(format!("failed to read mutation: {e}")))?;

        let (retry_count, status, last_error, payload) =
            existing.ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let retry_count = update.retry_count.map(i64::from).unwrap_or(retry_count);
        let status = update
            .status
            .map(|s| s.as_str().to_string())
            .unwrap_or(status);
        let last_error = match update.last_error {
            Some(change) => change,
            None => last_error,
        };
        let payload = match update.payload {
            Some(value) => Some(serde_json::to_string(&value)?),
            None => payload,
        };

        conn.execute(
            "UPDATE sync_queue SET retry_count = ?2, status = ?3, last_error = ?4, payload = ?5
             WHERE id = ?1",
            params![id.to_string(), retry_count, status, last_error, payload],
        )
        .map_err(|e| StoreError::Unavailable(format!("failed to update mutation: {e}")))?;
        Ok(())
    }

    async fn remove(&self, id: MutationId) -> StoreResult<()> {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM sync_queue WHERE id = ?1",
            params![id.to_string()],
        )
        .map_err(|e| StoreError::Unavailable(format!("failed to remove mutation: {e}")))?;
        Ok(())
    }

    async fn add_conflict(
        &self,
        local: Value,
        remote: Value,
        mutation_id: Option<MutationId>,
    ) -> StoreResult<ConflictId> {
        let mut record = ConflictRecord::new(local, remote);
        if let Some(mid) = mutation_id {
            record = record.with_mutation(mid);
        }
        let conn = self.lock();
        conn.execute(
            "INSERT INTO conflicts (id, mutation_id, local_payload, remote_payload, detected_at, resolved)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![
                record.id.to_string(),
                record.mutation_id.map(|m| m.to_string()),
                serde_json::to_string(&record.local)?,
                serde_json::to_string(&record.remote)?,
                record.detected_at.to_rfc3339(),
            ],
        )
        .map_err(|e| StoreError::Unavailable(format!("failed to add conflict: {e}")))?;

        debug!("Parked conflict {}", record.id);
        Ok(record.id)
    }

    async fn get_conflict(&self, id: ConflictId) -> StoreResult<Option<ConflictRecord>> {
        let conn = self.lock();
        let row: Option<ConflictRow> = conn
            .query_row(
                "SELECT id, mutation_id, local_payload, remote_payload, detected_at, resolved, resolution, merged_payload
                 FROM conflicts WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| StoreError::Unavailable(format!("failed to read conflict: {e}")))?;

        row.map(conflict_row_to_record).transpose()
    }

    async fn list_unresolved_conflicts(&self) -> StoreResult<Vec<ConflictRecord>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, mutation_id, local_payload, remote_payload, detected_at, resolved, resolution, merged_payload
                 FROM conflicts WHERE resolved = 0 ORDER BY detected_at",
            )
            .map_err(|e| StoreError::Unavailable(format!("failed to prepare conflict query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            })
            .map_err(|e| StoreError::Unavailable(format!("failed to query conflicts: {e}")))?;

        let mut result = Vec::new();
        for row in rows {
            let row: ConflictRow = row
                .map_err(|e| StoreError::Unavailable(format!("failed to read conflict row: {e}")))?;
            result.push(conflict_row_to_record(row)?);
        }
        Ok(result)
    }

    async fn resolve_conflict(
        &self,
        id: ConflictId,
        resolution: ConflictResolution,
        merged_payload: Option<Value>,
    ) -> StoreResult<()> {
        let conn = self.lock();

        let resolved: Option<bool> = conn
            .query_row(
                "SELECT resolved FROM conflicts WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::Unavailable(format!("failed to read conflict: {e}")))?;

        match resolved {
            None => return Err(StoreError::NotFound(id.to_string())),
            Some(true) => return Err(StoreError::AlreadyResolved(id.to_string())),
            Some(false) => {}
        }

        let merged_json = merged_payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            "UPDATE conflicts SET resolved = 1, resolution = ?2, merged_payload = ?3 WHERE id = ?1",
            params![id.to_string(), resolution.as_str(), merged_json],
        )
        .map_err(|e| StoreError::Unavailable(format!("failed to resolve conflict: {e}")))?;

        debug!("Resolved conflict {} as {}", id, resolution);
        Ok(())
    }

    async fn cache(
        &self,
        entity_type: &str,
        payload: Value,
        ttl_minutes: Option<i64>,
    ) -> StoreResult<CacheId> {
        let id = CacheId::new();
        let now = Utc::now();
        let expires_at = ttl_minutes.map(|m| now + Duration::minutes(m));

        let conn = self.lock();
        conn.execute(
            "INSERT INTO cached_data (id, entity_type, payload, cached_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.to_string(),
                entity_type,
                serde_json::to_string(&payload)?,
                now.to_rfc3339(),
                expires_at.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(|e| StoreError::Unavailable(format!("failed to write cache entry: {e}")))?;
        Ok(id)
    }

    async fn read_cache(&self, entity_type: &str) -> StoreResult<Vec<CacheEntry>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, entity_type, payload, cached_at, expires_at
                 FROM cached_data WHERE entity_type = ?1 ORDER BY cached_at",
            )
            .map_err(|e| StoreError::Unavailable(format!("failed to prepare cache query: {e}")))?;

        let rows = stmt
            .query_map(params![entity_type], |row| {
                let id: String = row.get(0)?;
                let entity_type: String = row.get(1)?;
                let payload: String = row.get(2)?;
                let cached_at: String = row.get(3)?;
                let expires_at: Option<String> = row.get(4)?;
                Ok((id, entity_type, payload, cached_at, expires_at))
            })
            .map_err(|e| StoreError::Unavailable(format!("failed to query cache: {e}")))?;

        let now = Utc::now();
        let mut result = Vec::new();
        for row in rows {
            let (id, entity_type, payload, cached_at, expires_at) = row
                .map_err(|e| StoreError::Unavailable(format!("failed to read cache row: {e}")))?;
            let entry = CacheEntry {
                id: CacheId::parse(&id).map_err(|e| StoreError::CorruptRow(format!("{e}")))?,
                entity_type,
                payload: parse_payload(&payload)?,
                cached_at: parse_timestamp(&cached_at)?,
                expires_at: expires_at.as_deref().map(parse_timestamp).transpose()?,
            };
            // Expiry is enforced at read time; stale rows stay on disk until
            // evict_expired runs.
            if !entry.is_expired_at(now) {
                result.push(entry);
            }
        }
        Ok(result)
    }

    async fn evict_expired(&self) -> StoreResult<usize> {
        let conn = self.lock();
        let removed = conn
            .execute(
                "DELETE FROM cached_data WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                params![Utc::now().to_rfc3339()],
            )
            .map_err(|e| StoreError::Unavailable(format!("failed to evict cache: {e}")))?;
        Ok(removed)
    }

    async fn record_action(&self, action: &str, detail: Option<&str>) -> StoreResult<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO offline_actions (action, detail, timestamp) VALUES (?1, ?2, ?3)",
            params![action, detail, Utc::now().to_rfc3339()],
        )
        .map_err(|e| StoreError::Unavailable(format!("failed to record action: {e}")))?;
        Ok(())
    }

    async fn recent_actions(&self, limit: usize) -> StoreResult<Vec<ActionEntry>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, action, detail, timestamp FROM offline_actions
                 ORDER BY id DESC LIMIT ?1",
            )
            .map_err(|e| StoreError::Unavailable(format!("failed to prepare action query: {e}")))?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                let id: i64 = row.get(0)?;
                let action: String = row.get(1)?;
                let detail: Option<String> = row.get(2)?;
                let timestamp: String = row.get(3)?;
                Ok((id, action, detail, timestamp))
            })
            .map_err(|e| StoreError::Unavailable(format!("failed to query actions: {e}")))?;

        let mut result = Vec::new();
        for row in rows {
            let (id, action, detail, timestamp) = row
                .map_err(|e| StoreError::Unavailable(format!("failed to read action row: {e}")))?;
            result.push(ActionEntry {
                id,
                action,
                detail,
                timestamp: parse_timestamp(&timestamp)?,
            });
        }
        Ok(result)
    }

    async fn clear_all(&self) -> StoreResult<()> {
        let conn = self.lock();
        conn.execute_batch(
            "DELETE FROM sync_queue;
             DELETE FROM cached_data;
             DELETE FROM conflicts;
             DELETE FROM offline_actions;",
        )
        .map_err(|e| StoreError::Unavailable(format!("failed to clear store: {e}")))?;
        Ok(())
    }
}
