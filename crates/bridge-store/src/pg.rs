//! Postgres store implementations (sqlx, runtime-checked queries).

use crate::{
    AuditStore, EmitStatus, EmittedEventRecord, MappingStore, NewEmittedEvent, StoreError,
    SyncState, SyncStatePatch, SyncStateStore,
};
use async_trait::async_trait;
use labelmap::{Direction, LabelMapping};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Embedded schema migrations for the three bridge-owned tables.
pub fn migrator() -> &'static sqlx::migrate::Migrator {
    static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();
    &MIGRATOR
}

fn sync_state_from_row(row: &PgRow) -> Result<SyncState, StoreError> {
    Ok(SyncState {
        tenant_id: row.try_get("tenant_id")?,
        last_synced_cursor: row.try_get("last_synced_cursor")?,
        last_synced_at: row.try_get("last_synced_at")?,
        sync_enabled: row.try_get("sync_enabled")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// [`SyncStateStore`] over the `event_sync_state` table.
#[derive(Debug, Clone)]
pub struct PgSyncStateStore {
    pool: PgPool,
}

impl PgSyncStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SyncStateStore for PgSyncStateStore {
    async fn get(&self, tenant_id: &str) -> Result<Option<SyncState>, StoreError> {
        let row = sqlx::query("SELECT * FROM event_sync_state WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(sync_state_from_row).transpose()
    }

    async fn upsert(
        &self,
        tenant_id: &str,
        patch: SyncStatePatch,
    ) -> Result<SyncState, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO event_sync_state
                (tenant_id, last_synced_cursor, last_synced_at, sync_enabled)
            VALUES ($1, $2, $3, COALESCE($4, TRUE))
            ON CONFLICT (tenant_id) DO UPDATE SET
                last_synced_cursor = COALESCE($2, event_sync_state.last_synced_cursor),
                last_synced_at = COALESCE($3, event_sync_state.last_synced_at),
                sync_enabled = COALESCE($4, event_sync_state.sync_enabled),
                updated_at = now()
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(patch.last_synced_cursor)
        .bind(patch.last_synced_at)
        .bind(patch.sync_enabled)
        .fetch_one(&self.pool)
        .await?;
        sync_state_from_row(&row)
    }

    async fn list_enabled_tenants(&self) -> Result<Vec<String>, StoreError> {
        let rows =
            sqlx::query("SELECT tenant_id FROM event_sync_state WHERE sync_enabled ORDER BY tenant_id")
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(|r| Ok(r.try_get("tenant_id")?)).collect()
    }
}

/// [`MappingStore`] over the `label_mappings` table.
#[derive(Debug, Clone)]
pub struct PgMappingStore {
    pool: PgPool,
}

impl PgMappingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MappingStore for PgMappingStore {
    async fn list(&self, tenant_id: &str) -> Result<Vec<LabelMapping>, StoreError> {
        let rows = sqlx::query(
            "SELECT policy_type, label_value, direction FROM label_mappings \
             WHERE tenant_id = $1 ORDER BY created_at, id",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let direction: String = row.try_get("direction")?;
                Ok(LabelMapping {
                    policy_type: row.try_get("policy_type")?,
                    label_value: row.try_get("label_value")?,
                    direction: Direction::parse(&direction).ok_or_else(|| {
                        StoreError::Corrupt(format!("unknown direction {direction:?}"))
                    })?,
                })
            })
            .collect()
    }

    async fn upsert(&self, tenant_id: &str, mapping: LabelMapping) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO label_mappings (id, tenant_id, policy_type, label_value, direction)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tenant_id, policy_type, label_value)
                DO UPDATE SET direction = EXCLUDED.direction
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(&mapping.policy_type)
        .bind(&mapping.label_value)
        .bind(mapping.direction.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(
        &self,
        tenant_id: &str,
        policy_type: &str,
        label_value: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "DELETE FROM label_mappings \
             WHERE tenant_id = $1 AND policy_type = $2 AND label_value = $3",
        )
        .bind(tenant_id)
        .bind(policy_type)
        .bind(label_value)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn audit_from_row(row: &PgRow) -> Result<EmittedEventRecord, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(EmittedEventRecord {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        event_type: row.try_get("event_type")?,
        subject_did: row.try_get("subject_did")?,
        subject_uri: row.try_get("subject_uri")?,
        platform_action_id: row.try_get("platform_action_id")?,
        platform_correlation_id: row.try_get("platform_correlation_id")?,
        external_response: row.try_get("external_response")?,
        status: EmitStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown status {status:?}")))?,
        error: row.try_get("error")?,
        retry_count: row.try_get("retry_count")?,
        created_at: row.try_get("created_at")?,
    })
}

/// [`AuditStore`] over the `emitted_events` table.
#[derive(Debug, Clone)]
pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn insert_pending(&self, record: NewEmittedEvent) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO emitted_events
                (id, tenant_id, event_type, subject_did, subject_uri,
                 platform_action_id, platform_correlation_id, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'PENDING')
            "#,
        )
        .bind(id)
        .bind(&record.tenant_id)
        .bind(&record.event_type)
        .bind(&record.subject_did)
        .bind(&record.subject_uri)
        .bind(&record.platform_action_id)
        .bind(&record.platform_correlation_id)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn mark_success(&self, id: Uuid, response: JsonValue) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE emitted_events \
             SET status = 'SUCCESS', external_response = $2, error = NULL WHERE id = $1",
        )
        .bind(id)
        .bind(response)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_retryable(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE emitted_events \
             SET status = 'RETRYABLE_ERROR', error = $2, retry_count = retry_count + 1 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<EmittedEventRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM emitted_events WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(audit_from_row).transpose()
    }

    async fn list_for_tenant(
        &self,
        tenant_id: &str,
        status: Option<EmitStatus>,
    ) -> Result<Vec<EmittedEventRecord>, StoreError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM emitted_events \
                     WHERE tenant_id = $1 AND status = $2 ORDER BY created_at",
                )
                .bind(tenant_id)
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM emitted_events WHERE tenant_id = $1 ORDER BY created_at",
                )
                .bind(tenant_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(audit_from_row).collect()
    }
}
