//! In-memory store implementations for tests and embedded use.

use crate::{
    AuditStore, EmitStatus, EmittedEventRecord, MappingStore, NewEmittedEvent, StoreError,
    SyncState, SyncStatePatch, SyncStateStore,
};
use async_trait::async_trait;
use chrono::Utc;
use labelmap::LabelMapping;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// In-memory [`SyncStateStore`].
#[derive(Debug, Default)]
pub struct MemSyncStateStore {
    rows: Mutex<HashMap<String, SyncState>>,
}

impl MemSyncStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncStateStore for MemSyncStateStore {
    async fn get(&self, tenant_id: &str) -> Result<Option<SyncState>, StoreError> {
        Ok(self.rows.lock().expect("sync lock").get(tenant_id).cloned())
    }

    async fn upsert(
        &self,
        tenant_id: &str,
        patch: SyncStatePatch,
    ) -> Result<SyncState, StoreError> {
        let now = Utc::now();
        let mut rows = self.rows.lock().expect("sync lock");
        let state = rows
            .entry(tenant_id.to_owned())
            .and_modify(|s| {
                if let Some(cursor) = patch.last_synced_cursor.clone() {
                    s.last_synced_cursor = Some(cursor);
                }
                if let Some(at) = patch.last_synced_at {
                    s.last_synced_at = Some(at);
                }
                if let Some(enabled) = patch.sync_enabled {
                    s.sync_enabled = enabled;
                }
                s.updated_at = now;
            })
            .or_insert_with(|| SyncState {
                tenant_id: tenant_id.to_owned(),
                last_synced_cursor: patch.last_synced_cursor.clone(),
                last_synced_at: patch.last_synced_at,
                sync_enabled: patch.sync_enabled.unwrap_or(true),
                created_at: now,
                updated_at: now,
            });
        Ok(state.clone())
    }

    async fn list_enabled_tenants(&self) -> Result<Vec<String>, StoreError> {
        let rows = self.rows.lock().expect("sync lock");
        let mut tenants: Vec<String> = rows
            .values()
            .filter(|s| s.sync_enabled)
            .map(|s| s.tenant_id.clone())
            .collect();
        tenants.sort();
        Ok(tenants)
    }
}

/// In-memory [`MappingStore`].
#[derive(Debug, Default)]
pub struct MemMappingStore {
    rows: Mutex<HashMap<String, Vec<LabelMapping>>>,
}

impl MemMappingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MappingStore for MemMappingStore {
    async fn list(&self, tenant_id: &str) -> Result<Vec<LabelMapping>, StoreError> {
        Ok(self
            .rows
            .lock()
            .expect("mapping lock")
            .get(tenant_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn upsert(&self, tenant_id: &str, mapping: LabelMapping) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().expect("mapping lock");
        let tenant_rows = rows.entry(tenant_id.to_owned()).or_default();
        match tenant_rows.iter_mut().find(|m| {
            m.policy_type == mapping.policy_type && m.label_value == mapping.label_value
        }) {
            Some(existing) => existing.direction = mapping.direction,
            None => tenant_rows.push(mapping),
        }
        Ok(())
    }

    async fn delete(
        &self,
        tenant_id: &str,
        policy_type: &str,
        label_value: &str,
    ) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock().expect("mapping lock");
        let Some(tenant_rows) = rows.get_mut(tenant_id) else {
            return Ok(false);
        };
        let before = tenant_rows.len();
        tenant_rows
            .retain(|m| !(m.policy_type == policy_type && m.label_value == label_value));
        Ok(tenant_rows.len() != before)
    }
}

/// In-memory [`AuditStore`].
#[derive(Debug, Default)]
pub struct MemAuditStore {
    rows: Mutex<HashMap<Uuid, EmittedEventRecord>>,
}

impl MemAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for MemAuditStore {
    async fn insert_pending(&self, record: NewEmittedEvent) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let row = EmittedEventRecord {
            id,
            tenant_id: record.tenant_id,
            event_type: record.event_type,
            subject_did: record.subject_did,
            subject_uri: record.subject_uri,
            platform_action_id: record.platform_action_id,
            platform_correlation_id: record.platform_correlation_id,
            external_response: None,
            status: EmitStatus::Pending,
            error: None,
            retry_count: 0,
            created_at: Utc::now(),
        };
        self.rows.lock().expect("audit lock").insert(id, row);
        Ok(id)
    }

    async fn mark_success(&self, id: Uuid, response: JsonValue) -> Result<(), StoreError> {
        if let Some(row) = self.rows.lock().expect("audit lock").get_mut(&id) {
            row.status = EmitStatus::Success;
            row.external_response = Some(response);
            row.error = None;
        }
        Ok(())
    }

    async fn mark_retryable(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        if let Some(row) = self.rows.lock().expect("audit lock").get_mut(&id) {
            row.status = EmitStatus::RetryableError;
            row.error = Some(error.to_owned());
            row.retry_count += 1;
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<EmittedEventRecord>, StoreError> {
        Ok(self.rows.lock().expect("audit lock").get(&id).cloned())
    }

    async fn list_for_tenant(
        &self,
        tenant_id: &str,
        status: Option<EmitStatus>,
    ) -> Result<Vec<EmittedEventRecord>, StoreError> {
        let rows = self.rows.lock().expect("audit lock");
        let mut out: Vec<EmittedEventRecord> = rows
            .values()
            .filter(|r| r.tenant_id == tenant_id && status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        out.sort_by_key(|r| r.created_at);
        Ok(out)
    }
}
