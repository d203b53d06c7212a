//! Persistence owned by the moderation bridge: per-tenant sync state,
//! label mapping rows, and the append-then-update audit trail of outbound
//! emissions. Each concern sits behind a trait with a Postgres
//! implementation for production and an in-memory one for tests and
//! embedding.

#![deny(unsafe_code)]

pub mod mem;
pub mod pg;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use labelmap::LabelMapping;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Per-tenant poll progress over the labeler's event stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncState {
    pub tenant_id: String,
    /// Opaque cursor from the labeler; `None` before the first successful
    /// poll. Only ever replaced by a cursor the labeler returned.
    pub last_synced_cursor: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Polling skips tenants where this is false.
    pub sync_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update for [`SyncState`]; absent fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SyncStatePatch {
    pub last_synced_cursor: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub sync_enabled: Option<bool>,
}

/// Sync-state persistence. `upsert` inserts on absence (with
/// `sync_enabled` defaulting to true) and otherwise updates only the
/// provided fields, always bumping `updated_at`.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    async fn get(&self, tenant_id: &str) -> Result<Option<SyncState>, StoreError>;
    async fn upsert(
        &self,
        tenant_id: &str,
        patch: SyncStatePatch,
    ) -> Result<SyncState, StoreError>;
    async fn list_enabled_tenants(&self) -> Result<Vec<String>, StoreError>;
}

/// Label-mapping persistence. Rows are unique per
/// `(tenant, policy_type, label_value)`; upserting an existing row updates
/// its direction only.
#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn list(&self, tenant_id: &str) -> Result<Vec<LabelMapping>, StoreError>;
    async fn upsert(&self, tenant_id: &str, mapping: LabelMapping) -> Result<(), StoreError>;
    async fn delete(
        &self,
        tenant_id: &str,
        policy_type: &str,
        label_value: &str,
    ) -> Result<bool, StoreError>;
}

/// Delivery status of an audited emission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmitStatus {
    Pending,
    Success,
    RetryableError,
}

impl EmitStatus {
    /// Canonical text form, as persisted in the audit table.
    pub fn as_str(self) -> &'static str {
        match self {
            EmitStatus::Pending => "PENDING",
            EmitStatus::Success => "SUCCESS",
            EmitStatus::RetryableError => "RETRYABLE_ERROR",
        }
    }

    /// Parse the canonical text form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(EmitStatus::Pending),
            "SUCCESS" => Some(EmitStatus::Success),
            "RETRYABLE_ERROR" => Some(EmitStatus::RetryableError),
            _ => None,
        }
    }
}

/// Request-side fields of an emission, captured before the remote call.
#[derive(Debug, Clone, Default)]
pub struct NewEmittedEvent {
    pub tenant_id: String,
    pub event_type: String,
    pub subject_did: Option<String>,
    pub subject_uri: Option<String>,
    pub platform_action_id: Option<String>,
    pub platform_correlation_id: Option<String>,
}

/// One audited emission attempt. Inserted PENDING before the network call
/// and transitioned exactly once to SUCCESS or RETRYABLE_ERROR; never
/// deleted by the bridge.
#[derive(Debug, Clone, Serialize)]
pub struct EmittedEventRecord {
    pub id: Uuid,
    pub tenant_id: String,
    pub event_type: String,
    pub subject_did: Option<String>,
    pub subject_uri: Option<String>,
    pub platform_action_id: Option<String>,
    pub platform_correlation_id: Option<String>,
    pub external_response: Option<JsonValue>,
    pub status: EmitStatus,
    pub error: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
}

/// Audit persistence. Mark operations are last-write-wins and tolerate
/// unknown ids (a crashed emitter may race a reconciler).
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Insert a PENDING row; returns the generated id.
    async fn insert_pending(&self, record: NewEmittedEvent) -> Result<Uuid, StoreError>;
    /// Transition to SUCCESS, storing the labeler response.
    async fn mark_success(&self, id: Uuid, response: JsonValue) -> Result<(), StoreError>;
    /// Transition to RETRYABLE_ERROR, storing the error and bumping the
    /// failure counter.
    async fn mark_retryable(&self, id: Uuid, error: &str) -> Result<(), StoreError>;
    /// Fetch one record.
    async fn get(&self, id: Uuid) -> Result<Option<EmittedEventRecord>, StoreError>;
    /// List a tenant's records, optionally filtered by status. This is the
    /// read path of the external retry reconciler.
    async fn list_for_tenant(
        &self,
        tenant_id: &str,
        status: Option<EmitStatus>,
    ) -> Result<Vec<EmittedEventRecord>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text_roundtrip() {
        for s in [EmitStatus::Pending, EmitStatus::Success, EmitStatus::RetryableError] {
            assert_eq!(EmitStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(EmitStatus::parse("DONE"), None);
    }
}
