//! Bidirectional moderation-event bridge between the platform and a
//! tenant's external labeler.
//!
//! [`BridgeService`] is the public façade: it emits platform moderation
//! decisions to the labeler with a durable audit record per attempt,
//! advances the per-tenant poll cursor over the labeler's event stream,
//! classifies inbound events, and owns the tenant-scoped label-mapping and
//! sync-state CRUD. The long-running poll loop lives in [`scheduler`];
//! the review-queue collaborator contract in [`queue`].

#![deny(unsafe_code)]

pub mod queue;
pub mod scheduler;

use bridge_core::credential::{CredentialError, CredentialStore};
use bridge_core::event::{ClassifiedEvent, ExternalEvent, ModEvent};
use bridge_core::subject::{did_from_at_uri, SubjectRef};
use bridge_store::{
    AuditStore, MappingStore, NewEmittedEvent, StoreError, SyncState, SyncStatePatch,
    SyncStateStore,
};
use chrono::Utc;
use labelmap::LabelMapping;
use ozone_client::{
    ClientError, EmitEventRequest, HealthResponse, OzoneClient, QueryEventsParams, SortDirection,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Page size for each `queryEvents` poll.
const POLL_PAGE_LIMIT: u32 = 100;

/// Errors surfaced by the bridge façade.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("tenant {0} has no external labeler credential")]
    NotConfigured(String),
    #[error("credential store: {0}")]
    Credentials(#[from] CredentialError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] queue::QueueError),
}

/// Outbound event kinds the platform can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EmitKind {
    Label,
    Takedown,
    ReverseTakedown,
    Comment,
    Acknowledge,
    Escalate,
}

impl EmitKind {
    /// Canonical text form, as recorded in the audit trail.
    pub fn as_str(self) -> &'static str {
        match self {
            EmitKind::Label => "label",
            EmitKind::Takedown => "takedown",
            EmitKind::ReverseTakedown => "reverseTakedown",
            EmitKind::Comment => "comment",
            EmitKind::Acknowledge => "acknowledge",
            EmitKind::Escalate => "escalate",
        }
    }
}

/// A platform policy reference attached to an emission, used for the
/// default comment text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRef {
    pub id: String,
    pub name: String,
}

/// Inputs for [`BridgeService::emit_event`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmitEventParams {
    pub tenant_id: String,
    pub event_type: EmitKind,
    /// Labels to create (label events).
    #[serde(default)]
    pub labels: Vec<String>,
    /// Labels to negate (label events).
    #[serde(default)]
    pub negate_labels: Option<Vec<String>>,
    /// Moderator comment; a default is derived from `policies` when absent.
    #[serde(default)]
    pub comment: Option<String>,
    pub subject_did: String,
    /// Record AT-URI; when present the subject is a strong ref.
    #[serde(default)]
    pub subject_uri: Option<String>,
    pub platform_action_id: String,
    pub platform_correlation_id: String,
    #[serde(default)]
    pub policies: Vec<PolicyRef>,
    /// Takedown duration; permanent when absent.
    #[serde(default)]
    pub duration_in_hours: Option<i64>,
}

/// Result of one poll pass for a tenant.
#[derive(Debug, Clone, Default)]
pub struct PollOutcome {
    /// Events in the labeler's ascending order.
    pub events: Vec<ExternalEvent>,
    /// Cursor returned by the labeler, already persisted when present.
    pub new_cursor: Option<String>,
}

/// Public façade composing the credential store, the protocol client, the
/// label mapper, and the three bridge-owned stores. Every operation is
/// tenant-scoped.
#[derive(Clone)]
pub struct BridgeService {
    credentials: Arc<dyn CredentialStore>,
    sync_state: Arc<dyn SyncStateStore>,
    mappings: Arc<dyn MappingStore>,
    audit: Arc<dyn AuditStore>,
}

impl BridgeService {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        sync_state: Arc<dyn SyncStateStore>,
        mappings: Arc<dyn MappingStore>,
        audit: Arc<dyn AuditStore>,
    ) -> Self {
        Self { credentials, sync_state, mappings, audit }
    }

    /// Whether the tenant has a labeler credential.
    pub async fn is_configured(&self, tenant_id: &str) -> Result<bool, BridgeError> {
        Ok(self.credentials.get(tenant_id).await?.is_some())
    }

    /// Tenants with syncing enabled, in stable order.
    pub async fn list_enabled_tenants(&self) -> Result<Vec<String>, BridgeError> {
        Ok(self.sync_state.list_enabled_tenants().await?)
    }

    /// Emit a moderation event to the tenant's labeler.
    ///
    /// A PENDING audit row is written before the network call; it is
    /// transitioned to SUCCESS or RETRYABLE_ERROR afterwards, and on
    /// failure the error is re-raised. The PENDING row is the
    /// reconciliation anchor for crashed emitters.
    #[instrument(skip_all, fields(tenant = %params.tenant_id, kind = params.event_type.as_str()))]
    pub async fn emit_event(&self, params: EmitEventParams) -> Result<(), BridgeError> {
        let credential = self
            .credentials
            .get(&params.tenant_id)
            .await?
            .ok_or_else(|| BridgeError::NotConfigured(params.tenant_id.clone()))?;

        let event = build_mod_event(&params);
        let subject = match &params.subject_uri {
            Some(uri) => SubjectRef::Strong { uri: uri.clone(), cid: String::new() },
            None => SubjectRef::Repo { did: params.subject_did.clone() },
        };

        let audit_id = self
            .audit
            .insert_pending(NewEmittedEvent {
                tenant_id: params.tenant_id.clone(),
                event_type: params.event_type.as_str().to_owned(),
                subject_did: Some(params.subject_did.clone()),
                subject_uri: params.subject_uri.clone(),
                platform_action_id: Some(params.platform_action_id.clone()),
                platform_correlation_id: Some(params.platform_correlation_id.clone()),
            })
            .await?;

        let attempt: Result<serde_json::Value, ClientError> = async {
            let client = OzoneClient::new(credential.clone())?;
            let request = EmitEventRequest {
                event,
                subject,
                created_by: credential.did.clone(),
                subject_blob_cids: None,
            };
            let response = client.emit_event(&request).await?;
            Ok(serde_json::to_value(&response)?)
        }
        .await;

        match attempt {
            Ok(response) => {
                self.audit.mark_success(audit_id, response).await?;
                info!(audit_id = %audit_id, "event emitted");
                Ok(())
            }
            Err(err) => {
                self.audit.mark_retryable(audit_id, &err.to_string()).await?;
                warn!(audit_id = %audit_id, error = %err, "event emission failed");
                Err(err.into())
            }
        }
    }

    /// Poll the tenant's event stream from the stored cursor.
    ///
    /// An unconfigured tenant, a missing sync-state row, or a disabled one
    /// all yield an empty outcome without error. The stored cursor is only
    /// replaced by a cursor the labeler returned; a response carrying
    /// events but no cursor does not advance it.
    #[instrument(skip_all, fields(tenant = tenant_id))]
    pub async fn poll_events(&self, tenant_id: &str) -> Result<PollOutcome, BridgeError> {
        let Some(credential) = self.credentials.get(tenant_id).await? else {
            return Ok(PollOutcome::default());
        };
        let Some(state) = self.sync_state.get(tenant_id).await? else {
            return Ok(PollOutcome::default());
        };
        if !state.sync_enabled {
            return Ok(PollOutcome::default());
        }

        let client = OzoneClient::new(credential)?;
        let response = client
            .query_events(&QueryEventsParams {
                cursor: state.last_synced_cursor.clone(),
                limit: Some(POLL_PAGE_LIMIT),
                sort_direction: Some(SortDirection::Asc),
                ..Default::default()
            })
            .await?;

        if let Some(cursor) = &response.cursor {
            self.sync_state
                .upsert(
                    tenant_id,
                    SyncStatePatch {
                        last_synced_cursor: Some(cursor.clone()),
                        last_synced_at: Some(Utc::now()),
                        sync_enabled: None,
                    },
                )
                .await?;
            info!(
                from = state.last_synced_cursor.as_deref().unwrap_or("-"),
                to = cursor.as_str(),
                events = response.events.len(),
                "cursor advanced"
            );
        }

        Ok(PollOutcome { events: response.events, new_cursor: response.cursor })
    }

    /// Normalize an inbound event: category, labels, comment, and subject
    /// identifiers. Pure.
    pub fn classify_event(event: &ExternalEvent) -> ClassifiedEvent {
        let body = &event.event;
        let (subject_did, subject_uri) = match &event.subject {
            SubjectRef::Repo { did } => (Some(did.clone()), None),
            SubjectRef::Strong { uri, .. } => {
                (did_from_at_uri(uri).map(str::to_owned), Some(uri.clone()))
            }
        };
        ClassifiedEvent {
            category: labelmap::classify_event_type(&body.kind),
            labels: body.create_label_vals.clone().unwrap_or_default(),
            comment: body.comment.as_ref().and_then(|v| v.as_str()).map(str::to_owned),
            subject_did,
            subject_uri,
        }
    }

    /// The tenant's mapping rows as stored (possibly empty).
    pub async fn list_mappings(&self, tenant_id: &str) -> Result<Vec<LabelMapping>, BridgeError> {
        Ok(self.mappings.list(tenant_id).await?)
    }

    /// Insert or update a mapping row; an existing
    /// `(policy_type, label_value)` pair only changes direction.
    pub async fn upsert_mapping(
        &self,
        tenant_id: &str,
        mapping: LabelMapping,
    ) -> Result<(), BridgeError> {
        Ok(self.mappings.upsert(tenant_id, mapping).await?)
    }

    /// Delete a mapping row; returns whether one existed.
    pub async fn delete_mapping(
        &self,
        tenant_id: &str,
        policy_type: &str,
        label_value: &str,
    ) -> Result<bool, BridgeError> {
        Ok(self.mappings.delete(tenant_id, policy_type, label_value).await?)
    }

    /// The tenant's effective mapping table: its own rows, or the defaults
    /// when it has none.
    pub async fn effective_mappings(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<LabelMapping>, BridgeError> {
        let rows = self.mappings.list(tenant_id).await?;
        Ok(labelmap::effective(&rows).to_vec())
    }

    /// Tenant-scoped inbound translation.
    pub async fn labels_to_policies(
        &self,
        tenant_id: &str,
        labels: &[String],
    ) -> Result<Vec<String>, BridgeError> {
        let rows = self.effective_mappings(tenant_id).await?;
        Ok(labelmap::labels_to_policies(&rows, labels))
    }

    /// Tenant-scoped outbound translation.
    pub async fn policy_to_labels(
        &self,
        tenant_id: &str,
        policy_type: &str,
    ) -> Result<Vec<String>, BridgeError> {
        let rows = self.effective_mappings(tenant_id).await?;
        Ok(labelmap::policy_to_labels(&rows, policy_type))
    }

    /// The tenant's sync state, if any.
    pub async fn sync_state(&self, tenant_id: &str) -> Result<Option<SyncState>, BridgeError> {
        Ok(self.sync_state.get(tenant_id).await?)
    }

    /// Enable or disable polling for the tenant, creating the state row if
    /// needed.
    pub async fn set_sync_enabled(
        &self,
        tenant_id: &str,
        enabled: bool,
    ) -> Result<SyncState, BridgeError> {
        Ok(self
            .sync_state
            .upsert(
                tenant_id,
                SyncStatePatch { sync_enabled: Some(enabled), ..Default::default() },
            )
            .await?)
    }

    /// Probe the tenant's labeler `_health` endpoint.
    pub async fn health_check(&self, tenant_id: &str) -> Result<HealthResponse, BridgeError> {
        let credential = self
            .credentials
            .get(tenant_id)
            .await?
            .ok_or_else(|| BridgeError::NotConfigured(tenant_id.to_owned()))?;
        Ok(OzoneClient::new(credential)?.health_check().await?)
    }
}

fn build_mod_event(params: &EmitEventParams) -> ModEvent {
    let comment = params.comment.clone().unwrap_or_else(|| {
        let names: Vec<&str> = params.policies.iter().map(|p| p.name.as_str()).collect();
        format!("Platform moderation action: {}", names.join(", "))
    });
    match params.event_type {
        EmitKind::Label => ModEvent::Label {
            create_label_vals: params.labels.clone(),
            negate_label_vals: params.negate_labels.clone().unwrap_or_default(),
            comment,
        },
        EmitKind::Takedown => {
            ModEvent::Takedown { comment, duration_in_hours: params.duration_in_hours }
        }
        EmitKind::ReverseTakedown => ModEvent::ReverseTakedown { comment },
        // The comment event keeps the caller's text verbatim; an empty
        // comment is valid there and the derived default is not used.
        EmitKind::Comment => ModEvent::Comment {
            comment: params.comment.clone().unwrap_or_default(),
            sticky: false,
        },
        EmitKind::Acknowledge => ModEvent::Acknowledge { comment },
        EmitKind::Escalate => ModEvent::Escalate { comment },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_core::event::EventCategory;
    use serde_json::json;

    fn params(kind: EmitKind) -> EmitEventParams {
        EmitEventParams {
            tenant_id: "t1".into(),
            event_type: kind,
            labels: vec![],
            negate_labels: None,
            comment: None,
            subject_did: "did:plc:subject".into(),
            subject_uri: None,
            platform_action_id: "a1".into(),
            platform_correlation_id: "c1".into(),
            policies: vec![
                PolicyRef { id: "p1".into(), name: "Spam".into() },
                PolicyRef { id: "p2".into(), name: "Harassment".into() },
            ],
            duration_in_hours: None,
        }
    }

    #[test]
    fn default_comment_names_policies() {
        let ev = build_mod_event(&params(EmitKind::Acknowledge));
        assert_eq!(
            ev,
            ModEvent::Acknowledge {
                comment: "Platform moderation action: Spam, Harassment".into()
            }
        );
    }

    #[test]
    fn comment_event_defaults_to_empty_text() {
        let ev = build_mod_event(&params(EmitKind::Comment));
        assert_eq!(ev, ModEvent::Comment { comment: String::new(), sticky: false });
    }

    #[test]
    fn explicit_comment_wins() {
        let mut p = params(EmitKind::Escalate);
        p.comment = Some("urgent".into());
        assert_eq!(build_mod_event(&p), ModEvent::Escalate { comment: "urgent".into() });
    }

    #[test]
    fn label_event_carries_negations() {
        let mut p = params(EmitKind::Label);
        p.labels = vec!["spam".into()];
        p.negate_labels = Some(vec!["misleading".into()]);
        let ev = build_mod_event(&p);
        assert_eq!(
            ev,
            ModEvent::Label {
                create_label_vals: vec!["spam".into()],
                negate_label_vals: vec!["misleading".into()],
                comment: "Platform moderation action: Spam, Harassment".into(),
            }
        );
    }

    #[test]
    fn classify_strong_ref_report() {
        let event: ExternalEvent = serde_json::from_value(json!({
            "id": 9,
            "createdBy": "did:plc:reporter",
            "createdAt": "2024-05-01T12:00:00Z",
            "subject": {
                "$type": "com.atproto.repo.strongRef",
                "uri": "at://did:plc:C/app.bsky.feed.post/2",
                "cid": "bafyrei"
            },
            "event": {
                "$type": "tools.ozone.moderation.defs#modEventReport",
                "comment": "spammy reply"
            }
        }))
        .unwrap();
        let classified = BridgeService::classify_event(&event);
        assert_eq!(classified.category, Some(EventCategory::Report));
        assert!(classified.labels.is_empty());
        assert_eq!(classified.comment.as_deref(), Some("spammy reply"));
        assert_eq!(classified.subject_did.as_deref(), Some("did:plc:C"));
        assert_eq!(
            classified.subject_uri.as_deref(),
            Some("at://did:plc:C/app.bsky.feed.post/2")
        );
    }

    #[test]
    fn classify_drops_non_string_comment() {
        let event: ExternalEvent = serde_json::from_value(json!({
            "id": 10,
            "createdBy": "did:plc:mod",
            "createdAt": "2024-05-01T12:00:00Z",
            "subject": {"$type": "com.atproto.admin.defs#repoRef", "did": "did:plc:x"},
            "event": {
                "$type": "tools.ozone.moderation.defs#modEventLabel",
                "createLabelVals": ["spam"],
                "comment": {"nested": true}
            }
        }))
        .unwrap();
        let classified = BridgeService::classify_event(&event);
        assert_eq!(classified.category, Some(EventCategory::Label));
        assert_eq!(classified.labels, vec!["spam"]);
        assert!(classified.comment.is_none());
    }

    #[test]
    fn emit_kind_text_is_stable() {
        assert_eq!(EmitKind::ReverseTakedown.as_str(), "reverseTakedown");
        let parsed: EmitKind = serde_json::from_value(json!("reverseTakedown")).unwrap();
        assert_eq!(parsed, EmitKind::ReverseTakedown);
    }
}
