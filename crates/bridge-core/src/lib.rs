//! Core domain types shared across the moderation bridge crates.

#![deny(unsafe_code)]

/// Version of the bridge core library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod credential {
    //! Tenant credentials for the external labeler and the store seam.

    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use thiserror::Error;
    use url::Url;

    /// Per-tenant credential for the external labeler service.
    ///
    /// `signing_key` is a raw secp256k1 private scalar carried as a lowercase
    /// hex string (optional `0x` prefix); validation happens at mint time.
    #[derive(Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct TenantCredential {
        /// Owning tenant.
        pub tenant_id: String,
        /// Base URL of the external labeler.
        pub service_url: Url,
        /// DID of the platform's service account at the labeler.
        pub did: String,
        /// Hex-encoded 32-byte secp256k1 private scalar.
        pub signing_key: String,
        /// Optional human-readable handle; unused by the bridge.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub handle: Option<String>,
    }

    impl std::fmt::Debug for TenantCredential {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("TenantCredential")
                .field("tenant_id", &self.tenant_id)
                .field("service_url", &self.service_url.as_str())
                .field("did", &self.did)
                .field("signing_key", &"[redacted]")
                .field("handle", &self.handle)
                .finish()
        }
    }

    /// Errors surfaced by credential store backends.
    #[derive(Debug, Error)]
    pub enum CredentialError {
        #[error("credential backend: {0}")]
        Backend(String),
    }

    /// Read-through access to tenant credentials. The backing service may be
    /// called repeatedly; no caching is assumed.
    #[async_trait]
    pub trait CredentialStore: Send + Sync {
        /// Fetch the labeler credential for a tenant, `None` when unconfigured.
        async fn get(&self, tenant_id: &str)
            -> Result<Option<TenantCredential>, CredentialError>;
    }

    /// Fixed in-memory credential set, used by the daemon (loaded from a
    /// config file) and by tests.
    #[derive(Debug, Clone, Default)]
    pub struct StaticCredentialStore {
        by_tenant: HashMap<String, TenantCredential>,
    }

    impl StaticCredentialStore {
        /// Build a store from a list of credentials (last one per tenant wins).
        pub fn new(credentials: Vec<TenantCredential>) -> Self {
            let by_tenant =
                credentials.into_iter().map(|c| (c.tenant_id.clone(), c)).collect();
            Self { by_tenant }
        }
    }

    #[async_trait]
    impl CredentialStore for StaticCredentialStore {
        async fn get(
            &self,
            tenant_id: &str,
        ) -> Result<Option<TenantCredential>, CredentialError> {
            Ok(self.by_tenant.get(tenant_id).cloned())
        }
    }

}

pub mod subject {
    //! Moderation subjects: account-level repo refs and record-level strong refs.

    use once_cell::sync::Lazy;
    use regex::Regex;
    use serde::{Deserialize, Serialize};

    static AT_URI_DID: Lazy<Regex> =
        Lazy::new(|| Regex::new("^at://(did:[^/]+)").expect("at-uri regex"));

    /// Tagged subject union as it appears on the wire (`$type` discriminant).
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "$type")]
    pub enum SubjectRef {
        /// A whole repository (account).
        #[serde(rename = "com.atproto.admin.defs#repoRef")]
        Repo {
            /// DID of the account.
            did: String,
        },
        /// A specific record, addressed by AT-URI plus CID.
        #[serde(rename = "com.atproto.repo.strongRef")]
        Strong {
            /// Record AT-URI (`at://<did>/<collection>/<rkey>`).
            uri: String,
            /// Content hash of the record revision.
            cid: String,
        },
    }

    impl SubjectRef {
        /// The subject's DID: direct for repo refs, extracted from the
        /// AT-URI for strong refs.
        pub fn did(&self) -> Option<&str> {
            match self {
                SubjectRef::Repo { did } => Some(did),
                SubjectRef::Strong { uri, .. } => did_from_at_uri(uri),
            }
        }

        /// The record URI for strong refs.
        pub fn uri(&self) -> Option<&str> {
            match self {
                SubjectRef::Repo { .. } => None,
                SubjectRef::Strong { uri, .. } => Some(uri),
            }
        }
    }

    /// Extract the `did:...` authority from an AT-URI, if present.
    pub fn did_from_at_uri(uri: &str) -> Option<&str> {
        AT_URI_DID.captures(uri).and_then(|c| c.get(1)).map(|m| m.as_str())
    }

}

pub mod event {
    //! Wire-level moderation events: inbound stream items and outbound emissions.

    use crate::subject::SubjectRef;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use serde_json::Value as JsonValue;

    /// A moderation event as returned by the labeler's `queryEvents`.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ExternalEvent {
        /// Event id assigned by the labeler.
        pub id: i64,
        /// DID of the actor that created the event.
        pub created_by: String,
        /// Event creation time.
        pub created_at: DateTime<Utc>,
        /// Subject the event applies to.
        pub subject: SubjectRef,
        /// Category-specific event body.
        pub event: ExternalEventBody,
    }

    /// Body of an inbound event. The `$type` string carries the category;
    /// the optional fields are populated per category.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ExternalEventBody {
        /// Lexicon type of the event (e.g. `tools.ozone.moderation.defs#modEventLabel`).
        #[serde(rename = "$type", default)]
        pub kind: String,
        /// Labels added by a label event.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub create_label_vals: Option<Vec<String>>,
        /// Labels negated by a label event.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub negate_label_vals: Option<Vec<String>>,
        /// Free-form comment; non-string values occur on the wire and are
        /// dropped during classification.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub comment: Option<JsonValue>,
        /// Report reason type for report events.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub report_type: Option<String>,
        /// Fields this bridge does not interpret, preserved for downstream
        /// consumers of the raw payload.
        #[serde(flatten)]
        pub extra: serde_json::Map<String, JsonValue>,
    }

    /// Outbound moderation event union (`$type`-tagged).
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "$type")]
    pub enum ModEvent {
        /// Apply and/or negate labels on the subject.
        #[serde(rename = "tools.ozone.moderation.defs#modEventLabel")]
        #[serde(rename_all = "camelCase")]
        Label {
            /// Labels to create.
            create_label_vals: Vec<String>,
            /// Labels to negate.
            negate_label_vals: Vec<String>,
            /// Moderator comment.
            comment: String,
        },
        /// Take the subject down.
        #[serde(rename = "tools.ozone.moderation.defs#modEventTakedown")]
        #[serde(rename_all = "camelCase")]
        Takedown {
            /// Moderator comment.
            comment: String,
            /// Optional takedown duration; permanent when absent.
            #[serde(default, skip_serializing_if = "Option::is_none")]
            duration_in_hours: Option<i64>,
        },
        /// Reverse a previous takedown.
        #[serde(rename = "tools.ozone.moderation.defs#modEventReverseTakedown")]
        #[serde(rename_all = "camelCase")]
        ReverseTakedown {
            /// Moderator comment.
            comment: String,
        },
        /// Leave a comment on the subject's moderation history.
        #[serde(rename = "tools.ozone.moderation.defs#modEventComment")]
        #[serde(rename_all = "camelCase")]
        Comment {
            /// Comment text.
            comment: String,
            /// Whether the comment is pinned.
            sticky: bool,
        },
        /// Acknowledge the subject's open reports.
        #[serde(rename = "tools.ozone.moderation.defs#modEventAcknowledge")]
        #[serde(rename_all = "camelCase")]
        Acknowledge {
            /// Moderator comment.
            comment: String,
        },
        /// Escalate the subject for senior review.
        #[serde(rename = "tools.ozone.moderation.defs#modEventEscalate")]
        #[serde(rename_all = "camelCase")]
        Escalate {
            /// Moderator comment.
            comment: String,
        },
    }

    /// Internal category assigned to inbound events.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum EventCategory {
        Report,
        Takedown,
        Label,
        Comment,
        Escalate,
    }

    /// Normalized view of an inbound event, ready for routing.
    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct ClassifiedEvent {
        /// Category, `None` when the `$type` is not one the bridge handles.
        pub category: Option<EventCategory>,
        /// Labels attached by the event (empty for non-label events).
        pub labels: Vec<String>,
        /// Comment, when the wire value was a string.
        pub comment: Option<String>,
        /// Subject DID, when extractable.
        pub subject_did: Option<String>,
        /// Subject record URI for strong refs.
        pub subject_uri: Option<String>,
    }

}
