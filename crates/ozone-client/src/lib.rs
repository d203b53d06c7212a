//! Stateless HTTP client for the external labeler's XRPC surface.
//!
//! One instance per tenant credential. Every call builds its URL under
//! `/xrpc/`, mints a fresh bearer token, and applies a per-request timeout
//! (10 s; the health probe uses 5 s). Non-2xx responses surface as
//! [`ClientError::Http`] with the status code.

#![deny(unsafe_code)]

use bridge_core::credential::TenantCredential;
use bridge_core::event::{ExternalEvent, ModEvent};
use bridge_core::subject::SubjectRef;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Timeout for moderation calls.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for the health probe.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from the labeler client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("external labeler returned HTTP {status}")]
    Http { status: u16 },
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("endpoint url: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error(transparent)]
    Auth(#[from] ozone_auth::AuthError),
}

/// Sort order for `queryEvents`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// Query parameters for `tools.ozone.moderation.queryEvents`.
#[derive(Debug, Clone, Default)]
pub struct QueryEventsParams {
    pub cursor: Option<String>,
    pub limit: Option<u32>,
    /// Event `$type` filters; sent as a repeated `types` parameter.
    pub types: Vec<String>,
    pub subject: Option<String>,
    pub sort_direction: Option<SortDirection>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl QueryEventsParams {
    fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut q = Vec::new();
        if let Some(cursor) = &self.cursor {
            q.push(("cursor", cursor.clone()));
        }
        if let Some(limit) = self.limit {
            q.push(("limit", limit.to_string()));
        }
        for t in &self.types {
            q.push(("types", t.clone()));
        }
        if let Some(subject) = &self.subject {
            q.push(("subject", subject.clone()));
        }
        if let Some(dir) = self.sort_direction {
            q.push(("sortDirection", dir.as_str().to_owned()));
        }
        if let Some(after) = self.created_after {
            q.push(("createdAfter", after.to_rfc3339()));
        }
        if let Some(before) = self.created_before {
            q.push(("createdBefore", before.to_rfc3339()));
        }
        q
    }
}

/// Response of `queryEvents`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryEventsResponse {
    /// Pagination cursor; absent at end of stream.
    #[serde(default)]
    pub cursor: Option<String>,
    /// Events in the requested sort order.
    #[serde(default)]
    pub events: Vec<ExternalEvent>,
}

/// Body of `emitEvent`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmitEventRequest {
    pub event: ModEvent,
    pub subject: SubjectRef,
    pub created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_blob_cids: Option<Vec<String>>,
}

/// Response of `emitEvent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmitEventResponse {
    /// Event id assigned by the labeler.
    pub id: i64,
    /// Echo of the accepted event body.
    pub event: JsonValue,
    /// Echo of the accepted subject.
    pub subject: JsonValue,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Query parameters for `queryStatuses`.
#[derive(Debug, Clone, Default)]
pub struct QueryStatusesParams {
    pub cursor: Option<String>,
    pub limit: Option<u32>,
    pub subject: Option<String>,
    pub review_state: Option<String>,
}

impl QueryStatusesParams {
    fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut q = Vec::new();
        if let Some(cursor) = &self.cursor {
            q.push(("cursor", cursor.clone()));
        }
        if let Some(limit) = self.limit {
            q.push(("limit", limit.to_string()));
        }
        if let Some(subject) = &self.subject {
            q.push(("subject", subject.clone()));
        }
        if let Some(state) = &self.review_state {
            q.push(("reviewState", state.clone()));
        }
        q
    }
}

/// Response of `queryStatuses`. Statuses are passed through untyped; the
/// bridge does not interpret them.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStatusesResponse {
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub subject_statuses: Vec<JsonValue>,
}

/// Response of the `_health` probe.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    /// Labeler software version.
    pub version: String,
}

/// Client over one tenant's labeler credential.
#[derive(Debug, Clone)]
pub struct OzoneClient {
    http: reqwest::Client,
    credential: TenantCredential,
}

impl OzoneClient {
    /// Build a client for the credential.
    pub fn new(credential: TenantCredential) -> Result<Self, ClientError> {
        Ok(Self { http: reqwest::Client::builder().build()?, credential })
    }

    fn endpoint(&self, nsid: &str) -> Result<Url, ClientError> {
        Ok(self.credential.service_url.join(&format!("/xrpc/{nsid}"))?)
    }

    async fn parse<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Http { status: status.as_u16() });
        }
        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// `GET tools.ozone.moderation.queryEvents`.
    pub async fn query_events(
        &self,
        params: &QueryEventsParams,
    ) -> Result<QueryEventsResponse, ClientError> {
        let token = ozone_auth::mint(&self.credential)?;
        let url = self.endpoint("tools.ozone.moderation.queryEvents")?;
        debug!(tenant = %self.credential.tenant_id, cursor = ?params.cursor, "queryEvents");
        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(&params.to_query())
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        Self::parse(resp).await
    }

    /// `POST tools.ozone.moderation.emitEvent`.
    pub async fn emit_event(
        &self,
        request: &EmitEventRequest,
    ) -> Result<EmitEventResponse, ClientError> {
        let token = ozone_auth::mint(&self.credential)?;
        let url = self.endpoint("tools.ozone.moderation.emitEvent")?;
        debug!(tenant = %self.credential.tenant_id, "emitEvent");
        let resp = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(request)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        Self::parse(resp).await
    }

    /// `GET tools.ozone.moderation.queryStatuses`.
    pub async fn query_statuses(
        &self,
        params: &QueryStatusesParams,
    ) -> Result<QueryStatusesResponse, ClientError> {
        let token = ozone_auth::mint(&self.credential)?;
        let url = self.endpoint("tools.ozone.moderation.queryStatuses")?;
        debug!(tenant = %self.credential.tenant_id, "queryStatuses");
        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(&params.to_query())
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        Self::parse(resp).await
    }

    /// `GET _health`. Unauthenticated, shorter timeout.
    pub async fn health_check(&self) -> Result<HealthResponse, ClientError> {
        let url = self.endpoint("_health")?;
        let resp = self.http.get(url).timeout(HEALTH_TIMEOUT).send().await?;
        Self::parse(resp).await
    }
}
