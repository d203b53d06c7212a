//! Review-queue collaborator contract and the daemon-side implementations.
//!
//! The bridge hands qualifying inbound events to the platform's review
//! queue and treats the hand-off as fire-and-forget; enqueue failures
//! bubble up as per-event errors and are skipped by the scheduler.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;
use url::Url;

/// One item handed to the review queue.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewQueueItem {
    pub tenant_id: String,
    /// Classified event fields plus raw event metadata.
    pub payload: JsonValue,
    pub created_at: DateTime<Utc>,
    /// Always `"external_labeler"` for items from this bridge.
    pub source: String,
    /// External event id.
    pub correlation_id: Option<String>,
    /// Mapped platform policy types (label events only).
    pub policy_ids: Vec<String>,
}

/// Enqueue failure; surfaced as a per-event error to the scheduler.
#[derive(Debug, Error)]
#[error("review queue: {0}")]
pub struct QueueError(pub String);

/// The review-queue seam.
#[async_trait]
pub trait ReviewQueue: Send + Sync {
    async fn enqueue(&self, item: ReviewQueueItem) -> Result<(), QueueError>;
}

/// Queue that only logs items; used when no queue endpoint is configured.
#[derive(Debug, Default)]
pub struct LogReviewQueue;

#[async_trait]
impl ReviewQueue for LogReviewQueue {
    async fn enqueue(&self, item: ReviewQueueItem) -> Result<(), QueueError> {
        info!(
            tenant = %item.tenant_id,
            correlation_id = item.correlation_id.as_deref().unwrap_or("-"),
            policy_ids = ?item.policy_ids,
            "review-queue item (log only)"
        );
        Ok(())
    }
}

/// Queue that POSTs items as JSON to the platform's internal endpoint.
#[derive(Debug, Clone)]
pub struct HttpReviewQueue {
    url: Url,
    http: reqwest::Client,
}

impl HttpReviewQueue {
    pub fn new(url: Url) -> Result<Self, QueueError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| QueueError(e.to_string()))?;
        Ok(Self { url, http })
    }
}

#[async_trait]
impl ReviewQueue for HttpReviewQueue {
    async fn enqueue(&self, item: ReviewQueueItem) -> Result<(), QueueError> {
        let resp = self
            .http
            .post(self.url.clone())
            .json(&item)
            .send()
            .await
            .map_err(|e| QueueError(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(QueueError(format!("endpoint returned HTTP {}", resp.status().as_u16())));
        }
        Ok(())
    }
}

/// Queue that records items in memory; test helper.
#[derive(Debug, Default)]
pub struct RecordingReviewQueue {
    items: Mutex<Vec<ReviewQueueItem>>,
    fail: bool,
}

impl RecordingReviewQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue whose enqueue always fails.
    pub fn failing() -> Self {
        Self { items: Mutex::new(Vec::new()), fail: true }
    }

    /// Snapshot of recorded items.
    pub fn items(&self) -> Vec<ReviewQueueItem> {
        self.items.lock().expect("queue lock").clone()
    }
}

#[async_trait]
impl ReviewQueue for RecordingReviewQueue {
    async fn enqueue(&self, item: ReviewQueueItem) -> Result<(), QueueError> {
        if self.fail {
            return Err(QueueError("recording queue set to fail".into()));
        }
        self.items.lock().expect("queue lock").push(item);
        Ok(())
    }
}
