//! Long-running poll supervisor.
//!
//! On each cycle the scheduler walks the tenants with syncing enabled, in
//! order, polls each one, classifies the returned events, and routes
//! qualifying ones to the review queue. Tenants are processed
//! sequentially, and events within a tenant are processed sequentially:
//! cursor advance presumes in-order consumption.
//!
//! Failure policy: a tenant whose poll fails is logged and skipped for the
//! cycle (its cursor is untouched); an event whose processing fails is
//! logged and skipped without rolling the cursor back (at-least-once in,
//! skip on irrecoverable processing); a cycle-level failure is logged and
//! the next tick proceeds. Only cancellation stops the loop, and the
//! in-flight tenant drains its event loop first.

use crate::queue::{ReviewQueue, ReviewQueueItem};
use crate::{BridgeError, BridgeService};
use bridge_core::event::{EventCategory, ExternalEvent};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Source tag attached to every review-queue item from this bridge.
pub const QUEUE_SOURCE: &str = "external_labeler";

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Sleep between cycles.
    pub poll_interval: Duration,
    /// When false, [`PollScheduler::run`] returns immediately.
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { poll_interval: Duration::from_millis(30_000), enabled: false }
    }
}

/// Supervisor driving [`BridgeService::poll_events`] across tenants.
pub struct PollScheduler {
    bridge: Arc<BridgeService>,
    queue: Arc<dyn ReviewQueue>,
    config: SchedulerConfig,
}

impl PollScheduler {
    pub fn new(
        bridge: Arc<BridgeService>,
        queue: Arc<dyn ReviewQueue>,
        config: SchedulerConfig,
    ) -> Self {
        Self { bridge, queue, config }
    }

    /// Run until cancelled. Returns immediately when polling is disabled.
    pub async fn run(&self, cancel: CancellationToken) {
        if !self.config.enabled {
            info!("event polling disabled");
            return;
        }
        info!(interval_ms = self.config.poll_interval.as_millis() as u64, "poll scheduler started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(err) = self.run_cycle(&cancel).await {
                error!(error = %err, "poll cycle failed");
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        info!("poll scheduler stopped");
    }

    /// One pass over all sync-enabled tenants. Public so operators and
    /// tests can drive a single cycle.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<(), BridgeError> {
        let tenants = self.bridge.list_enabled_tenants().await?;
        debug!(tenants = tenants.len(), "poll cycle");
        for tenant_id in tenants {
            // Cancellation is only checked between tenants so the
            // in-flight tenant finishes its event loop.
            if cancel.is_cancelled() {
                break;
            }
            let outcome = match self.bridge.poll_events(&tenant_id).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(tenant = %tenant_id, error = %err, "tenant poll failed");
                    continue;
                }
            };
            for event in &outcome.events {
                if let Err(err) = self.process_event(&tenant_id, event).await {
                    warn!(
                        tenant = %tenant_id,
                        event_id = event.id,
                        error = %err,
                        "event processing failed; event skipped"
                    );
                }
            }
        }
        Ok(())
    }

    async fn process_event(
        &self,
        tenant_id: &str,
        event: &ExternalEvent,
    ) -> Result<(), BridgeError> {
        let classified = BridgeService::classify_event(event);
        let Some(category) = classified.category else {
            debug!(tenant = %tenant_id, event_id = event.id, kind = %event.event.kind, "unhandled event type");
            return Ok(());
        };
        let Some(subject_did) = classified.subject_did.clone() else {
            debug!(tenant = %tenant_id, event_id = event.id, "event without resolvable subject");
            return Ok(());
        };

        let (reason, policy_ids) = match category {
            EventCategory::Report => {
                ("Report received from external labeler".to_owned(), Vec::new())
            }
            EventCategory::Label => {
                let policy_ids =
                    self.bridge.labels_to_policies(tenant_id, &classified.labels).await?;
                (
                    format!(
                        "Labels applied by external labeler: {}",
                        classified.labels.join(", ")
                    ),
                    policy_ids,
                )
            }
            EventCategory::Escalate => {
                ("Escalated from external labeler".to_owned(), Vec::new())
            }
            EventCategory::Takedown | EventCategory::Comment => {
                info!(
                    tenant = %tenant_id,
                    event_id = event.id,
                    category = ?category,
                    subject = %subject_did,
                    "external event recorded"
                );
                return Ok(());
            }
        };

        let item = ReviewQueueItem {
            tenant_id: tenant_id.to_owned(),
            payload: json!({
                "reason": reason,
                "category": category,
                "labels": classified.labels,
                "comment": classified.comment,
                "subjectDid": subject_did,
                "subjectUri": classified.subject_uri,
                "reportType": event.event.report_type,
                "externalEventId": event.id,
                "externalCreatedBy": event.created_by,
                "externalCreatedAt": event.created_at,
            }),
            created_at: Utc::now(),
            source: QUEUE_SOURCE.to_owned(),
            correlation_id: Some(event.id.to_string()),
            policy_ids,
        };
        self.queue.enqueue(item).await?;
        Ok(())
    }
}
