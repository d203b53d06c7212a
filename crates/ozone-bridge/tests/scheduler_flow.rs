use bridge_core::credential::{StaticCredentialStore, TenantCredential};
use bridge_store::mem::{MemAuditStore, MemMappingStore, MemSyncStateStore};
use bridge_store::{SyncStatePatch, SyncStateStore};
use ozone_bridge::queue::RecordingReviewQueue;
use ozone_bridge::scheduler::{PollScheduler, SchedulerConfig, QUEUE_SOURCE};
use ozone_bridge::BridgeService;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn credential(tenant: &str, uri: &str) -> TenantCredential {
    TenantCredential {
        tenant_id: tenant.to_owned(),
        service_url: Url::parse(uri).unwrap(),
        did: "did:plc:platform-service".into(),
        signing_key: "11".repeat(32),
        handle: None,
    }
}

struct Harness {
    scheduler: PollScheduler,
    queue: Arc<RecordingReviewQueue>,
    sync: Arc<MemSyncStateStore>,
}

fn harness(credentials: Vec<TenantCredential>, queue: RecordingReviewQueue) -> Harness {
    let sync = Arc::new(MemSyncStateStore::new());
    let queue = Arc::new(queue);
    let bridge = Arc::new(BridgeService::new(
        Arc::new(StaticCredentialStore::new(credentials)),
        sync.clone(),
        Arc::new(MemMappingStore::new()),
        Arc::new(MemAuditStore::new()),
    ));
    let scheduler = PollScheduler::new(
        bridge,
        queue.clone(),
        SchedulerConfig { poll_interval: Duration::from_millis(10), enabled: true },
    );
    Harness { scheduler, queue, sync }
}

async fn enable(sync: &MemSyncStateStore, tenant: &str) {
    sync.upsert(tenant, SyncStatePatch::default()).await.unwrap();
}

fn report_event(id: i64) -> serde_json::Value {
    json!({
        "id": id,
        "createdBy": "did:plc:reporter",
        "createdAt": "2024-05-01T12:00:00Z",
        "subject": {
            "$type": "com.atproto.repo.strongRef",
            "uri": "at://did:plc:C/app.bsky.feed.post/2",
            "cid": "bafyrei"
        },
        "event": {
            "$type": "tools.ozone.moderation.defs#modEventReport",
            "reportType": "com.atproto.moderation.defs#reasonSpam",
            "comment": "please review"
        }
    })
}

fn events_response(events: Vec<serde_json::Value>) -> serde_json::Value {
    json!({"cursor": "1", "events": events})
}

// One inbound report event yields exactly one review-queue item with the
// classified subject and report reason.
#[tokio::test]
async fn report_event_enqueues_one_item() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/xrpc/tools.ozone.moderation.queryEvents"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(events_response(vec![report_event(11)])),
        )
        .mount(&server)
        .await;

    let h = harness(vec![credential("T1", &server.uri())], RecordingReviewQueue::new());
    enable(&h.sync, "T1").await;
    h.scheduler.run_cycle(&CancellationToken::new()).await.unwrap();

    let items = h.queue.items();
    assert_eq!(items.len(), 1);
    let item = &items[0];
    assert_eq!(item.tenant_id, "T1");
    assert_eq!(item.source, QUEUE_SOURCE);
    assert_eq!(item.correlation_id.as_deref(), Some("11"));
    assert!(item.policy_ids.is_empty());
    assert_eq!(item.payload["category"], "REPORT");
    assert_eq!(item.payload["reason"], "Report received from external labeler");
    assert_eq!(item.payload["subjectDid"], "did:plc:C");
    assert_eq!(item.payload["subjectUri"], "at://did:plc:C/app.bsky.feed.post/2");
    assert_eq!(item.payload["comment"], "please review");
}

// Label events carry mapped policy types and the label-specific reason;
// takedown and comment events are recorded without enqueueing; unknown
// types and subject-less events are skipped.
#[tokio::test]
async fn event_routing_by_category() {
    let server = MockServer::start().await;
    let events = vec![
        json!({
            "id": 1,
            "createdBy": "did:plc:mod",
            "createdAt": "2024-05-01T12:00:00Z",
            "subject": {"$type": "com.atproto.admin.defs#repoRef", "did": "did:plc:x"},
            "event": {
                "$type": "tools.ozone.moderation.defs#modEventLabel",
                "createLabelVals": ["spam", "gore"]
            }
        }),
        json!({
            "id": 2,
            "createdBy": "did:plc:mod",
            "createdAt": "2024-05-01T12:00:01Z",
            "subject": {"$type": "com.atproto.admin.defs#repoRef", "did": "did:plc:x"},
            "event": {"$type": "tools.ozone.moderation.defs#modEventTakedown"}
        }),
        json!({
            "id": 3,
            "createdBy": "did:plc:mod",
            "createdAt": "2024-05-01T12:00:02Z",
            "subject": {"$type": "com.atproto.admin.defs#repoRef", "did": "did:plc:x"},
            "event": {"$type": "tools.ozone.moderation.defs#modEventMute"}
        }),
        json!({
            "id": 4,
            "createdBy": "did:plc:mod",
            "createdAt": "2024-05-01T12:00:03Z",
            "subject": {
                "$type": "com.atproto.repo.strongRef",
                "uri": "at://handle.example/app.bsky.feed.post/9",
                "cid": ""
            },
            "event": {"$type": "tools.ozone.moderation.defs#modEventEscalate"}
        }),
        json!({
            "id": 5,
            "createdBy": "did:plc:mod",
            "createdAt": "2024-05-01T12:00:04Z",
            "subject": {"$type": "com.atproto.admin.defs#repoRef", "did": "did:plc:y"},
            "event": {"$type": "tools.ozone.moderation.defs#modEventEscalate"}
        }),
    ];
    Mock::given(method("GET"))
        .and(path("/xrpc/tools.ozone.moderation.queryEvents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(events_response(events)))
        .mount(&server)
        .await;

    let h = harness(vec![credential("T1", &server.uri())], RecordingReviewQueue::new());
    enable(&h.sync, "T1").await;
    h.scheduler.run_cycle(&CancellationToken::new()).await.unwrap();

    let items = h.queue.items();
    // Label event (1) and the escalation with a resolvable subject (5);
    // the strong ref without a DID authority (4) is skipped.
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].policy_ids, vec!["SPAM", "VIOLENCE"]);
    assert_eq!(
        items[0].payload["reason"],
        "Labels applied by external labeler: spam, gore"
    );
    assert_eq!(items[1].correlation_id.as_deref(), Some("5"));
    assert_eq!(items[1].payload["reason"], "Escalated from external labeler");
}

// A tenant whose poll fails does not stop the cycle; later tenants still
// poll and enqueue.
#[tokio::test]
async fn tenant_poll_failure_continues_cycle() {
    let good = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/xrpc/tools.ozone.moderation.queryEvents"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(events_response(vec![report_event(21)])),
        )
        .mount(&good)
        .await;
    let bad = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/xrpc/tools.ozone.moderation.queryEvents"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&bad)
        .await;

    // "A-tenant" sorts before "B-tenant", so the failing tenant runs first.
    let h = harness(
        vec![credential("A-tenant", &bad.uri()), credential("B-tenant", &good.uri())],
        RecordingReviewQueue::new(),
    );
    enable(&h.sync, "A-tenant").await;
    enable(&h.sync, "B-tenant").await;
    h.scheduler.run_cycle(&CancellationToken::new()).await.unwrap();

    let items = h.queue.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].tenant_id, "B-tenant");
}

// Enqueue failures are per-event: the cycle completes and the cursor has
// already advanced, so the event becomes a skip rather than a retry.
#[tokio::test]
async fn enqueue_failure_skips_event_and_keeps_cursor() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/xrpc/tools.ozone.moderation.queryEvents"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(events_response(vec![report_event(31)])),
        )
        .mount(&server)
        .await;

    let h = harness(vec![credential("T1", &server.uri())], RecordingReviewQueue::failing());
    enable(&h.sync, "T1").await;
    h.scheduler.run_cycle(&CancellationToken::new()).await.unwrap();

    assert!(h.queue.items().is_empty());
    let state = h.sync.get("T1").await.unwrap().unwrap();
    assert_eq!(state.last_synced_cursor.as_deref(), Some("1"));
}

// A disabled scheduler returns from run() immediately.
#[tokio::test]
async fn disabled_scheduler_returns_immediately() {
    let h = harness(vec![], RecordingReviewQueue::new());
    let scheduler = PollScheduler::new(
        Arc::new(BridgeService::new(
            Arc::new(StaticCredentialStore::new(vec![])),
            h.sync.clone(),
            Arc::new(MemMappingStore::new()),
            Arc::new(MemAuditStore::new()),
        )),
        h.queue.clone(),
        SchedulerConfig::default(),
    );
    tokio::time::timeout(Duration::from_millis(100), scheduler.run(CancellationToken::new()))
        .await
        .expect("disabled run should return at once");
}

// Cancellation stops the loop between cycles.
#[tokio::test]
async fn cancellation_stops_running_scheduler() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/xrpc/tools.ozone.moderation.queryEvents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"events": []})))
        .mount(&server)
        .await;

    let h = harness(vec![credential("T1", &server.uri())], RecordingReviewQueue::new());
    enable(&h.sync, "T1").await;

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let handle = tokio::spawn(async move { h.scheduler.run(token).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("scheduler should stop after cancellation")
        .unwrap();
}
