//! End-to-end tests: SQLite queue -> SyncQueueService -> HubSpotEntitySync
//! -> mock HubSpot API -> local record mirror
//!
//! **Infrastructure:**
//! - Real SQLite database (tempdir)
//! - WireMock HTTP server standing in for api.hubapi.com
//! - Registry-built HubSpot clients with default resilience settings

mod support;

use std::sync::Arc;

use crmsync_common::resilience::{Clock, SystemClock};
use crmsync_core::{
    EntitySyncService, ItemOutcome, LocalRecordStore, SyncDispatcher, SyncOutcome,
    SyncQueueConfig, SyncQueueService,
};
use crmsync_domain::{
    HubSpotConfig, NewSyncItem, ObjectType, QueueStatus, SyncDirection, SyncOperation,
    SyncQueueItem,
};
use crmsync_infra::database::{SqliteLocalRecordStore, SqliteSyncQueueRepository};
use crmsync_infra::hubspot::{
    ClientSettings, HubSpotClientRegistry, HubSpotEntitySync, SharedTokenSource,
};
use serde_json::{json, Value};
use support::{TestDatabase, TEST_TOKEN};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    db: TestDatabase,
    records: Arc<SqliteLocalRecordStore>,
    sync: Arc<HubSpotEntitySync>,
}

fn harness(server: &MockServer) -> Harness {
    let db = TestDatabase::new();
    let settings = ClientSettings {
        hubspot: HubSpotConfig { base_url: server.uri(), ..HubSpotConfig::default() },
        ..ClientSettings::default()
    };
    let registry =
        Arc::new(HubSpotClientRegistry::new(settings, Arc::new(SharedTokenSource::from_static(TEST_TOKEN))));
    let records = Arc::new(SqliteLocalRecordStore::new(db.manager.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sync = Arc::new(HubSpotEntitySync::new(registry, records.clone(), clock));

    Harness { db, records, sync }
}

fn item(
    object_type: ObjectType,
    operation: SyncOperation,
    direction: SyncDirection,
    payload: Value,
) -> SyncQueueItem {
    NewSyncItem::new("ws-1", object_type, operation, direction, payload).into_item(
        "item-1".into(),
        1_000,
        3,
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn create_posts_properties_and_returns_remote_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/contacts"))
        .and(header("authorization", format!("Bearer {TEST_TOKEN}").as_str()))
        .and(body_json(json!({"properties": {"email": "ada@example.com"}})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "901"})))
        .expect(1)
        .mount(&server)
        .await;

    let harness = harness(&server);
    let outcome = harness
        .sync
        .sync(&item(
            ObjectType::Contact,
            SyncOperation::Create,
            SyncDirection::ToRemote,
            json!({"properties": {"email": "ada@example.com"}}),
        ))
        .await
        .unwrap();

    assert_eq!(outcome, SyncOutcome::Pushed { remote_id: Some("901".into()) });
}

#[tokio::test(flavor = "multi_thread")]
async fn update_patches_by_remote_id() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/crm/v3/objects/deals/77"))
        .and(body_json(json!({"properties": {"amount": "1500"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "77"})))
        .expect(1)
        .mount(&server)
        .await;

    let harness = harness(&server);
    let outcome = harness
        .sync
        .sync(&item(
            ObjectType::Deal,
            SyncOperation::Update,
            SyncDirection::ToRemote,
            json!({"remoteId": "77", "properties": {"amount": "1500"}}),
        ))
        .await
        .unwrap();

    assert_eq!(outcome, SyncOutcome::Pushed { remote_id: Some("77".into()) });
}

#[tokio::test(flavor = "multi_thread")]
async fn update_without_remote_id_fails_permanently() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let harness = harness(&server);
    let err = harness
        .sync
        .sync(&item(
            ObjectType::Company,
            SyncOperation::Update,
            SyncDirection::ToRemote,
            json!({"properties": {"name": "Acme"}}),
        ))
        .await
        .unwrap_err();

    assert!(!err.retryable);
    assert!(err.message.contains("remoteId"));
}

#[tokio::test(flavor = "multi_thread")]
async fn deleting_missing_remote_object_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/crm/v3/objects/companies/5"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let harness = harness(&server);
    let outcome = harness
        .sync
        .sync(&item(
            ObjectType::Company,
            SyncOperation::Delete,
            SyncDirection::ToRemote,
            json!({"remoteId": "5"}),
        ))
        .await
        .unwrap();

    assert_eq!(outcome, SyncOutcome::Pushed { remote_id: Some("5".into()) });
}

#[tokio::test(flavor = "multi_thread")]
async fn pull_stores_remote_properties_locally() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/contacts/555"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "555",
            "properties": {"email": "grace@example.com", "firstname": "Grace"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let harness = harness(&server);
    let outcome = harness
        .sync
        .sync(&item(
            ObjectType::Contact,
            SyncOperation::Update,
            SyncDirection::FromRemote,
            json!({"remoteId": "555", "eventId": 100}),
        ))
        .await
        .unwrap();

    assert_eq!(outcome, SyncOutcome::Pulled { remote_id: "555".into() });
    let record = harness.records.get("ws-1", ObjectType::Contact, "555").await.unwrap().unwrap();
    assert_eq!(record.properties["firstname"], "Grace");
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_deletion_removes_local_record() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/deals/8"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "8", "properties": {}})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/deals/9"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let harness = harness(&server);
    for remote_id in ["8", "9"] {
        harness
            .records
            .upsert(&crmsync_domain::CrmRecord {
                workspace_id: "ws-1".into(),
                object_type: ObjectType::Deal,
                remote_id: remote_id.into(),
                properties: json!({"dealname": "old"}),
                updated_at: 1,
            })
            .await
            .unwrap();
    }

    let deletion = harness
        .sync
        .sync(&item(
            ObjectType::Deal,
            SyncOperation::Delete,
            SyncDirection::FromRemote,
            json!({"remoteId": "8"}),
        ))
        .await
        .unwrap();
    assert_eq!(deletion, SyncOutcome::Removed { remote_id: "8".into() });

    let vanished = harness
        .sync
        .sync(&item(
            ObjectType::Deal,
            SyncOperation::Update,
            SyncDirection::FromRemote,
            json!({"remoteId": "9"}),
        ))
        .await
        .unwrap();
    assert_eq!(vanished, SyncOutcome::Removed { remote_id: "9".into() });

    assert!(harness.records.get("ws-1", ObjectType::Deal, "8").await.unwrap().is_none());
    assert!(harness.records.get("ws-1", ObjectType::Deal, "9").await.unwrap().is_none());
}

fn queue(harness: &Harness) -> SyncQueueService {
    let repository = Arc::new(SqliteSyncQueueRepository::new(harness.db.manager.clone()));
    let dispatcher = SyncDispatcher::new().with_handler_for_all(harness.sync.clone());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let config = SyncQueueConfig { auto_process: false, ..SyncQueueConfig::default() };
    SyncQueueService::new(repository, dispatcher, clock, config)
}

#[tokio::test(flavor = "multi_thread")]
async fn queued_activity_is_pushed_as_note_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/notes"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "n-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let harness = harness(&server);
    let queue = queue(&harness);
    let id = queue
        .enqueue(NewSyncItem::new(
            "ws-1",
            ObjectType::Activity,
            SyncOperation::Create,
            SyncDirection::ToRemote,
            json!({"properties": {"hs_note_body": "Called customer"}}),
        ))
        .await
        .unwrap();

    let summary = queue.process_queue().await.unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(queue.get(&id).await.unwrap().unwrap().status, QueueStatus::Completed);

    // Replaying a completed item makes no remote call.
    assert_eq!(queue.process_item_by_id(&id).await.unwrap(), ItemOutcome::AlreadyCompleted);
}

#[tokio::test(flavor = "multi_thread")]
async fn validation_failure_fails_item_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"message": "Property values were not valid"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let harness = harness(&server);
    let queue = queue(&harness);
    let id = queue
        .enqueue(NewSyncItem::new(
            "ws-1",
            ObjectType::Contact,
            SyncOperation::Create,
            SyncDirection::ToRemote,
            json!({"properties": {"email": "not-an-email"}}),
        ))
        .await
        .unwrap();

    let summary = queue.process_queue().await.unwrap();
    assert_eq!(summary.failed, 1);

    let item = queue.get(&id).await.unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Failed);
    assert!(item.error_message.unwrap().contains("Property values were not valid"));
}
