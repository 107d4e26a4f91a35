//! End-to-end reconciliation runs against the in-memory tracker and an
//! in-memory store.

use std::sync::Arc;

use serde_json::{json, Map};
use ts_core::config::Config;
use ts_core::schema::{EPICS, ISSUES, SUB_TASKS};
use ts_core::store::SyncStore;
use ts_core::types::{Row, TicketKind};
use ts_integrations::jira::sync::{MapRenderer, NoMapRenderer, ProtocolManager, SyncReport};
use ts_integrations::jira::{InMemoryTracker, Ticket, Tracker, TrackerUser};

const PROTOCOL_ID: &str = "2024-ABC-DE-FGHIJ-01";

fn epic_ticket(id: &str, key: &str, protocol_id: &str) -> Ticket {
    serde_json::from_value(json!({
        "id": id,
        "key": key,
        "fields": {
            "summary": protocol_id,
            "description": "Protocol epic",
            "issuetype": {"name": "Epic"},
            "labels": ["existing"],
            "status": {"id": "1", "name": "New Request"},
            "assignee": {"name": "jdoe", "emailAddress": "jdoe@example.com"},
            "customfield_12491": protocol_id
        }
    }))
    .unwrap()
}

fn tracker(config: &Config) -> InMemoryTracker {
    InMemoryTracker::from_config(config)
        .seed(epic_ticket("10001", "TM-1", PROTOCOL_ID))
        .with_user(TrackerUser {
            name: "jdoe".into(),
            key: None,
            email_address: Some("jdoe@example.com".into()),
            display_name: Some("J. Doe".into()),
        })
        .with_create_status("Trial", "In Execution", 11921)
}

async fn store() -> SyncStore {
    let store = SyncStore::new_in_memory().await.unwrap();
    store
        .insert_row(
            "protocol",
            &Row::new()
                .with("uuid", "p-1")
                .with("name", PROTOCOL_ID)
                .with("last_updated", "2024-03-01 12:00:00")
                .with("country", "DE")
                .with("crop", "Wheat"),
        )
        .await
        .unwrap();
    store
        .insert_row(
            "trial",
            &Row::new()
                .with("uuid", "t-1")
                .with("name", "T-01")
                .with("protocol_uuid", "p-1")
                .with("last_updated", "2024-03-02 08:00:00"),
        )
        .await
        .unwrap();
    store
}

/// Give trial `t-1` a crop season with one uploaded yield file.
async fn add_upload(store: &SyncStore) {
    store
        .insert_row(
            "trial",
            &Row::new()
                .with("uuid", "t-2")
                .with("name", "T-02")
                .with("protocol_uuid", "p-none")
                .with("crop_season_uuid", "cs-1"),
        )
        .await
        .unwrap();
    store
        .insert_row(
            "uploaded_data",
            &Row::new()
                .with("file_uuid", "file-1")
                .with("cropSeasonUuid", "cs-1")
                .with("type", "yield")
                .with("file_name", "yield.csv")
                .with("uploaded_at", "2024-04-01 10:00:00"),
        )
        .await
        .unwrap();
}

fn manager(config: &Config, tracker: &Arc<InMemoryTracker>, store: &SyncStore) -> ProtocolManager {
    ProtocolManager::new(
        config,
        tracker.clone(),
        store.clone(),
        Arc::new(NoMapRenderer),
    )
}

struct FixedMap;

#[async_trait::async_trait]
impl MapRenderer for FixedMap {
    async fn render(&self, _trial_name: &str) -> Option<Vec<u8>> {
        Some(vec![0x89, b'P', b'N', b'G'])
    }
}

// ===========================================================================
// Epic and trial reconciliation
// ===========================================================================

#[tokio::test]
async fn first_run_creates_links_and_transitions_the_trial_issue() {
    let config = Config::default();
    let tracker = Arc::new(tracker(&config));
    let store = store().await;

    let report = manager(&config, &tracker, &store)
        .run(None, TicketKind::Epic)
        .await
        .unwrap();

    assert_eq!(report.epics_seen, 1);
    assert_eq!(report.tickets_created, 1);
    assert_eq!(report.tickets_updated, 1);
    assert_eq!(report.transitions_applied, 1);
    assert_eq!(report.attachments, 0);

    let calls = tracker.calls();
    assert_eq!(calls.creates, vec!["TM-2".to_string()]);
    assert_eq!(calls.epic_links, vec![("TM-1".to_string(), vec!["TM-2".to_string()])]);
    assert_eq!(calls.transitions, vec![("TM-2".to_string(), 351)]);

    assert_eq!(store.count_rows("epics").await.unwrap(), 1);
    assert_eq!(store.count_rows("issues").await.unwrap(), 1);
    assert_eq!(store.latest_version(&EPICS, "10001").await.unwrap(), Some(0));
    assert_eq!(store.latest_version(&ISSUES, "10002").await.unwrap(), Some(0));
}

#[tokio::test]
async fn epic_gets_protocol_table_and_labels() {
    let config = Config::default();
    let tracker = Arc::new(tracker(&config));
    let store = store().await;
    manager(&config, &tracker, &store)
        .run(None, TicketKind::Epic)
        .await
        .unwrap();

    let epic = tracker.get("TM-1").await.unwrap();
    let description = epic.fields.description.unwrap_or_default();
    assert!(description.starts_with("Protocol epic\n||uuid||date_created||last_updated||"));
    assert!(description.contains("|p-1| |2024-03-01 12:00:00|"));
    assert_eq!(epic.fields.labels, vec!["existing", "2024", "ABC", "DE", "FGHIJ"]);
}

#[tokio::test]
async fn created_issue_carries_trial_fields_and_assignee() {
    let config = Config::default();
    let tracker = Arc::new(tracker(&config));
    let store = store().await;
    manager(&config, &tracker, &store)
        .run(None, TicketKind::Epic)
        .await
        .unwrap();

    let issue = tracker.get("TM-2").await.unwrap();
    assert_eq!(issue.fields.summary.as_deref(), Some("T-01"));
    assert_eq!(issue.issue_type(), Some("Trial"));
    assert_eq!(issue.status_name(), Some("Waiting for Data"));
    assert_eq!(issue.fields.extra["customfield_12506"], json!("T-01"));
    assert_eq!(issue.fields.extra["customfield_10690"], json!("TM-1"));
    assert_eq!(
        issue.fields.assignee.and_then(|a| a.email_address).as_deref(),
        Some("jdoe@example.com")
    );
    assert!(issue
        .fields
        .description
        .unwrap_or_default()
        .contains("||uuid||date_created||last_updated||"));
}

#[tokio::test]
async fn second_run_changes_nothing() {
    let config = Config::default();
    let tracker = Arc::new(tracker(&config));
    let store = store().await;
    let manager = manager(&config, &tracker, &store);

    manager.run(None, TicketKind::Epic).await.unwrap();
    let before = tracker.calls();

    let report = manager.run(None, TicketKind::Epic).await.unwrap();
    assert_eq!(report.epics_seen, 1);
    assert_eq!(report.tickets_created, 0);
    assert_eq!(report.tickets_updated, 0);
    assert_eq!(report.version_bumps, 0);
    assert_eq!(report.transitions_applied, 0);

    let after = tracker.calls();
    assert_eq!(after.creates, before.creates);
    assert_eq!(after.updates, before.updates);
    assert_eq!(after.transitions, before.transitions);
    assert_eq!(store.latest_version(&EPICS, "10001").await.unwrap(), Some(0));
}

#[tokio::test]
async fn edited_epic_is_refreshed_with_a_new_version() {
    let config = Config::default();
    let tracker = Arc::new(tracker(&config));
    let store = store().await;
    let manager = manager(&config, &tracker, &store);
    manager.run(None, TicketKind::Epic).await.unwrap();

    let mut fields = Map::new();
    fields.insert("summary".into(), json!("Renamed epic"));
    tracker.update("TM-1", fields).await.unwrap();

    let report = manager.run(None, TicketKind::Epic).await.unwrap();
    assert_eq!(report.version_bumps, 1);
    assert_eq!(report.tickets_updated, 1);
    assert_eq!(store.latest_version(&EPICS, "10001").await.unwrap(), Some(1));
    assert_eq!(store.count_rows("epics").await.unwrap(), 1);
}

#[tokio::test]
async fn map_is_attached_when_rendered() {
    let config = Config::default();
    let tracker = Arc::new(tracker(&config));
    let store = store().await;

    let report = ProtocolManager::new(&config, tracker.clone(), store, Arc::new(FixedMap))
        .run(None, TicketKind::Epic)
        .await
        .unwrap();

    assert_eq!(report.attachments, 1);
    assert_eq!(
        tracker.calls().attachments,
        vec![("TM-2".to_string(), "management_zones_map.png".to_string())]
    );
}

// ===========================================================================
// Skips and failure isolation
// ===========================================================================

#[tokio::test]
async fn invalid_protocol_id_is_skipped() {
    let config = Config::default();
    let tracker = Arc::new(
        InMemoryTracker::from_config(&config).seed(epic_ticket("10001", "TM-1", "2024-XXX-DE-FGHIJ-01")),
    );
    let store = store().await;

    let report = manager(&config, &tracker, &store)
        .run(None, TicketKind::Epic)
        .await
        .unwrap();

    assert_eq!(report.epics_seen, 1);
    assert_eq!(report.epics_skipped, 1);
    let calls = tracker.calls();
    assert!(calls.updates.is_empty());
    assert!(calls.creates.is_empty());
    assert_eq!(store.count_rows("epics").await.unwrap(), 0);
}

#[tokio::test]
async fn protocol_not_in_database_is_skipped() {
    let config = Config::default();
    let tracker = Arc::new(
        InMemoryTracker::from_config(&config).seed(epic_ticket("10001", "TM-1", "2024-ABC-DE-FGHIJ-02")),
    );
    let store = store().await;

    let report = manager(&config, &tracker, &store)
        .run(None, TicketKind::Epic)
        .await
        .unwrap();

    assert_eq!(report.epics_skipped, 1);
    assert!(tracker.calls().creates.is_empty());
}

#[tokio::test]
async fn failing_epic_does_not_stop_the_sweep() {
    let config = Config::default();
    let tracker = Arc::new(
        InMemoryTracker::from_config(&config)
            .seed(epic_ticket("10001", "TM-1", "2024-ABC-DE-FGHIJ-02"))
            .seed(epic_ticket("10002", "TM-2", PROTOCOL_ID))
            .with_create_status("Trial", "In Execution", 11921)
            .with_failing_key("TM-1"),
    );
    let store = store().await;
    store
        .insert_row(
            "protocol",
            &Row::new()
                .with("uuid", "p-2")
                .with("name", "2024-ABC-DE-FGHIJ-02")
                .with("last_updated", "2024-03-01 12:00:00"),
        )
        .await
        .unwrap();

    let report = manager(&config, &tracker, &store)
        .run(None, TicketKind::Epic)
        .await
        .unwrap();

    assert_eq!(report.epics_seen, 2);
    assert_eq!(report.epics_failed, 1);
    assert_eq!(report.tickets_created, 1);
    assert_eq!(tracker.calls().epic_links[0].0, "TM-2");
    assert_eq!(store.count_rows("epics").await.unwrap(), 1);
}

#[tokio::test]
async fn single_epic_key_limits_the_sweep() {
    let config = Config::default();
    let tracker = Arc::new(
        InMemoryTracker::from_config(&config)
            .seed(epic_ticket("10001", "TM-1", "2024-ABC-DE-FGHIJ-02"))
            .seed(epic_ticket("10002", "TM-2", PROTOCOL_ID)),
    );
    let store = store().await;

    let report = manager(&config, &tracker, &store)
        .run(Some("TM-2"), TicketKind::Epic)
        .await
        .unwrap();

    assert_eq!(report.epics_seen, 1);
    assert_eq!(report.tickets_created, 1);
    assert_eq!(tracker.calls().epic_links[0].0, "TM-2");
}

#[tokio::test]
async fn saved_filter_replaces_the_default_epic_query() {
    let mut config = Config::default();
    config.tracker.active_filter_id = Some(42);
    let tracker = Arc::new(
        InMemoryTracker::from_config(&config)
            .seed(epic_ticket("10001", "TM-1", PROTOCOL_ID))
            .seed(epic_ticket("10002", "TM-2", "2024-ABC-DE-FGHIJ-02"))
            .with_filter(42, r#""issuetype"="Epic" AND "key"="TM-2""#),
    );
    let store = store().await;

    let report = manager(&config, &tracker, &store)
        .run(None, TicketKind::Epic)
        .await
        .unwrap();

    assert_eq!(report.epics_seen, 1);
    assert_eq!(report.epics_skipped, 1);
    assert!(tracker.calls().searches[0].contains("TM-2"));
}

#[tokio::test]
async fn missing_saved_filter_aborts_the_run() {
    let mut config = Config::default();
    config.tracker.active_filter_id = Some(7);
    let tracker = Arc::new(tracker(&config));
    let store = store().await;

    let result = manager(&config, &tracker, &store)
        .run(None, TicketKind::Epic)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn trial_kind_is_a_no_op() {
    let config = Config::default();
    let tracker = Arc::new(tracker(&config));
    let store = store().await;

    let report = manager(&config, &tracker, &store)
        .run(Some("TM-1"), TicketKind::Trial)
        .await
        .unwrap();
    assert_eq!(report, SyncReport::default());
    assert_eq!(tracker.calls().searches.len(), 0);
}

// ===========================================================================
// Subtasks
// ===========================================================================

fn trial_issue(key: &str, trial: &str) -> Ticket {
    serde_json::from_value(json!({
        "id": "10002",
        "key": key,
        "fields": {
            "summary": trial,
            "issuetype": {"name": "Trial"},
            "labels": ["2024", "ABC"],
            "status": {"id": "11922", "name": "Waiting for Data"},
            "assignee": {"name": "jdoe", "emailAddress": "jdoe@example.com"},
            "customfield_12506": trial
        }
    }))
    .unwrap()
}

#[tokio::test]
async fn uploads_become_subtasks_in_waiting() {
    let config = Config::default();
    let tracker = Arc::new(
        InMemoryTracker::from_config(&config)
            .seed(epic_ticket("10001", "TM-1", "2024-XXX-DE-FGHIJ-01"))
            .seed(trial_issue("TM-2", "T-02")),
    );
    let store = store().await;
    add_upload(&store).await;

    let report = manager(&config, &tracker, &store)
        .run(Some("TM-2"), TicketKind::Subtask)
        .await
        .unwrap();

    assert_eq!(report.tickets_created, 1);
    assert_eq!(report.transitions_applied, 2);

    let subtask = tracker.get("TM-3").await.unwrap();
    assert_eq!(subtask.fields.summary.as_deref(), Some("T-02_yield"));
    assert_eq!(subtask.issue_type(), Some("Sub-task"));
    assert_eq!(subtask.status_id(), Some(10820));
    assert_eq!(subtask.fields.labels, vec!["2024", "ABC"]);
    assert!(subtask
        .fields
        .description
        .unwrap_or_default()
        .contains("|file-1|cs-1|yield|"));

    assert_eq!(store.latest_version(&SUB_TASKS, "TM-3").await.unwrap(), Some(0));
    let parent = store.select_one("issues", "issue_key", "TM-2").await.unwrap().unwrap();
    assert_eq!(parent.get("subtask_keys"), Some(&json!(["TM-3"])));
}

#[tokio::test]
async fn existing_subtask_is_not_duplicated() {
    let config = Config::default();
    let tracker = Arc::new(InMemoryTracker::from_config(&config).seed(trial_issue("TM-1", "T-02")));
    let store = store().await;
    add_upload(&store).await;
    let manager = manager(&config, &tracker, &store);

    manager.run(Some("TM-1"), TicketKind::Subtask).await.unwrap();
    let report = manager.run(Some("TM-1"), TicketKind::Subtask).await.unwrap();

    assert_eq!(report.tickets_created, 0);
    assert_eq!(report.records_persisted, 0);
    assert_eq!(tracker.calls().creates.len(), 1);
}

#[tokio::test]
async fn persisted_subtask_missing_from_tracker_is_skipped() {
    let config = Config::default();
    let tracker = Arc::new(InMemoryTracker::from_config(&config).seed(trial_issue("TM-1", "T-02")));
    let store = store().await;
    add_upload(&store).await;
    store
        .insert_row(
            "sub_tasks",
            &Row::new()
                .with("subtask_key", "TM-99")
                .with("file_uuid", "file-1"),
        )
        .await
        .unwrap();

    let report = manager(&config, &tracker, &store)
        .run(Some("TM-1"), TicketKind::Subtask)
        .await
        .unwrap();

    assert_eq!(report.tickets_created, 0);
    assert!(tracker.calls().creates.is_empty());
}

#[tokio::test]
async fn subtask_sweep_without_key_visits_open_issues() {
    let config = Config::default();
    let tracker = Arc::new(
        InMemoryTracker::from_config(&config)
            .seed(epic_ticket("10001", "TM-1", PROTOCOL_ID))
            .seed(trial_issue("TM-2", "T-02")),
    );
    let store = store().await;
    add_upload(&store).await;

    let report = manager(&config, &tracker, &store)
        .run(None, TicketKind::Subtask)
        .await
        .unwrap();

    assert_eq!(report.tickets_created, 1);
    assert_eq!(report.subtasks_failed, 0);
    assert_eq!(tracker.calls().creates, vec!["TM-3".to_string()]);
}

#[tokio::test]
async fn missing_issue_is_not_a_failure() {
    let config = Config::default();
    let tracker = Arc::new(InMemoryTracker::from_config(&config));
    let store = store().await;

    let report = manager(&config, &tracker, &store)
        .run(Some("TM-404"), TicketKind::Subtask)
        .await
        .unwrap();
    assert_eq!(report, SyncReport::default());
}

// ===========================================================================
// Database edits between runs
// ===========================================================================

#[tokio::test]
async fn newer_protocol_refreshes_the_epic_without_a_version_bump() {
    let config = Config::default();
    let tracker = Arc::new(tracker(&config));
    let store = store().await;
    let manager = manager(&config, &tracker, &store);
    manager.run(None, TicketKind::Epic).await.unwrap();
    let before = tracker.calls().updates.len();

    let changes = Row::new().with("last_updated", "2024-03-05 00:00:00");
    store.update_where("protocol", "uuid", "p-1", &changes).await.unwrap();

    let report = manager.run(None, TicketKind::Epic).await.unwrap();
    assert_eq!(report.tickets_updated, 1);
    assert_eq!(report.version_bumps, 0);
    assert_eq!(tracker.calls().updates[before..], ["TM-1".to_string()]);

    let description = tracker.get("TM-1").await.unwrap().fields.description.unwrap_or_default();
    assert!(description.contains("|p-1| |2024-03-05 00:00:00|"));
    assert_eq!(description.matches("||uuid||").count(), 1);
    assert_eq!(store.latest_version(&EPICS, "10001").await.unwrap(), Some(0));
}

#[tokio::test]
async fn newer_trial_rewrites_the_issue_description() {
    let config = Config::default();
    let tracker = Arc::new(tracker(&config));
    let store = store().await;
    let manager = manager(&config, &tracker, &store);
    manager.run(None, TicketKind::Epic).await.unwrap();
    let before = tracker.calls().updates.len();

    let changes = Row::new().with("last_updated", "2024-03-09 00:00:00");
    store.update_where("trial", "uuid", "t-1", &changes).await.unwrap();

    let report = manager.run(None, TicketKind::Epic).await.unwrap();
    assert_eq!(report.tickets_updated, 1);
    assert_eq!(report.tickets_created, 0);
    assert_eq!(report.version_bumps, 0);
    assert_eq!(tracker.calls().updates[before..], ["TM-2".to_string()]);

    let description = tracker.get("TM-2").await.unwrap().fields.description.unwrap_or_default();
    assert!(description.contains("2024-03-09 00:00:00"));
    assert!(!description.contains("2024-03-02 08:00:00"));
    assert_eq!(store.latest_version(&ISSUES, "10002").await.unwrap(), Some(0));

    let report = manager.run(None, TicketKind::Epic).await.unwrap();
    assert_eq!(report.tickets_updated, 0);
}

// ===========================================================================
// Recovery after partial failure
// ===========================================================================

#[tokio::test]
async fn failed_attachment_still_walks_and_persists_the_issue() {
    let config = Config::default();
    let tracker = Arc::new(tracker(&config));
    let store = store().await;
    let manager = ProtocolManager::new(&config, tracker.clone(), store.clone(), Arc::new(FixedMap));
    tracker.fail_next("add_attachment");

    let report = manager.run(None, TicketKind::Epic).await.unwrap();
    assert_eq!(report.tickets_created, 1);
    assert_eq!(report.trials_failed, 1);
    assert_eq!(report.attachments, 0);
    assert_eq!(report.transitions_applied, 1);
    assert_eq!(
        tracker.get("TM-2").await.unwrap().status_name(),
        Some("Waiting for Data")
    );
    assert_eq!(store.latest_version(&ISSUES, "10002").await.unwrap(), Some(0));

    let report = manager.run(None, TicketKind::Epic).await.unwrap();
    assert_eq!(report.tickets_created, 0);
    assert_eq!(report.trials_failed, 0);
    assert_eq!(report.transitions_applied, 0);
    assert_eq!(tracker.calls().creates, vec!["TM-2".to_string()]);
}

#[tokio::test]
async fn interrupted_walk_is_resumed_on_the_next_run() {
    let config = Config::default();
    let tracker = Arc::new(tracker(&config));
    let store = store().await;
    let manager = manager(&config, &tracker, &store);
    tracker.fail_next("transition");

    let report = manager.run(None, TicketKind::Epic).await.unwrap();
    assert_eq!(report.trials_failed, 1);
    assert_eq!(report.transitions_applied, 0);
    assert_eq!(tracker.get("TM-2").await.unwrap().status_name(), Some("In Execution"));
    let stored = store.select_one("issues", "issue_key", "TM-2").await.unwrap().unwrap();
    assert_eq!(stored.get_str("status_name").as_deref(), Some("In Execution"));

    let report = manager.run(None, TicketKind::Epic).await.unwrap();
    assert_eq!(report.tickets_created, 0);
    assert_eq!(report.trials_failed, 0);
    assert_eq!(report.transitions_applied, 1);
    assert_eq!(
        tracker.get("TM-2").await.unwrap().status_name(),
        Some("Waiting for Data")
    );
    let stored = store.select_one("issues", "issue_key", "TM-2").await.unwrap().unwrap();
    assert_eq!(stored.get_str("status_name").as_deref(), Some("Waiting for Data"));

    let report = manager.run(None, TicketKind::Epic).await.unwrap();
    assert_eq!(report.transitions_applied, 0);
    assert_eq!(tracker.calls().creates, vec!["TM-2".to_string()]);
}

#[tokio::test]
async fn failed_epic_link_is_repaired_without_a_duplicate() {
    let config = Config::default();
    let tracker = Arc::new(tracker(&config));
    let store = store().await;
    let manager = manager(&config, &tracker, &store);
    tracker.fail_next("add_to_epic");

    let report = manager.run(None, TicketKind::Epic).await.unwrap();
    assert_eq!(report.tickets_created, 1);
    assert_eq!(report.trials_failed, 1);
    assert!(tracker.get("TM-2").await.unwrap().fields.extra.get("customfield_10690").is_none());

    let report = manager.run(None, TicketKind::Epic).await.unwrap();
    assert_eq!(report.tickets_created, 0);
    assert_eq!(report.trials_failed, 0);
    assert_eq!(tracker.calls().creates, vec!["TM-2".to_string()]);
    let issue = tracker.get("TM-2").await.unwrap();
    assert_eq!(issue.fields.extra["customfield_10690"], json!("TM-1"));
    let stored = store.select_one("issues", "issue_key", "TM-2").await.unwrap().unwrap();
    assert_eq!(stored.get_str("epic_link").as_deref(), Some("TM-1"));

    let links = tracker.calls().epic_links.len();
    manager.run(None, TicketKind::Epic).await.unwrap();
    assert_eq!(tracker.calls().epic_links.len(), links);
}

#[tokio::test]
async fn interrupted_subtask_walk_is_resumed_on_the_next_run() {
    let config = Config::default();
    let tracker = Arc::new(InMemoryTracker::from_config(&config).seed(trial_issue("TM-1", "T-02")));
    let store = store().await;
    add_upload(&store).await;
    let manager = manager(&config, &tracker, &store);
    tracker.fail_next("transition");

    let report = manager.run(Some("TM-1"), TicketKind::Subtask).await.unwrap();
    assert_eq!(report.tickets_created, 1);
    assert_eq!(report.subtasks_failed, 1);
    assert_eq!(tracker.get("TM-2").await.unwrap().status_id(), Some(1));
    assert_eq!(store.latest_version(&SUB_TASKS, "TM-2").await.unwrap(), Some(0));

    let report = manager.run(Some("TM-1"), TicketKind::Subtask).await.unwrap();
    assert_eq!(report.tickets_created, 0);
    assert_eq!(report.subtasks_failed, 0);
    assert_eq!(report.transitions_applied, 2);
    assert_eq!(tracker.get("TM-2").await.unwrap().status_id(), Some(10820));
    assert_eq!(tracker.calls().creates, vec!["TM-2".to_string()]);
}
