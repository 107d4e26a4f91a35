use chrono::{NaiveDate, NaiveDateTime};
use serde_json::json;
use ts_core::normalize::has_changed;
use ts_core::store::SyncStore;
use ts_core::types::{EpicRecord, IssueRecord, SubtaskRecord, SyncRecord};

fn ts(raw: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").unwrap()
}

fn issue(key: &str, id: &str) -> IssueRecord {
    IssueRecord {
        trial_uuid: Some("trial-1".into()),
        trial_id: Some("T-01".into()),
        created: Some(ts("2024-01-01 08:00:00")),
        updated: Some(ts("2024-01-02 09:30:00")),
        last_viewed: None,
        watch_count: 1,
        labels: vec!["2024".into(), "DE".into()],
        status_name: Some("Waiting for Data".into()),
        status_id: Some("11922".into()),
        status_category: Some("In Progress".into()),
        summary: Some("T-01".into()),
        creator_email: Some("bot@example.com".into()),
        comments_count: 0,
        due_date: Some(NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()),
        issue_id: id.into(),
        issue_key: key.into(),
        trial_engineer_email: None,
        assignee_email: Some("owner@example.com".into()),
        last_updated: Some(ts("2024-01-01 07:00:00")),
        epic_link: Some("TM-1".into()),
        requestor_email: None,
        subtask_ids: vec![],
        subtask_keys: vec![],
    }
}

fn subtask(key: &str) -> SubtaskRecord {
    SubtaskRecord {
        parent_issue: Some("TM-2".into()),
        subtask_key: key.into(),
        file_uuid: Some("file-1".into()),
        trial_id: Some("T-01".into()),
        created: Some(ts("2024-01-03 10:00:00")),
        updated: Some(ts("2024-01-03 10:00:00")),
        last_viewed: None,
        watch_count: 0,
        labels: vec!["b".into(), "a".into()],
        status_name: Some("Waiting".into()),
        status_category: None,
        status_id: Some("10820".into()),
        summary: Some("T-01_yield".into()),
        creator_email: None,
        comments_count: 0,
        trial_engineer_email: None,
        assignee_email: None,
    }
}

// ===========================================================================
// Versioning
// ===========================================================================

#[tokio::test]
async fn first_sighting_is_version_zero() {
    let store = SyncStore::new_in_memory().await.unwrap();
    let version = store.upsert_record(&issue("TM-2", "1002"), false).await.unwrap();
    assert_eq!(version, 0);
    assert_eq!(store.count_rows("issues").await.unwrap(), 1);
}

#[tokio::test]
async fn version_carries_forward_without_flag() {
    let store = SyncStore::new_in_memory().await.unwrap();
    let record = issue("TM-2", "1002");
    store.upsert_record(&record, false).await.unwrap();
    assert_eq!(store.upsert_record(&record, true).await.unwrap(), 1);
    assert_eq!(store.upsert_record(&record, false).await.unwrap(), 1);
    assert_eq!(store.upsert_record(&record, true).await.unwrap(), 2);

    let stored = store.find_record::<IssueRecord>("1002").await.unwrap().unwrap();
    assert_eq!(stored.get("version"), Some(&json!(2)));
    assert!(stored.get_str("update_timestamp").is_some());
    assert_eq!(store.count_rows("issues").await.unwrap(), 1);
}

#[tokio::test]
async fn conflict_overwrites_every_other_column() {
    let store = SyncStore::new_in_memory().await.unwrap();
    let mut record = issue("TM-2", "1002");
    store.upsert_record(&record, false).await.unwrap();

    record.status_name = Some("Data Control".into());
    record.labels = vec!["other".into()];
    store.upsert_record(&record, false).await.unwrap();

    let stored = store.find_record::<IssueRecord>("1002").await.unwrap().unwrap();
    assert_eq!(stored.get_str("status_name").as_deref(), Some("Data Control"));
    assert_eq!(stored.get("labels"), Some(&json!(["other"])));
}

#[tokio::test]
async fn latest_version_is_none_for_unknown_ids() {
    let store = SyncStore::new_in_memory().await.unwrap();
    assert!(store
        .latest_version(IssueRecord::schema(), "missing")
        .await
        .unwrap()
        .is_none());
}

// ===========================================================================
// Stored form vs. live projection
// ===========================================================================

#[tokio::test]
async fn stored_row_compares_equal_to_its_record() {
    let store = SyncStore::new_in_memory().await.unwrap();
    let record = issue("TM-2", "1002");
    store.upsert_record(&record, false).await.unwrap();

    let stored = store.find_record::<IssueRecord>("1002").await.unwrap().unwrap();
    assert_eq!(stored.get_str("due_date").as_deref(), Some("2024-06-30"));
    assert_eq!(stored.get_str("updated").as_deref(), Some("2024-01-02 09:30:00"));

    let live = record.to_columns().unwrap();
    assert!(!has_changed(IssueRecord::schema(), Some(&stored.to_map()), &live));

    let mut moved = record.clone();
    moved.updated = Some(ts("2024-01-02 09:30:01"));
    let live = moved.to_columns().unwrap();
    assert!(has_changed(IssueRecord::schema(), Some(&stored.to_map()), &live));
}

#[tokio::test]
async fn subtasks_are_keyed_by_subtask_key() {
    let store = SyncStore::new_in_memory().await.unwrap();
    store.upsert_record(&subtask("TM-3"), false).await.unwrap();
    store.upsert_record(&subtask("TM-4"), false).await.unwrap();

    let by_file = store.select_all("sub_tasks", "file_uuid", "file-1").await.unwrap();
    assert_eq!(by_file.len(), 2);
    assert_eq!(by_file[0].get("labels"), Some(&json!(["b", "a"])));
    assert!(store.find_record::<SubtaskRecord>("TM-4").await.unwrap().is_some());
}

#[tokio::test]
async fn epic_rows_use_epic_key_conflict() {
    let store = SyncStore::new_in_memory().await.unwrap();
    let epic = EpicRecord {
        protocol_uuid: Some("proto-1".into()),
        last_updated: Some(ts("2024-01-01 00:00:00")),
        epic_id: "1001".into(),
        epic_key: "TM-1".into(),
        summary: Some("2024-ABC-DE-FGHIJ-01".into()),
        protocol_id: Some("2024-ABC-DE-FGHIJ-01".into()),
        assignee_email: None,
        requestor_email: None,
        trial_engineer_email: None,
        protocol_sheet: None,
        year_of_harvest: Some(2024),
        country: Some("DE".into()),
        crop: Some("Wheat".into()),
        business_case: None,
        trial_type: None,
        trial_objective: None,
        budget: Some(1200.5),
        paid_costs: None,
        forecasted_costs: None,
        planned_trials: Some(3),
        executed_trials: None,
        sponsor: None,
        cost_sheet: None,
        url_field: Some("https://tracker/browse/TM-1".into()),
        components: vec![],
        created: None,
        updated: None,
        last_viewed: None,
        watch_count: 0,
        labels: vec![],
        status_name: Some("Open".into()),
        status_id: Some("1".into()),
        status_category: None,
        creator_email: None,
        comments_count: 0,
        due_date: None,
    };
    store.upsert_record(&epic, false).await.unwrap();
    store.upsert_record(&epic, true).await.unwrap();

    let stored = store.find_record::<EpicRecord>("1001").await.unwrap().unwrap();
    assert_eq!(stored.get("version"), Some(&json!(1)));
    assert_eq!(stored.get("budget"), Some(&json!(1200.5)));
    assert_eq!(store.count_rows("epics").await.unwrap(), 1);
}
