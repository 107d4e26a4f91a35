//! Reconciliation engine: keeps epics, trial issues and uploaded-data
//! subtasks in the tracker in step with the protocol database.
//!
//! Processing is sequential. Each epic, trial and subtask row is isolated:
//! its failure is logged and counted, and the sweep moves on. Only the
//! top-level epic query aborts a run.

mod epics;
mod subtasks;
mod trials;

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use ts_core::config::Config;
use ts_core::normalize::{diff_columns, has_changed};
use ts_core::store::{StoreError, SyncStore};
use ts_core::types::{SyncRecord, TicketKind};

use super::fields::FieldMap;
use super::filter;
use super::transition::{TransitionError, TransitionPlanner};
use super::{search_all, JiraError, Tracker};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("tracker: {0}")]
    Tracker(#[from] JiraError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("transition: {0}")]
    Transition(#[from] TransitionError),
}

pub type Result<T> = std::result::Result<T, SyncError>;

static EPIC_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-(?P<code>\w{3})-\w{2}-\w{5}-\d{2}$").expect("epic name regex is valid")
});

/// Counters for one run. Failures are reported through logs only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub epics_seen: u32,
    pub epics_skipped: u32,
    pub epics_failed: u32,
    pub trials_failed: u32,
    pub subtasks_failed: u32,
    pub tickets_created: u32,
    pub tickets_updated: u32,
    pub transitions_applied: u32,
    pub records_persisted: u32,
    pub version_bumps: u32,
    pub attachments: u32,
}

/// Renders the field/zone map attached to new trial issues.
#[async_trait::async_trait]
pub trait MapRenderer: Send + Sync {
    /// PNG bytes for the trial, or `None` when it has no geodata.
    async fn render(&self, trial_name: &str) -> Option<Vec<u8>>;
}

/// Renderer for deployments without map support.
pub struct NoMapRenderer;

#[async_trait::async_trait]
impl MapRenderer for NoMapRenderer {
    async fn render(&self, _trial_name: &str) -> Option<Vec<u8>> {
        None
    }
}

pub struct ProtocolManager {
    config: Config,
    tracker: Arc<dyn Tracker>,
    store: SyncStore,
    maps: Arc<dyn MapRenderer>,
    fields: FieldMap,
    planner: TransitionPlanner,
}

impl ProtocolManager {
    pub fn new(
        config: &Config,
        tracker: Arc<dyn Tracker>,
        store: SyncStore,
        maps: Arc<dyn MapRenderer>,
    ) -> Self {
        Self {
            fields: FieldMap::from_config(&config.tracker),
            planner: TransitionPlanner::from_config(
                &config.workflow,
                &config.tracker.subtask_issue_type,
            ),
            config: config.clone(),
            tracker,
            store,
            maps,
        }
    }

    /// Run one job: the epic sweep, nothing for trials (they are reconciled
    /// through their epic), or subtask reconciliation for one issue or for
    /// every open issue.
    pub async fn run(&self, ticket_key: Option<&str>, kind: TicketKind) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        tracing::info!(kind = %kind, ticket_key, "sync run started");
        match kind {
            TicketKind::Epic => self.manage_epics(ticket_key, &mut report).await?,
            TicketKind::Trial => {
                tracing::info!("trial issues are reconciled through their epic; nothing to do")
            }
            TicketKind::Subtask => match ticket_key {
                Some(key) => self.manage_subtasks_for_issue(key, &mut report).await?,
                None => self.manage_all_subtasks(&mut report).await?,
            },
        }
        tracing::info!(?report, "sync run finished");
        Ok(report)
    }

    async fn manage_all_subtasks(&self, report: &mut SyncReport) -> Result<()> {
        let jql = filter::issue_jql(&self.config.tracker);
        let issues = search_all(self.tracker.as_ref(), &jql, self.config.tracker.page_size).await?;
        for issue in issues {
            self.isolated_subtasks(&issue.key, report).await;
        }
        Ok(())
    }

    /// Subtask reconciliation for one issue, with failures logged and
    /// counted instead of propagated.
    async fn isolated_subtasks(&self, issue_key: &str, report: &mut SyncReport) {
        if let Err(e) = self.manage_subtasks_for_issue(issue_key, report).await {
            tracing::error!(issue = %issue_key, error = %e, "subtask reconciliation failed");
            report.subtasks_failed += 1;
        }
    }

    // -----------------------------------------------------------------------
    // Shared rules
    // -----------------------------------------------------------------------

    /// `NNNN-CCC-CC-CCCCC-NN`: digits where `N`, word characters where `C`,
    /// and the three-letter code must not be a reserved placeholder.
    pub fn is_valid_epic_name(&self, protocol_id: Option<&str>) -> bool {
        let Some(caps) = protocol_id.and_then(|id| EPIC_NAME.captures(id)) else {
            return false;
        };
        let code = &caps["code"];
        !self
            .config
            .sync
            .reserved_protocol_codes
            .iter()
            .any(|r| r == code)
    }

    /// Existing labels plus every protocol-id segment but the last, in order,
    /// without duplicates.
    pub fn create_labels(&self, labels: &[String], protocol_id: Option<&str>) -> Vec<String> {
        let mut merged = labels.to_vec();
        let Some(id) = protocol_id else {
            return merged;
        };
        let parts: Vec<&str> = id.split('-').collect();
        for part in &parts[..parts.len().saturating_sub(1)] {
            if !merged.iter().any(|l| l == part) {
                merged.push((*part).to_string());
            }
        }
        merged
    }

    /// Upsert a record, logging instead of propagating store failures.
    async fn persist<R: SyncRecord>(&self, record: &R, new_version: bool, report: &mut SyncReport) {
        let schema = R::schema();
        match self.store.upsert_record(record, new_version).await {
            Ok(version) => {
                report.records_persisted += 1;
                if new_version && version > 0 {
                    report.version_bumps += 1;
                }
                tracing::info!(
                    table = schema.table,
                    key = record.natural_key(),
                    version,
                    "record persisted"
                );
            }
            Err(e) => {
                tracing::error!(
                    table = schema.table,
                    key = record.natural_key(),
                    error = %e,
                    "failed to persist record"
                );
            }
        }
    }

    /// Whether the live record differs from its stored row. A missing row
    /// counts as changed.
    async fn record_changed<R: SyncRecord>(&self, record: &R) -> Result<bool> {
        let schema = R::schema();
        let stored = self.store.find_record::<R>(record.lookup_id()).await?;
        let live = record.to_columns().map_err(StoreError::from)?;
        let stored = stored.map(|row| row.to_map());
        let changed = has_changed(schema, stored.as_ref(), &live);
        if changed {
            match &stored {
                Some(stored) => tracing::info!(
                    table = schema.table,
                    key = record.natural_key(),
                    columns = ?diff_columns(schema, stored, &live),
                    "tracked fields changed"
                ),
                None => tracing::warn!(
                    table = schema.table,
                    key = record.natural_key(),
                    "record not in database yet"
                ),
            }
        }
        Ok(changed)
    }

    fn project_ref(&self) -> serde_json::Value {
        serde_json::json!({ "id": self.config.tracker.project_id.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jira::InMemoryTracker;

    async fn manager() -> ProtocolManager {
        let config = Config::default();
        let tracker = Arc::new(InMemoryTracker::from_config(&config));
        let store = SyncStore::new_in_memory().await.unwrap();
        ProtocolManager::new(&config, tracker, store, Arc::new(NoMapRenderer))
    }

    #[tokio::test]
    async fn epic_name_pattern() {
        let m = manager().await;
        assert!(m.is_valid_epic_name(Some("2024-ABC-DE-FGHIJ-01")));
        assert!(m.is_valid_epic_name(Some("2024-A_1-D2-F3H4J-99")));
        assert!(!m.is_valid_epic_name(Some("2024-XXX-DE-FGHIJ-01")));
        assert!(!m.is_valid_epic_name(Some("2024-XQA-DE-FGHIJ-01")));
        assert!(!m.is_valid_epic_name(Some("24-ABC-DE-FGHIJ-01")));
        assert!(!m.is_valid_epic_name(Some("2024-ABC-DE-FGHIJ-1")));
        assert!(!m.is_valid_epic_name(Some("2024-ABC-DE-FGHIJ-01-X")));
        assert!(!m.is_valid_epic_name(Some("2024-AB!-DE-FGHIJ-01")));
        assert!(!m.is_valid_epic_name(None));
    }

    #[tokio::test]
    async fn labels_keep_existing_and_append_segments() {
        let m = manager().await;
        let labels = m.create_labels(&["ABC".into(), "custom".into()], Some("2024-ABC-DE-FGHIJ-01"));
        assert_eq!(labels, vec!["ABC", "custom", "2024", "DE", "FGHIJ"]);
        assert_eq!(m.create_labels(&["x".into()], None), vec!["x"]);
    }
}
