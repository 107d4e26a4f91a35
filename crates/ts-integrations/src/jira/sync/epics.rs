use serde_json::{json, Map};
use ts_core::schema::EPIC_DESC_COLUMNS;
use ts_core::types::{EpicRecord, Row};

use super::{ProtocolManager, Result, SyncReport};
use crate::jira::description::render_description;
use crate::jira::entity::JiraEpic;
use crate::jira::{filter, search_all};

impl ProtocolManager {
    /// Reconcile every active epic, or only `only_key` when given. After each
    /// epic, the subtasks of its issues are reconciled too.
    pub(super) async fn manage_epics(
        &self,
        only_key: Option<&str>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let tracker = &self.config.tracker;
        let jql = match tracker.active_filter_id {
            Some(id) => self.tracker.filter_jql(id).await?,
            None => filter::epic_jql(tracker),
        };
        let tickets = search_all(self.tracker.as_ref(), &jql, tracker.page_size).await?;
        tracing::info!(count = tickets.len(), "epics fetched");

        let mut found = false;
        for ticket in &tickets {
            if only_key.is_some_and(|k| k != ticket.key) {
                continue;
            }
            found = true;
            report.epics_seen += 1;

            let epic = JiraEpic::from_ticket(ticket, &self.fields, &tracker.server_url);
            if let Err(e) = self.manage_single_epic(epic, report).await {
                tracing::error!(epic = %ticket.key, error = %e, "error managing epic");
                report.epics_failed += 1;
            }

            match search_all(
                self.tracker.as_ref(),
                &filter::issues_in_epic_jql(&ticket.key),
                tracker.page_size,
            )
            .await
            {
                Ok(issues) => {
                    for issue in issues {
                        self.isolated_subtasks(&issue.key, report).await;
                    }
                }
                Err(e) => {
                    tracing::error!(epic = %ticket.key, error = %e, "failed to list issues of epic")
                }
            }

            if only_key.is_some() {
                break;
            }
        }

        if let (Some(key), false) = (only_key, found) {
            tracing::warn!(epic = %key, "epic not among the active epics");
        }
        Ok(())
    }

    /// Validate the epic's protocol id, bring the epic in line with its
    /// protocol, and reconcile the protocol's trials.
    pub(super) async fn manage_single_epic(
        &self,
        epic: JiraEpic,
        report: &mut SyncReport,
    ) -> Result<()> {
        let protocol_id = epic.protocol_id.clone();
        if !self.is_valid_epic_name(protocol_id.as_deref()) {
            tracing::info!(epic = %epic.key(), protocol_id = ?protocol_id, "invalid protocol id, skipping");
            report.epics_skipped += 1;
            return Ok(());
        }
        let protocol_id = protocol_id.unwrap_or_default();

        let Some(protocol) = self.store.select_one("protocol", "name", &protocol_id).await? else {
            tracing::info!(
                epic = %epic.key(),
                protocol_id = %protocol_id,
                "protocol not in database yet, skipping trials"
            );
            report.epics_skipped += 1;
            return Ok(());
        };

        let epic = self.handle_existing_protocol(epic, &protocol, report).await?;
        self.manage_trials_for_epic(&epic, &protocol, report).await
    }

    /// Refresh the epic from its protocol and push tracked-field changes.
    /// Returns the epic as last read from the tracker.
    async fn handle_existing_protocol(
        &self,
        mut epic: JiraEpic,
        protocol: &Row,
        report: &mut SyncReport,
    ) -> Result<JiraEpic> {
        if self.store.find_record::<EpicRecord>(&epic.ticket.id).await?.is_none() {
            tracing::info!(epic = %epic.key(), "new epic, adding labels and protocol table");
            return self.refresh_epic(&epic, protocol, false, report).await;
        }

        if is_protocol_updated(&epic, protocol) {
            tracing::info!(epic = %epic.key(), "protocol has been updated, refreshing epic");
            epic = self.refresh_epic(&epic, protocol, false, report).await?;
        }
        if self.record_changed(&epic.to_record()).await? {
            tracing::info!(epic = %epic.key(), "epic has been altered, updating ticket");
            epic = self.refresh_epic(&epic, protocol, true, report).await?;
        }
        Ok(epic)
    }

    /// Push description and labels, re-read, persist.
    async fn refresh_epic(
        &self,
        epic: &JiraEpic,
        protocol: &Row,
        new_version: bool,
        report: &mut SyncReport,
    ) -> Result<JiraEpic> {
        let description = render_description(
            epic.ticket.description.as_deref(),
            protocol,
            EPIC_DESC_COLUMNS,
            &[],
        );
        let labels = self.create_labels(&epic.ticket.labels, epic.protocol_id.as_deref());

        let mut fields = Map::new();
        fields.insert("description".into(), json!(description));
        fields.insert("labels".into(), json!(labels));
        self.tracker.update(epic.key(), fields).await?;
        report.tickets_updated += 1;

        let ticket = self.tracker.get(epic.key()).await?;
        let refreshed = JiraEpic::from_ticket(&ticket, &self.fields, &self.config.tracker.server_url);
        self.persist(&refreshed.to_record(), new_version, report).await;
        Ok(refreshed)
    }
}

/// The protocol row is newer than the table embedded in the epic, or the
/// epic has no embedded timestamp yet.
fn is_protocol_updated(epic: &JiraEpic, protocol: &Row) -> bool {
    match (protocol.get_timestamp("last_updated"), epic.last_updated()) {
        (Some(protocol), Some(embedded)) => protocol > embedded,
        (Some(_), None) => true,
        (None, _) => false,
    }
}
