use std::collections::HashMap;

use serde_json::{json, Map};
use ts_core::schema::TRIAL_DESC_COLUMNS;
use ts_core::types::{CustomField, IssueRecord, Row};

use super::{ProtocolManager, Result, SyncReport};
use crate::jira::description::render_description;
use crate::jira::entity::{JiraEpic, JiraIssue};
use crate::jira::{filter, search_all, JiraError, Ticket};

impl ProtocolManager {
    /// Create or update one trial issue per trial row of the epic's protocol.
    /// Issues are matched to trials by summary == trial name.
    pub(super) async fn manage_trials_for_epic(
        &self,
        epic: &JiraEpic,
        protocol: &Row,
        report: &mut SyncReport,
    ) -> Result<()> {
        let Some(protocol_uuid) = protocol.get_str("uuid") else {
            tracing::error!(epic = %epic.key(), "protocol row has no uuid");
            return Ok(());
        };
        let trials = self
            .store
            .select_all("trial", "protocol_uuid", &protocol_uuid)
            .await?;
        let existing = search_all(
            self.tracker.as_ref(),
            &filter::issues_in_epic_jql(epic.key()),
            self.config.tracker.page_size,
        )
        .await?;
        let by_summary: HashMap<&str, &Ticket> = existing
            .iter()
            .filter_map(|t| t.fields.summary.as_deref().map(|s| (s, t)))
            .collect();
        tracing::info!(
            epic = %epic.key(),
            trials = trials.len(),
            issues = existing.len(),
            "reconciling trials"
        );

        for trial in &trials {
            let Some(name) = trial.get_str("name") else {
                tracing::warn!(epic = %epic.key(), "trial row without a name, skipping");
                continue;
            };
            let outcome = match by_summary.get(name.as_str()) {
                Some(ticket) => self.handle_existing_issue(epic, ticket, trial, report).await,
                None => match self.find_unlinked_issue(epic, &name).await {
                    Ok(Some(ticket)) => self.handle_existing_issue(epic, &ticket, trial, report).await,
                    Ok(None) => self.create_new_issue(epic, &name, trial, report).await,
                    Err(e) => Err(e),
                },
            };
            if let Err(e) = outcome {
                tracing::error!(epic = %epic.key(), trial = %name, error = %e, "error managing trial");
                report.trials_failed += 1;
            }
        }
        Ok(())
    }

    /// A persisted issue for `trial_name` that never got its epic link,
    /// e.g. because linking failed right after the create.
    async fn find_unlinked_issue(&self, epic: &JiraEpic, trial_name: &str) -> Result<Option<Ticket>> {
        let Some(row) = self.store.select_one("issues", "trial_id", trial_name).await? else {
            return Ok(None);
        };
        let Some(key) = row.get_str("issue_key") else {
            return Ok(None);
        };
        if row.get_str("epic_link").is_some_and(|link| link != epic.key()) {
            return Ok(None);
        }
        match self.tracker.get(&key).await {
            Ok(ticket) => {
                tracing::info!(epic = %epic.key(), issue = %key, trial = %trial_name, "found persisted issue outside the epic");
                Ok(Some(ticket))
            }
            Err(JiraError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Bring an existing issue up to date. Work left over from an
    /// interrupted create is resumed: a missing epic link is added and an
    /// issue still on its way to the initial status is walked there.
    async fn handle_existing_issue(
        &self,
        epic: &JiraEpic,
        ticket: &Ticket,
        trial: &Row,
        report: &mut SyncReport,
    ) -> Result<()> {
        let issue = JiraIssue::from_ticket(ticket, &self.fields);
        let mut touched = false;

        if issue.epic_link.as_deref() != Some(epic.key()) {
            tracing::info!(epic = %epic.key(), issue = %issue.key(), "linking issue to epic");
            self.tracker
                .add_to_epic(epic.key(), std::slice::from_ref(&issue.ticket.key))
                .await?;
            touched = true;
        }

        let initial = &self.config.workflow.issue_initial_status;
        let status: Option<u64> = issue.ticket.status_id.as_deref().and_then(|s| s.parse().ok());
        if status.is_some_and(|id| self.planner.precedes(issue.ticket.issue_type.as_deref(), id, initial)) {
            tracing::info!(issue = %issue.key(), status = ?issue.ticket.status_name, "resuming walk to initial status");
            let steps = self
                .planner
                .walk(self.tracker.as_ref(), issue.key(), initial)
                .await?;
            report.transitions_applied += steps;
            touched = true;
        }

        if is_trial_updated(&issue, trial) {
            tracing::info!(issue = %issue.key(), "found newer trial, updating description");
            let description = render_description(
                issue.ticket.description.as_deref(),
                trial,
                TRIAL_DESC_COLUMNS,
                &[],
            );
            let mut fields = Map::new();
            fields.insert("description".into(), json!(description));
            self.tracker.update(issue.key(), fields).await?;
            report.tickets_updated += 1;
        } else if !touched && !self.record_changed(&issue.to_record()).await? {
            return Ok(());
        }

        let ticket = self.tracker.get(issue.key()).await?;
        let issue = JiraIssue::from_ticket(&ticket, &self.fields);
        self.persist(&issue.to_record(), false, report).await;
        Ok(())
    }

    /// Create the trial issue, link it to the epic, attach the map and walk
    /// it to the initial status. A failed create is logged and the trial
    /// skipped. Once the ticket exists, failed follow-up steps are logged
    /// and counted, and the ticket is still persisted.
    async fn create_new_issue(
        &self,
        epic: &JiraEpic,
        name: &str,
        trial: &Row,
        report: &mut SyncReport,
    ) -> Result<()> {
        tracing::info!(epic = %epic.key(), trial = %name, "creating issue for trial");
        let Some(key) = self.create_trial_ticket(epic, name, trial).await? else {
            return Ok(());
        };
        report.tickets_created += 1;
        let mut complete = true;

        if let Err(e) = self
            .tracker
            .add_to_epic(epic.key(), std::slice::from_ref(&key))
            .await
        {
            tracing::error!(epic = %epic.key(), issue = %key, error = %e, "failed to link issue to epic");
            complete = false;
        }

        match self.maps.render(name).await {
            Some(png) => match self
                .tracker
                .add_attachment(&key, png, &self.config.sync.map_attachment_filename)
                .await
            {
                Ok(()) => report.attachments += 1,
                Err(e) => {
                    tracing::error!(trial = %name, issue = %key, error = %e, "failed to attach map");
                    complete = false;
                }
            },
            None => tracing::error!(
                trial = %name,
                issue = %key,
                "no field data available, no map attached"
            ),
        }

        match self
            .planner
            .walk(
                self.tracker.as_ref(),
                &key,
                &self.config.workflow.issue_initial_status,
            )
            .await
        {
            Ok(steps) => report.transitions_applied += steps,
            Err(e) => {
                tracing::error!(issue = %key, error = %e, "failed to reach initial status");
                complete = false;
            }
        }

        let ticket = self.tracker.get(&key).await?;
        let issue = JiraIssue::from_ticket(&ticket, &self.fields);
        self.persist(&issue.to_record(), false, report).await;
        if !complete {
            report.trials_failed += 1;
        }
        Ok(())
    }

    async fn create_trial_ticket(
        &self,
        epic: &JiraEpic,
        name: &str,
        trial: &Row,
    ) -> Result<Option<String>> {
        let labels: Vec<String> = self
            .create_labels(&epic.ticket.labels, epic.protocol_id.as_deref())
            .into_iter()
            .map(|l| l.replace(' ', "-"))
            .collect();
        let prelude = self.farm_field_prelude(trial).await?;
        let description = render_description(None, trial, TRIAL_DESC_COLUMNS, &prelude);

        let assignee = match epic.ticket.assignee_email.as_deref() {
            Some(email) => match self.tracker.search_user(email).await {
                Ok(user) => user,
                Err(e) => {
                    tracing::warn!(email, error = %e, "assignee lookup failed");
                    None
                }
            },
            None => None,
        };
        tracing::debug!(trial = %name, assignee = ?assignee, "assignee resolved");

        let tracker = &self.config.tracker;
        let mut fields = Map::new();
        fields.insert("project".into(), self.project_ref());
        fields.insert("summary".into(), json!(name));
        fields.insert("description".into(), json!(description));
        fields.insert("issuetype".into(), json!({ "name": tracker.trial_issue_type }));
        fields.insert("labels".into(), json!(labels));
        fields.insert(self.fields.key(CustomField::TrialId).into(), json!(name));
        if let Some(user) = &assignee {
            fields.insert("assignee".into(), json!({ "name": user.name }));
            fields.insert(
                self.fields.key(CustomField::TrialEngineer).into(),
                json!({ "name": user.name }),
            );
        }

        match self.tracker.create(fields).await {
            Ok(key) => {
                tracing::info!(trial = %name, issue = %key, "issue created");
                Ok(Some(key))
            }
            Err(e) => {
                tracing::error!(trial = %name, error = %e, "failed to create issue");
                Ok(None)
            }
        }
    }

    /// `Farm Name: ...` / `Field Name: ...` lines for the trial's field.
    async fn farm_field_prelude(&self, trial: &Row) -> Result<Vec<String>> {
        let Some(field_uuid) = trial.get_str("field_uuid") else {
            return Ok(Vec::new());
        };
        let Some((farm, field)) = self.store.farm_and_field_names(&field_uuid).await? else {
            tracing::warn!(field_uuid = %field_uuid, "field not found for trial");
            return Ok(Vec::new());
        };
        let mut prelude = Vec::new();
        if let Some(farm) = farm {
            prelude.push(format!("Farm Name: {farm}"));
        }
        if let Some(field) = field {
            prelude.push(format!("Field Name: {field}"));
        }
        Ok(prelude)
    }
}

/// The trial row is newer than the table embedded in the issue, or the
/// issue has no embedded timestamp while the trial has one.
fn is_trial_updated(issue: &JiraIssue, trial: &Row) -> bool {
    match (trial.get_timestamp("last_updated"), issue.last_updated()) {
        (Some(trial), Some(embedded)) => trial > embedded,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jira::fields::FieldMap;

    fn issue(description: &str) -> JiraIssue {
        let ticket: Ticket = serde_json::from_value(json!({
            "id": "2", "key": "TM-2", "fields": {"description": description}
        }))
        .unwrap();
        JiraIssue::from_ticket(&ticket, &FieldMap::default())
    }

    #[test]
    fn trial_update_needs_a_newer_row() {
        let trial = Row::new().with("last_updated", "2024-03-01T12:00:00");
        assert!(is_trial_updated(&issue("||last_updated||\n|2024-03-01 11:59:59|"), &trial));
        assert!(!is_trial_updated(&issue("||last_updated||\n|2024-03-01 12:00:00|"), &trial));
        assert!(is_trial_updated(&issue(""), &trial));
        assert!(!is_trial_updated(&issue(""), &Row::new()));
    }
}
