use serde_json::{json, Map};
use ts_core::types::{CustomField, Row, SubtaskRecord};

use super::{ProtocolManager, Result, SyncReport};
use crate::jira::description::render_description;
use crate::jira::entity::{JiraIssue, JiraSubtask};
use crate::jira::{filter, search_all, JiraError};

impl ProtocolManager {
    /// One subtask per uploaded-data row of the issue's crop season.
    pub(super) async fn manage_subtasks_for_issue(
        &self,
        issue_key: &str,
        report: &mut SyncReport,
    ) -> Result<()> {
        let ticket = match self.tracker.get(issue_key).await {
            Ok(ticket) => ticket,
            Err(JiraError::NotFound(_)) => {
                tracing::warn!(issue = %issue_key, "issue not found");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let issue = JiraIssue::from_ticket(&ticket, &self.fields);

        let Some(trial_name) = issue.trial_id.clone().or_else(|| issue.ticket.summary.clone())
        else {
            tracing::warn!(issue = %issue_key, "issue carries no trial id");
            return Ok(());
        };
        let Some(trial) = self.store.select_one("trial", "name", &trial_name).await? else {
            tracing::info!(issue = %issue_key, trial = %trial_name, "no trial row for issue");
            return Ok(());
        };
        let Some(crop_season) = trial.get_str("crop_season_uuid") else {
            tracing::info!(issue = %issue_key, trial = %trial_name, "trial has no crop season");
            return Ok(());
        };
        let uploads = self
            .store
            .select_all("uploaded_data", "cropSeasonUuid", &crop_season)
            .await?;
        if uploads.is_empty() {
            tracing::info!(issue = %issue_key, "no uploaded data found");
            return Ok(());
        }

        let subtasks: Vec<JiraSubtask> = search_all(
            self.tracker.as_ref(),
            &filter::subtasks_jql(issue_key),
            self.config.tracker.page_size,
        )
        .await?
        .iter()
        .map(|t| JiraSubtask::from_ticket(t, &self.fields))
        .collect();

        self.create_or_update_subtasks(&issue, &uploads, &subtasks, report)
            .await
    }

    async fn create_or_update_subtasks(
        &self,
        issue: &JiraIssue,
        uploads: &[Row],
        subtasks: &[JiraSubtask],
        report: &mut SyncReport,
    ) -> Result<()> {
        let mut created = 0;
        for row in uploads {
            let Some(file_uuid) = row.get_str("file_uuid") else {
                tracing::warn!(issue = %issue.key(), "uploaded data row without file uuid");
                continue;
            };

            if let Some(subtask) = subtasks
                .iter()
                .find(|s| s.file_uuid().as_deref() == Some(file_uuid.as_str()))
            {
                if let Err(e) = self.refresh_subtask(subtask, report).await {
                    tracing::error!(
                        subtask = %subtask.key(),
                        error = %e,
                        "error updating subtask"
                    );
                    report.subtasks_failed += 1;
                }
                log_if_done(subtask);
                continue;
            }

            if self
                .store
                .select_one("sub_tasks", "file_uuid", &file_uuid)
                .await?
                .is_some()
            {
                tracing::warn!(
                    issue = %issue.key(),
                    file_uuid = %file_uuid,
                    "subtask persisted but missing from tracker, skipping"
                );
                continue;
            }

            match self.create_subtask(issue, row, report).await {
                Ok(true) => created += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        issue = %issue.key(),
                        file_uuid = %file_uuid,
                        error = %e,
                        "error creating subtask"
                    );
                    report.subtasks_failed += 1;
                }
            }
        }

        // New children change the parent's subtask lists.
        if created > 0 {
            let ticket = self.tracker.get(issue.key()).await?;
            let parent = JiraIssue::from_ticket(&ticket, &self.fields);
            self.persist(&parent.to_record(), false, report).await;
        }
        Ok(())
    }

    /// Persist a changed subtask. One still on its way to the initial status
    /// is walked there first.
    async fn refresh_subtask(&self, subtask: &JiraSubtask, report: &mut SyncReport) -> Result<()> {
        let initial = &self.config.workflow.subtask_initial_status;
        let status: Option<u64> = subtask.ticket.status_id.as_deref().and_then(|s| s.parse().ok());
        if !status.is_some_and(|id| self.planner.precedes(subtask.ticket.issue_type.as_deref(), id, initial)) {
            let record = subtask.to_record();
            if self.record_changed(&record).await? {
                self.persist(&record, false, report).await;
            }
            return Ok(());
        }

        tracing::info!(subtask = %subtask.key(), status = ?subtask.ticket.status_name, "resuming walk to initial status");
        let steps = self
            .planner
            .walk(self.tracker.as_ref(), subtask.key(), initial)
            .await?;
        report.transitions_applied += steps;
        let ticket = self.tracker.get(subtask.key()).await?;
        let subtask = JiraSubtask::from_ticket(&ticket, &self.fields);
        self.persist::<SubtaskRecord>(&subtask.to_record(), false, report)
            .await;
        Ok(())
    }

    /// Returns `false` when the tracker refused the create. A failed walk
    /// after the create is counted, and the subtask is still persisted.
    async fn create_subtask(
        &self,
        issue: &JiraIssue,
        row: &Row,
        report: &mut SyncReport,
    ) -> Result<bool> {
        let parent = &issue.ticket;
        let summary = format!(
            "{}_{}",
            parent.summary.as_deref().unwrap_or(issue.key()),
            row.get_str("type").unwrap_or_default()
        );
        let description = render_description(None, row, &row.column_names(), &[]);

        let mut fields = Map::new();
        fields.insert("project".into(), self.project_ref());
        fields.insert("summary".into(), json!(summary));
        fields.insert("description".into(), json!(description));
        fields.insert(
            "issuetype".into(),
            json!({ "name": self.config.tracker.subtask_issue_type }),
        );
        fields.insert("parent".into(), json!({ "key": issue.key() }));
        fields.insert("labels".into(), json!(parent.labels));
        if let Some(name) = &parent.assignee_name {
            fields.insert("assignee".into(), json!({ "name": name }));
        }
        if let Some(trial_id) = &issue.trial_id {
            fields.insert(self.fields.key(CustomField::TrialId).into(), json!(trial_id));
        }

        let key = match self.tracker.create(fields).await {
            Ok(key) => key,
            Err(e) => {
                tracing::error!(issue = %issue.key(), summary = %summary, error = %e, "failed to create subtask");
                return Ok(false);
            }
        };
        report.tickets_created += 1;
        tracing::info!(issue = %issue.key(), subtask = %key, "subtask created");

        match self
            .planner
            .walk(
                self.tracker.as_ref(),
                &key,
                &self.config.workflow.subtask_initial_status,
            )
            .await
        {
            Ok(steps) => report.transitions_applied += steps,
            Err(e) => {
                tracing::error!(subtask = %key, error = %e, "failed to reach initial status");
                report.subtasks_failed += 1;
            }
        }

        let ticket = self.tracker.get(&key).await?;
        let subtask = JiraSubtask::from_ticket(&ticket, &self.fields);
        self.persist::<SubtaskRecord>(&subtask.to_record(), false, report)
            .await;
        Ok(true)
    }
}

fn log_if_done(subtask: &JiraSubtask) {
    if subtask.ticket.status_name.as_deref() == Some("Done") {
        tracing::info!(subtask = %subtask.key(), file_uuid = ?subtask.file_uuid(), "subtask is done");
    }
}
