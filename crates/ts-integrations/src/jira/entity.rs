//! Typed, immutable views over raw tickets.

use chrono::{NaiveDate, NaiveDateTime};
use ts_core::normalize::parse_timestamp;
use ts_core::types::{CustomField, EpicRecord, IssueRecord, SubtaskRecord};

use super::description::DescriptionTable;
use super::fields::FieldMap;
use super::Ticket;

/// Fields every ticket level shares.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketView {
    pub id: String,
    pub key: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub status_name: Option<String>,
    pub status_id: Option<String>,
    pub status_category: Option<String>,
    pub created: Option<NaiveDateTime>,
    pub updated: Option<NaiveDateTime>,
    pub last_viewed: Option<NaiveDateTime>,
    pub due_date: Option<NaiveDate>,
    pub labels: Vec<String>,
    pub components: Vec<String>,
    pub watch_count: i64,
    pub comments_count: i64,
    pub creator_email: Option<String>,
    pub assignee_email: Option<String>,
    /// Login name of the assignee, reused when creating child tickets.
    pub assignee_name: Option<String>,
    pub issue_type: Option<String>,
    pub table: DescriptionTable,
}

fn timestamp(raw: Option<&String>) -> Option<NaiveDateTime> {
    raw.and_then(|s| parse_timestamp(s))
}

impl TicketView {
    pub fn from_ticket(ticket: &Ticket) -> Self {
        let f = &ticket.fields;
        let description = f.description.clone().filter(|d| !d.trim().is_empty());
        if description.is_none() {
            tracing::warn!(key = %ticket.key, "ticket has an empty description");
        }
        let status = f.status.as_ref();
        Self {
            id: ticket.id.clone(),
            key: ticket.key.clone(),
            summary: f.summary.clone(),
            table: DescriptionTable::parse(description.as_deref()),
            description,
            status_name: status.and_then(|s| s.name.clone()),
            status_id: status.and_then(|s| s.id.clone()),
            status_category: status
                .and_then(|s| s.status_category.as_ref())
                .and_then(|c| c.name.clone()),
            created: timestamp(f.created.as_ref()),
            updated: timestamp(f.updated.as_ref()),
            last_viewed: timestamp(f.last_viewed.as_ref()),
            due_date: timestamp(f.duedate.as_ref()).map(|ts| ts.date()),
            labels: f.labels.clone(),
            components: f.components.iter().filter_map(|c| c.name.clone()).collect(),
            watch_count: f.watches.as_ref().map(|w| w.watch_count).unwrap_or_default(),
            comments_count: f.comment.as_ref().map(|c| c.total).unwrap_or_default(),
            creator_email: f.creator.as_ref().and_then(|p| p.email_address.clone()),
            assignee_email: f.assignee.as_ref().and_then(|p| p.email_address.clone()),
            assignee_name: f.assignee.as_ref().and_then(|p| p.name.clone()),
            issue_type: ticket.issue_type().map(str::to_string),
        }
    }

    /// Value under `name` in the embedded description table.
    pub fn table_value(&self, name: &str) -> Option<String> {
        self.table.get(name).map(str::to_string)
    }

    pub fn table_timestamp(&self, name: &str) -> Option<NaiveDateTime> {
        self.table.get(name).and_then(parse_timestamp)
    }
}

// ---------------------------------------------------------------------------
// Epic
// ---------------------------------------------------------------------------

/// An epic mirrors one protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct JiraEpic {
    pub ticket: TicketView,
    pub protocol_id: Option<String>,
    pub epic_name: Option<String>,
    pub requestor_email: Option<String>,
    pub trial_engineer_email: Option<String>,
    pub protocol_sheet: Option<String>,
    pub year_of_harvest: Option<i64>,
    pub business_case: Option<String>,
    pub trial_type: Option<String>,
    pub trial_objective: Option<String>,
    pub budget: Option<f64>,
    pub paid_costs: Option<f64>,
    pub forecasted_costs: Option<f64>,
    pub planned_trials: Option<i64>,
    pub executed_trials: Option<i64>,
    pub country: Option<String>,
    pub crop: Option<String>,
    pub sponsor: Option<String>,
    pub cost_sheet: Option<String>,
    pub url: String,
}

impl JiraEpic {
    pub fn from_ticket(ticket: &Ticket, fields: &FieldMap, browse_base: &str) -> Self {
        let f = &ticket.fields;
        Self {
            ticket: TicketView::from_ticket(ticket),
            protocol_id: fields.string(f, CustomField::ProtocolId),
            epic_name: fields.string(f, CustomField::EpicName),
            requestor_email: fields.nested(f, CustomField::Requestor, "emailAddress"),
            trial_engineer_email: fields.nested(f, CustomField::TrialEngineer, "emailAddress"),
            protocol_sheet: fields.string(f, CustomField::ProtocolSheet),
            year_of_harvest: fields.integer(f, CustomField::YearOfHarvest),
            business_case: fields.string(f, CustomField::BusinessCase),
            trial_type: fields.string(f, CustomField::TrialType),
            trial_objective: fields.string(f, CustomField::TrialObjective),
            budget: fields.number(f, CustomField::Budget),
            paid_costs: fields.number(f, CustomField::PaidCosts),
            forecasted_costs: fields.number(f, CustomField::ForecastedCosts),
            planned_trials: fields.integer(f, CustomField::PlannedTrials),
            executed_trials: fields.integer(f, CustomField::ExecutedTrials),
            country: fields.string(f, CustomField::Country),
            crop: fields.string(f, CustomField::Crop),
            sponsor: fields.string(f, CustomField::Sponsor),
            cost_sheet: fields.string(f, CustomField::CostSheet),
            url: format!("{}/browse/{}", browse_base.trim_end_matches('/'), ticket.key),
        }
    }

    pub fn key(&self) -> &str {
        &self.ticket.key
    }

    pub fn protocol_uuid(&self) -> Option<String> {
        self.ticket.table_value("uuid")
    }

    pub fn last_updated(&self) -> Option<NaiveDateTime> {
        self.ticket.table_timestamp("last_updated")
    }

    pub fn to_record(&self) -> EpicRecord {
        let t = &self.ticket;
        EpicRecord {
            protocol_uuid: self.protocol_uuid(),
            last_updated: self.last_updated(),
            epic_id: t.id.clone(),
            epic_key: t.key.clone(),
            summary: t.summary.clone(),
            protocol_id: self.protocol_id.clone(),
            assignee_email: t.assignee_email.clone(),
            requestor_email: self.requestor_email.clone(),
            trial_engineer_email: self.trial_engineer_email.clone(),
            protocol_sheet: self.protocol_sheet.clone(),
            year_of_harvest: self.year_of_harvest,
            country: self.country.clone(),
            crop: self.crop.clone(),
            business_case: self.business_case.clone(),
            trial_type: self.trial_type.clone(),
            trial_objective: self.trial_objective.clone(),
            budget: self.budget,
            paid_costs: self.paid_costs,
            forecasted_costs: self.forecasted_costs,
            planned_trials: self.planned_trials,
            executed_trials: self.executed_trials,
            sponsor: self.sponsor.clone(),
            cost_sheet: self.cost_sheet.clone(),
            url_field: Some(self.url.clone()),
            components: t.components.clone(),
            created: t.created,
            updated: t.updated,
            last_viewed: t.last_viewed,
            watch_count: t.watch_count,
            labels: t.labels.clone(),
            status_name: t.status_name.clone(),
            status_id: t.status_id.clone(),
            status_category: t.status_category.clone(),
            creator_email: t.creator_email.clone(),
            comments_count: t.comments_count,
            due_date: t.due_date,
        }
    }
}

// ---------------------------------------------------------------------------
// Issue
// ---------------------------------------------------------------------------

/// A trial issue mirrors one trial row.
#[derive(Debug, Clone, PartialEq)]
pub struct JiraIssue {
    pub ticket: TicketView,
    pub trial_id: Option<String>,
    pub epic_link: Option<String>,
    pub requestor_email: Option<String>,
    pub trial_engineer_email: Option<String>,
    pub subtask_ids: Vec<String>,
    pub subtask_keys: Vec<String>,
}

impl JiraIssue {
    pub fn from_ticket(ticket: &Ticket, fields: &FieldMap) -> Self {
        let f = &ticket.fields;
        Self {
            ticket: TicketView::from_ticket(ticket),
            trial_id: fields.string(f, CustomField::TrialId),
            epic_link: fields.string(f, CustomField::EpicLink),
            requestor_email: fields.nested(f, CustomField::Requestor, "emailAddress"),
            trial_engineer_email: fields.nested(f, CustomField::TrialEngineer, "emailAddress"),
            subtask_ids: f.subtasks.iter().filter_map(|s| s.id.clone()).collect(),
            subtask_keys: f.subtasks.iter().filter_map(|s| s.key.clone()).collect(),
        }
    }

    pub fn key(&self) -> &str {
        &self.ticket.key
    }

    pub fn trial_uuid(&self) -> Option<String> {
        self.ticket.table_value("uuid")
    }

    pub fn last_updated(&self) -> Option<NaiveDateTime> {
        self.ticket.table_timestamp("last_updated")
    }

    pub fn crop_season_uuid(&self) -> Option<String> {
        self.ticket.table_value("crop_season_uuid")
    }

    pub fn to_record(&self) -> IssueRecord {
        let t = &self.ticket;
        IssueRecord {
            trial_uuid: self.trial_uuid(),
            trial_id: self.trial_id.clone(),
            created: t.created,
            updated: t.updated,
            last_viewed: t.last_viewed,
            watch_count: t.watch_count,
            labels: t.labels.clone(),
            status_name: t.status_name.clone(),
            status_id: t.status_id.clone(),
            status_category: t.status_category.clone(),
            summary: t.summary.clone(),
            creator_email: t.creator_email.clone(),
            comments_count: t.comments_count,
            due_date: t.due_date,
            issue_id: t.id.clone(),
            issue_key: t.key.clone(),
            trial_engineer_email: self.trial_engineer_email.clone(),
            assignee_email: t.assignee_email.clone(),
            last_updated: self.last_updated(),
            epic_link: self.epic_link.clone(),
            requestor_email: self.requestor_email.clone(),
            subtask_ids: self.subtask_ids.clone(),
            subtask_keys: self.subtask_keys.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Subtask
// ---------------------------------------------------------------------------

/// A subtask mirrors one uploaded-data row.
#[derive(Debug, Clone, PartialEq)]
pub struct JiraSubtask {
    pub ticket: TicketView,
    pub parent_key: Option<String>,
    pub trial_id: Option<String>,
    pub trial_engineer_email: Option<String>,
}

impl JiraSubtask {
    pub fn from_ticket(ticket: &Ticket, fields: &FieldMap) -> Self {
        let f = &ticket.fields;
        Self {
            ticket: TicketView::from_ticket(ticket),
            parent_key: f.parent.as_ref().and_then(|p| p.key.clone()),
            trial_id: fields.string(f, CustomField::TrialId),
            trial_engineer_email: fields.nested(f, CustomField::TrialEngineer, "emailAddress"),
        }
    }

    pub fn key(&self) -> &str {
        &self.ticket.key
    }

    pub fn file_uuid(&self) -> Option<String> {
        self.ticket.table_value("file_uuid")
    }

    pub fn to_record(&self) -> SubtaskRecord {
        let t = &self.ticket;
        SubtaskRecord {
            parent_issue: self.parent_key.clone(),
            subtask_key: t.key.clone(),
            file_uuid: self.file_uuid(),
            trial_id: self.trial_id.clone(),
            created: t.created,
            updated: t.updated,
            last_viewed: t.last_viewed,
            watch_count: t.watch_count,
            labels: t.labels.clone(),
            status_name: t.status_name.clone(),
            status_category: t.status_category.clone(),
            status_id: t.status_id.clone(),
            summary: t.summary.clone(),
            creator_email: t.creator_email.clone(),
            comments_count: t.comments_count,
            trial_engineer_email: self.trial_engineer_email.clone(),
            assignee_email: t.assignee_email.clone(),
        }
    }
}
