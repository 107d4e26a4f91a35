use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::normalize;
use crate::schema::{TableSchema, EPICS, ISSUES, SUB_TASKS};

// ---------------------------------------------------------------------------
// Custom fields
// ---------------------------------------------------------------------------

/// Logical names of the tracker custom fields the sync engine reads or writes.
///
/// The provider-specific identifier behind each name lives in the tracker
/// configuration, so the same binary can run against instances whose field
/// ids differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomField {
    ProtocolId,
    Requestor,
    TrialEngineer,
    ProtocolSheet,
    YearOfHarvest,
    BusinessCase,
    Budget,
    PaidCosts,
    Sponsor,
    CostSheet,
    DueDate,
    EpicName,
    EpicLink,
    PlannedTrials,
    ExecutedTrials,
    ForecastedCosts,
    Country,
    Crop,
    TrialId,
    TrialType,
    TrialObjective,
}

impl CustomField {
    pub const ALL: [CustomField; 21] = [
        CustomField::ProtocolId,
        CustomField::Requestor,
        CustomField::TrialEngineer,
        CustomField::ProtocolSheet,
        CustomField::YearOfHarvest,
        CustomField::BusinessCase,
        CustomField::Budget,
        CustomField::PaidCosts,
        CustomField::Sponsor,
        CustomField::CostSheet,
        CustomField::DueDate,
        CustomField::EpicName,
        CustomField::EpicLink,
        CustomField::PlannedTrials,
        CustomField::ExecutedTrials,
        CustomField::ForecastedCosts,
        CustomField::Country,
        CustomField::Crop,
        CustomField::TrialId,
        CustomField::TrialType,
        CustomField::TrialObjective,
    ];

    /// Default provider identifier for this field on the production instance.
    pub fn default_id(self) -> &'static str {
        match self {
            CustomField::ProtocolId => "12491",
            CustomField::Requestor => "12492",
            CustomField::TrialEngineer => "12493",
            CustomField::ProtocolSheet => "12494",
            CustomField::YearOfHarvest => "12496",
            CustomField::BusinessCase => "12497",
            CustomField::Budget => "12498",
            CustomField::PaidCosts => "12499",
            CustomField::Sponsor => "12500",
            CustomField::CostSheet => "12501",
            CustomField::DueDate => "duedate",
            CustomField::EpicName => "10691",
            CustomField::EpicLink => "10690",
            CustomField::PlannedTrials => "12503",
            CustomField::ExecutedTrials => "12504",
            CustomField::ForecastedCosts => "12505",
            CustomField::Country => "12495",
            CustomField::Crop => "12502",
            CustomField::TrialId => "12506",
            CustomField::TrialType => "12508",
            CustomField::TrialObjective => "12507",
        }
    }
}

// ---------------------------------------------------------------------------
// Generic rows
// ---------------------------------------------------------------------------

/// An ordered database row: column name to JSON value, in select order.
///
/// Source tables (`protocol`, `trial`, `uploaded_data`, ...) are owned
/// upstream, so they are read generically instead of through typed records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append, handy when seeding rows.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(name, value);
        self
    }

    /// Append a column, replacing the value if the column already exists.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// String form of a column. Numbers and booleans are stringified; null,
    /// blank, and absent columns yield `None`.
    pub fn get_str(&self, name: &str) -> Option<String> {
        match self.get(name)? {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn get_timestamp(&self, name: &str) -> Option<NaiveDateTime> {
        self.get_str(name)
            .and_then(|raw| normalize::parse_timestamp(&raw))
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn to_map(&self) -> Map<String, Value> {
        self.columns.iter().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Persisted records
// ---------------------------------------------------------------------------

/// A record type persisted into one of the versioned sync tables.
pub trait SyncRecord: Serialize + Send + Sync {
    fn schema() -> &'static TableSchema;

    /// Value of the schema's lookup column (`epic_id`, `issue_id`, `subtask_key`).
    fn lookup_id(&self) -> &str;

    /// Value of the schema's conflict column.
    fn natural_key(&self) -> &str;

    /// Column name to JSON value, as used for binding and comparison.
    fn to_columns(&self) -> serde_json::Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Ok(Map::from_iter([("value".to_string(), other)])),
        }
    }
}

/// Tracked fields of an epic ticket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpicRecord {
    pub protocol_uuid: Option<String>,
    pub last_updated: Option<NaiveDateTime>,
    pub epic_id: String,
    pub epic_key: String,
    pub summary: Option<String>,
    pub protocol_id: Option<String>,
    pub assignee_email: Option<String>,
    pub requestor_email: Option<String>,
    pub trial_engineer_email: Option<String>,
    pub protocol_sheet: Option<String>,
    pub year_of_harvest: Option<i64>,
    pub country: Option<String>,
    pub crop: Option<String>,
    pub business_case: Option<String>,
    pub trial_type: Option<String>,
    pub trial_objective: Option<String>,
    pub budget: Option<f64>,
    pub paid_costs: Option<f64>,
    pub forecasted_costs: Option<f64>,
    pub planned_trials: Option<i64>,
    pub executed_trials: Option<i64>,
    pub sponsor: Option<String>,
    pub cost_sheet: Option<String>,
    pub url_field: Option<String>,
    pub components: Vec<String>,
    pub created: Option<NaiveDateTime>,
    pub updated: Option<NaiveDateTime>,
    pub last_viewed: Option<NaiveDateTime>,
    pub watch_count: i64,
    pub labels: Vec<String>,
    pub status_name: Option<String>,
    pub status_id: Option<String>,
    pub status_category: Option<String>,
    pub creator_email: Option<String>,
    pub comments_count: i64,
    pub due_date: Option<NaiveDate>,
}

impl SyncRecord for EpicRecord {
    fn schema() -> &'static TableSchema {
        &EPICS
    }

    fn lookup_id(&self) -> &str {
        &self.epic_id
    }

    fn natural_key(&self) -> &str {
        &self.epic_key
    }
}

/// Tracked fields of a trial issue ticket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueRecord {
    pub trial_uuid: Option<String>,
    pub trial_id: Option<String>,
    pub created: Option<NaiveDateTime>,
    pub updated: Option<NaiveDateTime>,
    pub last_viewed: Option<NaiveDateTime>,
    pub watch_count: i64,
    pub labels: Vec<String>,
    pub status_name: Option<String>,
    pub status_id: Option<String>,
    pub status_category: Option<String>,
    pub summary: Option<String>,
    pub creator_email: Option<String>,
    pub comments_count: i64,
    pub due_date: Option<NaiveDate>,
    pub issue_id: String,
    pub issue_key: String,
    pub trial_engineer_email: Option<String>,
    pub assignee_email: Option<String>,
    pub last_updated: Option<NaiveDateTime>,
    pub epic_link: Option<String>,
    pub requestor_email: Option<String>,
    pub subtask_ids: Vec<String>,
    pub subtask_keys: Vec<String>,
}

impl SyncRecord for IssueRecord {
    fn schema() -> &'static TableSchema {
        &ISSUES
    }

    fn lookup_id(&self) -> &str {
        &self.issue_id
    }

    fn natural_key(&self) -> &str {
        &self.issue_key
    }
}

/// Tracked fields of an uploaded-data subtask ticket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubtaskRecord {
    pub parent_issue: Option<String>,
    pub subtask_key: String,
    pub file_uuid: Option<String>,
    pub trial_id: Option<String>,
    pub created: Option<NaiveDateTime>,
    pub updated: Option<NaiveDateTime>,
    pub last_viewed: Option<NaiveDateTime>,
    pub watch_count: i64,
    pub labels: Vec<String>,
    pub status_name: Option<String>,
    pub status_category: Option<String>,
    pub status_id: Option<String>,
    pub summary: Option<String>,
    pub creator_email: Option<String>,
    pub comments_count: i64,
    pub trial_engineer_email: Option<String>,
    pub assignee_email: Option<String>,
}

impl SyncRecord for SubtaskRecord {
    fn schema() -> &'static TableSchema {
        &SUB_TASKS
    }

    fn lookup_id(&self) -> &str {
        &self.subtask_key
    }

    fn natural_key(&self) -> &str {
        &self.subtask_key
    }
}

// ---------------------------------------------------------------------------
// Job input
// ---------------------------------------------------------------------------

/// Which ticket level a sync job targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketKind {
    #[default]
    Epic,
    Trial,
    Subtask,
}

impl std::fmt::Display for TicketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TicketKind::Epic => "epic",
            TicketKind::Trial => "trial",
            TicketKind::Subtask => "subtask",
        };
        f.write_str(s)
    }
}
