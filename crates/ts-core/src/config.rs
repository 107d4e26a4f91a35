use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::CustomField;

/// Top-level configuration loaded from `~/.trial-sync/config.toml`.
///
/// **Security**: This struct NEVER stores the tracker token. Config only
/// names the env var to read; see [`CredentialProvider`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl Config {
    /// Load config from `~/.trial-sync/config.toml`, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tracker.validate()?;
        self.workflow.validate()?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".trial-sync")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `"pretty"` or `"json"`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}

/// Tracker connection and project scoping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Env var name holding the bearer token (default: `JIRA_TOKEN`).
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_project_id")]
    pub project_id: u64,
    /// Saved filter whose query replaces the built epic query when set.
    #[serde(default)]
    pub active_filter_id: Option<u64>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_epic_issue_type")]
    pub epic_issue_type: String,
    #[serde(default = "default_trial_issue_type")]
    pub trial_issue_type: String,
    #[serde(default = "default_subtask_issue_type")]
    pub subtask_issue_type: String,
    #[serde(default = "default_unresolved")]
    pub unresolved: String,
    /// Per-instance overrides of custom field ids, e.g. `trial_id = "13001"`.
    #[serde(default)]
    pub custom_fields: BTreeMap<CustomField, String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            token_env: default_token_env(),
            project_id: default_project_id(),
            active_filter_id: None,
            page_size: default_page_size(),
            epic_issue_type: default_epic_issue_type(),
            trial_issue_type: default_trial_issue_type(),
            subtask_issue_type: default_subtask_issue_type(),
            unresolved: default_unresolved(),
            custom_fields: BTreeMap::new(),
        }
    }
}

impl TrackerConfig {
    /// Payload key for a custom field: all-digit ids become
    /// `customfield_<id>`, anything else (`duedate`) is used as-is.
    pub fn field_key(&self, field: CustomField) -> String {
        let id = self
            .custom_fields
            .get(&field)
            .map(String::as_str)
            .unwrap_or_else(|| field.default_id());
        if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
            format!("customfield_{id}")
        } else {
            id.to_string()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "tracker.server_url must not be empty".into(),
            ));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Validation(
                "tracker.page_size must be greater than 0".into(),
            ));
        }
        if let Some((field, _)) = self.custom_fields.iter().find(|(_, id)| id.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "tracker.custom_fields.{} must not be empty",
                serde_json::to_string(field)
                    .unwrap_or_default()
                    .trim_matches('"')
            )));
        }
        Ok(())
    }
}

fn default_server_url() -> String {
    "https://jira.example.com".into()
}
fn default_token_env() -> String {
    "JIRA_TOKEN".into()
}
fn default_project_id() -> u64 {
    19413
}
fn default_page_size() -> u32 {
    50
}
fn default_epic_issue_type() -> String {
    "Epic".into()
}
fn default_trial_issue_type() -> String {
    "Trial".into()
}
fn default_subtask_issue_type() -> String {
    "Sub-task".into()
}
fn default_unresolved() -> String {
    "Unresolved".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
    /// Create the upstream tables when they are missing (local runs, demos).
    #[serde(default)]
    pub bootstrap_source_tables: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            bootstrap_source_tables: false,
        }
    }
}

impl DatabaseConfig {
    /// Database path with a leading `~` expanded to the home directory.
    pub fn resolved_path(&self) -> PathBuf {
        match self.path.strip_prefix("~/") {
            Some(rest) => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(rest),
            None => PathBuf::from(&self.path),
        }
    }
}

fn default_database_path() -> String {
    "~/.trial-sync/trial-sync.db".into()
}

// ---------------------------------------------------------------------------
// Workflow graphs
// ---------------------------------------------------------------------------

/// A named status and its tracker id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub name: String,
    pub id: u64,
}

/// One outgoing workflow edge: from a status id, the transition that leads
/// to the status named `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeEntry {
    pub from: u64,
    pub to: String,
    pub transition: u64,
}

/// One workflow graph. Edge order is significant: the first edge leaving a
/// status is the default path when no edge leads straight to the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WorkflowGraphConfig {
    #[serde(default)]
    pub statuses: Vec<StatusEntry>,
    #[serde(default)]
    pub edges: Vec<EdgeEntry>,
}

impl WorkflowGraphConfig {
    pub fn status_id(&self, name: &str) -> Option<u64> {
        self.statuses.iter().find(|s| s.name == name).map(|s| s.id)
    }

    fn validate(&self, label: &str) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for status in &self.statuses {
            if !names.insert(status.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "workflow.{label}: duplicate status name '{}'",
                    status.name
                )));
            }
        }
        let ids: HashSet<u64> = self.statuses.iter().map(|s| s.id).collect();
        for edge in &self.edges {
            if !ids.contains(&edge.from) {
                return Err(ConfigError::Validation(format!(
                    "workflow.{label}: edge '{}' leaves unknown status id {}",
                    edge.to, edge.from
                )));
            }
        }
        Ok(())
    }
}

fn status(name: &str, id: u64) -> StatusEntry {
    StatusEntry {
        name: name.into(),
        id,
    }
}

fn edge(from: u64, to: &str, transition: u64) -> EdgeEntry {
    EdgeEntry {
        from,
        to: to.into(),
        transition,
    }
}

/// Production workflow for trial issues.
pub fn default_standard_graph() -> WorkflowGraphConfig {
    WorkflowGraphConfig {
        statuses: vec![
            status("New Request", 1),
            status("In Review", 10549),
            status("In Planning", 11920),
            status("In Execution", 11921),
            status("Waiting for Data", 11922),
            status("Waiting for Harvest", 11923),
            status("Data Control", 11924),
            status("Analysis", 10000),
            status("Presenting", 11925),
            status("Done", 10322),
            status("Canceled", 10526),
        ],
        edges: vec![
            edge(1, "In Review", 211),
            edge(10549, "In Planning", 271),
            edge(11920, "In Execution", 281),
            edge(11921, "Waiting for Data", 351),
            edge(11921, "Waiting for Harvest", 291),
            edge(11921, "Data Control", 371),
            edge(11922, "Data Control", 311),
            edge(11922, "Waiting for Harvest", 381),
            edge(11923, "Data Control", 361),
            edge(11923, "Waiting for Data", 301),
            edge(11924, "Analysis", 321),
            edge(10000, "Ready to be Presented", 331),
            edge(10000, "Back to Data Control", 521),
            edge(11925, "To be Done", 341),
            edge(11925, "Back to Analysis", 531),
        ],
    }
}

/// Production workflow for uploaded-data subtasks.
pub fn default_subtask_graph() -> WorkflowGraphConfig {
    WorkflowGraphConfig {
        statuses: vec![
            status("New Request", 1),
            status("In Progress", 3),
            status("Waiting", 10820),
        ],
        edges: vec![
            edge(1, "In Progress", 61),
            edge(3, "Waiting", 21),
            edge(10820, "Done", 51),
        ],
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Status every newly created trial issue is walked to.
    #[serde(default = "default_issue_initial_status")]
    pub issue_initial_status: String,
    /// Status every newly created subtask is walked to.
    #[serde(default = "default_subtask_initial_status")]
    pub subtask_initial_status: String,
    /// Upper bound on transitions per walk.
    #[serde(default = "default_max_transition_steps")]
    pub max_transition_steps: u32,
    #[serde(default = "default_standard_graph")]
    pub standard: WorkflowGraphConfig,
    #[serde(default = "default_subtask_graph")]
    pub subtask: WorkflowGraphConfig,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            issue_initial_status: default_issue_initial_status(),
            subtask_initial_status: default_subtask_initial_status(),
            max_transition_steps: default_max_transition_steps(),
            standard: default_standard_graph(),
            subtask: default_subtask_graph(),
        }
    }
}

impl WorkflowConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_transition_steps == 0 {
            return Err(ConfigError::Validation(
                "workflow.max_transition_steps must be greater than 0".into(),
            ));
        }
        self.standard.validate("standard")?;
        self.subtask.validate("subtask")?;
        if self.standard.status_id(&self.issue_initial_status).is_none() {
            return Err(ConfigError::Validation(format!(
                "workflow.issue_initial_status '{}' is not a standard status",
                self.issue_initial_status
            )));
        }
        if self.subtask.status_id(&self.subtask_initial_status).is_none() {
            return Err(ConfigError::Validation(format!(
                "workflow.subtask_initial_status '{}' is not a subtask status",
                self.subtask_initial_status
            )));
        }
        Ok(())
    }
}

fn default_issue_initial_status() -> String {
    "Waiting for Data".into()
}
fn default_subtask_initial_status() -> String {
    "Waiting".into()
}
fn default_max_transition_steps() -> u32 {
    25
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Protocol codes that mark placeholder epics (`XXX`, `XQA`).
    #[serde(default = "default_reserved_protocol_codes")]
    pub reserved_protocol_codes: Vec<String>,
    #[serde(default = "default_map_attachment_filename")]
    pub map_attachment_filename: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reserved_protocol_codes: default_reserved_protocol_codes(),
            map_attachment_filename: default_map_attachment_filename(),
        }
    }
}

fn default_reserved_protocol_codes() -> Vec<String> {
    vec!["XXX".into(), "XQA".into()]
}
fn default_map_attachment_filename() -> String {
    "management_zones_map.png".into()
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Resolves secrets from the environment at runtime.
pub struct CredentialProvider;

impl CredentialProvider {
    /// Read the tracker token from the env var named in `tracker.token_env`.
    /// Returns `None` when the var is unset or blank.
    pub fn tracker_token(tracker: &TrackerConfig) -> Option<String> {
        std::env::var(&tracker.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_key_prefixes_numeric_ids() {
        let mut tracker = TrackerConfig::default();
        assert_eq!(tracker.field_key(CustomField::TrialId), "customfield_12506");
        assert_eq!(tracker.field_key(CustomField::DueDate), "duedate");

        tracker
            .custom_fields
            .insert(CustomField::TrialId, "13001".into());
        assert_eq!(tracker.field_key(CustomField::TrialId), "customfield_13001");
    }

    #[test]
    fn default_graphs_resolve_initial_statuses() {
        let workflow = WorkflowConfig::default();
        assert_eq!(workflow.standard.status_id("Waiting for Data"), Some(11922));
        assert_eq!(workflow.subtask.status_id("Waiting"), Some(10820));
        assert!(workflow.validate().is_ok());
    }
}
