//! Jira Server integration: raw ticket types, the [`Tracker`] seam, a REST
//! client, an in-memory double, and the reconciliation engine built on them.

pub mod client;
pub mod description;
pub mod entity;
pub mod fields;
pub mod filter;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod sync;
pub mod transition;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use client::JiraClient;
#[cfg(any(test, feature = "test-util"))]
pub use memory::InMemoryTracker;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur when talking to the tracker.
#[derive(Debug, Error)]
pub enum JiraError {
    /// The tracker answered with a non-success status. The string carries
    /// the status code, reason and response body.
    #[error("Jira API error: {0}")]
    Api(String),

    /// The requested ticket or resource does not exist (HTTP 404).
    #[error("not found: {0}")]
    NotFound(String),

    /// No bearer token was configured. Set the env var named by
    /// `tracker.token_env`.
    #[error("missing Jira token")]
    MissingToken,

    /// Failed to serialize a request body or parse a response.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Transport-level failure (connection, DNS, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for tracker operations.
pub type Result<T> = std::result::Result<T, JiraError>;

// ---------------------------------------------------------------------------
// Raw ticket types
// ---------------------------------------------------------------------------

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A ticket as returned by the REST API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub fields: TicketFields,
}

/// Standard fields the engine reads, plus every other field (custom fields
/// included) in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketFields {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub updated: Option<String>,
    #[serde(default)]
    pub last_viewed: Option<String>,
    #[serde(default)]
    pub duedate: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub components: Vec<NamedRef>,
    #[serde(default)]
    pub status: Option<TicketStatus>,
    #[serde(default)]
    pub issuetype: Option<NamedRef>,
    #[serde(default)]
    pub project: Option<ProjectRef>,
    #[serde(default)]
    pub resolution: Option<NamedRef>,
    #[serde(default)]
    pub comment: Option<CommentSummary>,
    #[serde(default)]
    pub watches: Option<Watches>,
    #[serde(default)]
    pub creator: Option<TrackerPerson>,
    #[serde(default)]
    pub assignee: Option<TrackerPerson>,
    #[serde(default)]
    pub parent: Option<TicketRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub subtasks: Vec<TicketRef>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedRef {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectRef {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketStatus {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status_category: Option<NamedRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommentSummary {
    #[serde(default)]
    pub total: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Watches {
    #[serde(default)]
    pub watch_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerPerson {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TicketRef {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
}

impl Ticket {
    /// Live status id, parsed from the tracker's string form.
    pub fn status_id(&self) -> Option<u64> {
        self.fields
            .status
            .as_ref()
            .and_then(|s| s.id.as_deref())
            .and_then(|id| id.trim().parse().ok())
    }

    pub fn status_name(&self) -> Option<&str> {
        self.fields.status.as_ref().and_then(|s| s.name.as_deref())
    }

    pub fn issue_type(&self) -> Option<&str> {
        self.fields.issuetype.as_ref().and_then(|t| t.name.as_deref())
    }
}

/// A tracker account as returned by user search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerUser {
    /// Login name; used to set assignee and user-picker fields.
    pub name: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Tracker seam
// ---------------------------------------------------------------------------

/// Operations the reconciliation engine needs from the ticket tracker.
#[async_trait::async_trait]
pub trait Tracker: Send + Sync {
    /// One page of tickets matching `jql`.
    async fn search(&self, jql: &str, start_at: u32, max_results: u32) -> Result<Vec<Ticket>>;

    /// A single ticket. Missing tickets yield [`JiraError::NotFound`].
    async fn get(&self, key: &str) -> Result<Ticket>;

    /// Create a ticket from a `fields` object and return its key.
    async fn create(&self, fields: Map<String, Value>) -> Result<String>;

    async fn update(&self, key: &str, fields: Map<String, Value>) -> Result<()>;

    async fn transition(&self, key: &str, transition_id: u64) -> Result<()>;

    async fn search_user(&self, email: &str) -> Result<Option<TrackerUser>>;

    async fn add_attachment(&self, key: &str, bytes: Vec<u8>, filename: &str) -> Result<()>;

    async fn add_to_epic(&self, epic_key: &str, issue_keys: &[String]) -> Result<()>;

    /// Query text of a saved filter.
    async fn filter_jql(&self, filter_id: u64) -> Result<String>;
}

/// Fetch every ticket matching `jql`, page by page, until a short page.
pub async fn search_all(tracker: &dyn Tracker, jql: &str, page_size: u32) -> Result<Vec<Ticket>> {
    let page_size = page_size.max(1);
    let mut start_at = 0;
    let mut all = Vec::new();
    loop {
        let page = tracker.search(jql, start_at, page_size).await?;
        let len = page.len() as u32;
        all.extend(page);
        if len < page_size {
            break;
        }
        start_at += page_size;
    }
    tracing::debug!(jql, count = all.len(), "search complete");
    Ok(all)
}
