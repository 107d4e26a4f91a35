use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use ts_core::config::{CredentialProvider, TrackerConfig};

use super::{JiraError, Result, Ticket, Tracker, TrackerUser};

/// REST v2 client for Jira Server / Data Center with bearer-token auth.
#[derive(Debug, Clone)]
pub struct JiraClient {
    pub base_url: String,
    pub token: String,
    pub client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<Ticket>,
}

#[derive(Debug, Deserialize)]
struct CreatedTicket {
    key: String,
}

#[derive(Debug, Deserialize)]
struct SavedFilter {
    jql: String,
}

impl JiraClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        if token.is_empty() {
            return Err(JiraError::MissingToken);
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client: reqwest::Client::new(),
        })
    }

    /// Build a client from config, reading the token from the environment.
    pub fn from_config(tracker: &TrackerConfig) -> Result<Self> {
        let token = CredentialProvider::tracker_token(tracker).ok_or(JiraError::MissingToken)?;
        Self::new(&tracker.server_url, &token)
    }

    // -- request helpers ----------------------------------------------------

    async fn check(path: &str, resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(JiraError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(JiraError::Api(format!(
                "{} {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or(""),
                body
            )));
        }
        Ok(resp)
    }

    pub(crate) async fn api_get(&self, path: &str) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check(path, resp).await
    }

    async fn api_post(&self, path: &str, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        Self::check(path, resp).await
    }

    async fn api_put(&self, path: &str, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .put(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        Self::check(path, resp).await
    }
}

#[async_trait::async_trait]
impl Tracker for JiraClient {
    async fn search(&self, jql: &str, start_at: u32, max_results: u32) -> Result<Vec<Ticket>> {
        let path = format!(
            "/rest/api/2/search?jql={}&startAt={}&maxResults={}",
            urlencoding::encode(jql),
            start_at,
            max_results
        );
        let page: SearchResponse = self.api_get(&path).await?.json().await?;
        Ok(page.issues)
    }

    async fn get(&self, key: &str) -> Result<Ticket> {
        let path = format!("/rest/api/2/issue/{}", urlencoding::encode(key));
        Ok(self.api_get(&path).await?.json().await?)
    }

    async fn create(&self, fields: Map<String, Value>) -> Result<String> {
        let created: CreatedTicket = self
            .api_post("/rest/api/2/issue", &json!({ "fields": fields }))
            .await?
            .json()
            .await?;
        tracing::info!(key = %created.key, "ticket created");
        Ok(created.key)
    }

    async fn update(&self, key: &str, fields: Map<String, Value>) -> Result<()> {
        let path = format!("/rest/api/2/issue/{}", urlencoding::encode(key));
        self.api_put(&path, &json!({ "fields": fields })).await?;
        Ok(())
    }

    async fn transition(&self, key: &str, transition_id: u64) -> Result<()> {
        let path = format!("/rest/api/2/issue/{}/transitions", urlencoding::encode(key));
        let body = json!({ "transition": { "id": transition_id.to_string() } });
        self.api_post(&path, &body).await?;
        Ok(())
    }

    async fn search_user(&self, email: &str) -> Result<Option<TrackerUser>> {
        let path = format!(
            "/rest/api/2/user/search?username={}",
            urlencoding::encode(email)
        );
        let users: Vec<TrackerUser> = self.api_get(&path).await?.json().await?;
        Ok(users.into_iter().next())
    }

    async fn add_attachment(&self, key: &str, bytes: Vec<u8>, filename: &str) -> Result<()> {
        let url = format!(
            "{}/rest/api/2/issue/{}/attachments",
            self.base_url,
            urlencoding::encode(key)
        );
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("image/png")?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("X-Atlassian-Token", "no-check")
            .multipart(form)
            .send()
            .await?;
        Self::check(&url, resp).await?;
        Ok(())
    }

    async fn add_to_epic(&self, epic_key: &str, issue_keys: &[String]) -> Result<()> {
        let path = format!("/rest/agile/1.0/epic/{}/issue", urlencoding::encode(epic_key));
        self.api_post(&path, &json!({ "issues": issue_keys })).await?;
        Ok(())
    }

    async fn filter_jql(&self, filter_id: u64) -> Result<String> {
        let path = format!("/rest/api/2/filter/{filter_id}");
        let filter: SavedFilter = self.api_get(&path).await?.json().await?;
        Ok(filter.jql)
    }
}
