//! In-memory [`Tracker`] for tests. Built with the `test-util` feature.
//!
//! Tickets live in a mutex-guarded list in creation order. Searches
//! understand the small query subset the engine emits; transitions follow
//! the configured workflow graphs; every write advances a logical clock so
//! `updated` timestamps move the way a real tracker's do.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde_json::{json, Map, Value};
use ts_core::config::Config;
use ts_core::types::CustomField;

use super::fields::FieldMap;
use super::transition::WorkflowGraph;
use super::{
    JiraError, ProjectRef, Result, Ticket, TicketFields, TicketRef, TicketStatus, Tracker,
    TrackerUser,
};

const PROJECT_KEY: &str = "TM";

/// Snapshot of the calls an [`InMemoryTracker`] has served.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallLog {
    pub searches: Vec<String>,
    pub gets: Vec<String>,
    /// Keys of created tickets.
    pub creates: Vec<String>,
    pub updates: Vec<String>,
    pub transitions: Vec<(String, u64)>,
    pub epic_links: Vec<(String, Vec<String>)>,
    /// `(key, filename)` per attachment.
    pub attachments: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct State {
    tickets: Vec<Ticket>,
    next_id: u64,
    clock: i64,
    users: Vec<TrackerUser>,
    filters: HashMap<u64, String>,
    create_status: HashMap<String, (String, u64)>,
    extra_statuses: HashMap<String, u64>,
    failing: HashSet<String>,
    fail_next: HashMap<String, u32>,
    calls: CallLog,
}

impl State {
    fn tick(&mut self) -> String {
        self.clock += 1;
        let epoch = NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or(NaiveDateTime::MIN);
        (epoch + Duration::seconds(self.clock))
            .format("%Y-%m-%dT%H:%M:%S%.3f+0000")
            .to_string()
    }

    fn ticket_mut(&mut self, key: &str) -> Result<&mut Ticket> {
        self.tickets
            .iter_mut()
            .find(|t| t.key == key)
            .ok_or_else(|| JiraError::NotFound(key.to_string()))
    }

    fn check_failing(&self, key: &str) -> Result<()> {
        if self.failing.contains(key) {
            return Err(JiraError::Api(format!("500 Internal Server Error: {key}")));
        }
        Ok(())
    }

    fn take_failure(&mut self, op: &str) -> Result<()> {
        match self.fail_next.get_mut(op) {
            Some(n) if *n > 0 => {
                *n -= 1;
                Err(JiraError::Api(format!("503 Service Unavailable: {op}")))
            }
            _ => Ok(()),
        }
    }

    /// Expand `{"name": ...}` user references the way the tracker echoes
    /// them back: with email and display name.
    fn expand_user(&self, value: Value) -> Value {
        let Value::Object(obj) = &value else {
            return value;
        };
        let Some(name) = obj.get("name").and_then(Value::as_str) else {
            return value;
        };
        if obj.len() != 1 {
            return value;
        }
        match self.users.iter().find(|u| u.name == name) {
            Some(user) => json!({
                "name": user.name,
                "emailAddress": user.email_address,
                "displayName": user.display_name,
            }),
            None => value,
        }
    }
}

pub struct InMemoryTracker {
    fields: FieldMap,
    project_id: String,
    unresolved: String,
    subtask_type: String,
    standard: WorkflowGraph,
    subtask: WorkflowGraph,
    first_standard: Option<(String, u64)>,
    first_subtask: Option<(String, u64)>,
    state: Mutex<State>,
}

impl InMemoryTracker {
    pub fn from_config(config: &Config) -> Self {
        let first = |statuses: &[ts_core::config::StatusEntry]| {
            statuses.first().map(|s| (s.name.clone(), s.id))
        };
        Self {
            fields: FieldMap::from_config(&config.tracker),
            project_id: config.tracker.project_id.to_string(),
            unresolved: config.tracker.unresolved.clone(),
            subtask_type: config.tracker.subtask_issue_type.clone(),
            standard: WorkflowGraph::from_config(&config.workflow.standard),
            subtask: WorkflowGraph::from_config(&config.workflow.subtask),
            first_standard: first(&config.workflow.standard.statuses),
            first_subtask: first(&config.workflow.subtask.statuses),
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -- builders -----------------------------------------------------------

    /// Add an existing ticket. Missing project and timestamps are filled in.
    pub fn seed(self, mut ticket: Ticket) -> Self {
        {
            let mut state = self.lock();
            if ticket.fields.project.is_none() {
                ticket.fields.project = Some(ProjectRef {
                    id: Some(self.project_id.clone()),
                    key: Some(PROJECT_KEY.into()),
                });
            }
            if ticket.fields.created.is_none() {
                ticket.fields.created = Some(state.tick());
            }
            if ticket.fields.updated.is_none() {
                ticket.fields.updated = ticket.fields.created.clone();
            }
            state.next_id += 1;
            state.tickets.push(ticket);
        }
        self
    }

    pub fn with_user(self, user: TrackerUser) -> Self {
        self.lock().users.push(user);
        self
    }

    pub fn with_filter(self, filter_id: u64, jql: &str) -> Self {
        self.lock().filters.insert(filter_id, jql.to_string());
        self
    }

    /// Status newly created tickets of `issue_type` start in. Defaults to
    /// the first status of the ticket's graph.
    pub fn with_create_status(self, issue_type: &str, name: &str, id: u64) -> Self {
        self.lock()
            .create_status
            .insert(issue_type.to_string(), (name.to_string(), id));
        self
    }

    /// Status id for an edge target that is not in the graph's status table.
    pub fn with_transition_target(self, name: &str, id: u64) -> Self {
        self.lock().extra_statuses.insert(name.to_string(), id);
        self
    }

    /// Make every call touching `key` fail with a server error.
    pub fn with_failing_key(self, key: &str) -> Self {
        self.lock().failing.insert(key.to_string());
        self
    }

    /// Fail the next call of `op` (`"transition"`, `"add_to_epic"` or
    /// `"add_attachment"`) once. The call is still logged.
    pub fn fail_next(&self, op: &str) {
        *self.lock().fail_next.entry(op.to_string()).or_default() += 1;
    }

    pub fn calls(&self) -> CallLog {
        self.lock().calls.clone()
    }

    pub fn tickets(&self) -> Vec<Ticket> {
        self.lock().tickets.clone()
    }

    fn graph_for(&self, issue_type: Option<&str>) -> &WorkflowGraph {
        if issue_type == Some(self.subtask_type.as_str()) {
            &self.subtask
        } else {
            &self.standard
        }
    }

    // -- query matching -----------------------------------------------------

    fn field_values(&self, ticket: &Ticket, field: &str) -> Option<Vec<String>> {
        let f = &ticket.fields;
        let one = |v: Option<&String>| v.cloned().into_iter().collect::<Vec<_>>();
        let values = match field.to_ascii_lowercase().as_str() {
            "project" => f
                .project
                .iter()
                .flat_map(|p| [p.id.clone(), p.key.clone()])
                .flatten()
                .collect(),
            "issuetype" => one(f.issuetype.as_ref().and_then(|t| t.name.as_ref())),
            "resolution" => match f.resolution.as_ref().and_then(|r| r.name.clone()) {
                Some(name) => vec![name],
                None => vec![self.unresolved.clone()],
            },
            "parent" => one(f.parent.as_ref().and_then(|p| p.key.as_ref())),
            "epic link" => f
                .extra
                .get(self.fields.key(CustomField::EpicLink))
                .and_then(Value::as_str)
                .map(|s| vec![s.to_string()])
                .unwrap_or_default(),
            "summary" => one(f.summary.as_ref()),
            "status" => one(f.status.as_ref().and_then(|s| s.name.as_ref())),
            "key" => vec![ticket.key.clone()],
            "labels" => f.labels.clone(),
            _ => return None,
        };
        Some(values)
    }

    fn matches(&self, ticket: &Ticket, clauses: &[Clause]) -> Result<bool> {
        for clause in clauses {
            let field = clause.field();
            let values = self
                .field_values(ticket, field)
                .ok_or_else(|| JiraError::Api(format!("400 Bad Request: unknown field '{field}'")))?;
            let ok = match clause {
                Clause::Eq(_, v) => values.contains(v),
                Clause::Ne(_, v) => !values.contains(v),
                Clause::In(_, list) => values.iter().any(|v| list.contains(v)),
                Clause::Empty(_) => values.is_empty(),
            };
            if !ok {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn initial_status(&self, issue_type: Option<&str>, state: &State) -> Option<(String, u64)> {
        if let Some(status) = issue_type.and_then(|t| state.create_status.get(t)) {
            return Some(status.clone());
        }
        if issue_type == Some(self.subtask_type.as_str()) {
            self.first_subtask.clone()
        } else {
            self.first_standard.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Query subset
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum Clause {
    Eq(String, String),
    Ne(String, String),
    In(String, Vec<String>),
    Empty(String),
}

impl Clause {
    fn field(&self) -> &str {
        match self {
            Clause::Eq(f, _) | Clause::Ne(f, _) | Clause::In(f, _) | Clause::Empty(f) => f,
        }
    }
}

fn take_quoted(s: &str) -> Option<(String, &str)> {
    let mut chars = s.char_indices();
    if !matches!(chars.next(), Some((_, '"'))) {
        return None;
    }
    let mut out = String::new();
    let mut escaped = false;
    for (i, c) in chars {
        if escaped {
            out.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => return Some((out, &s[i + 1..])),
            _ => out.push(c),
        }
    }
    None
}

fn take_operand(s: &str) -> Option<(String, &str)> {
    if s.starts_with('"') {
        return take_quoted(s);
    }
    let end = s.find(|c: char| c.is_whitespace() || c == '=' || c == '!')?;
    (end > 0).then(|| (s[..end].to_string(), &s[end..]))
}

fn parse_clause(text: &str) -> Option<Clause> {
    let (field, rest) = take_operand(text.trim())?;
    let rest = rest.trim_start();
    if let Some(rest) = rest.strip_prefix("!=") {
        let (value, tail) = take_quoted(rest.trim_start())?;
        return tail.trim().is_empty().then_some(Clause::Ne(field, value));
    }
    if let Some(rest) = rest.strip_prefix('=') {
        let (value, tail) = take_quoted(rest.trim_start())?;
        return tail.trim().is_empty().then_some(Clause::Eq(field, value));
    }
    if rest.trim_end() == "is EMPTY" {
        return Some(Clause::Empty(field));
    }
    let mut list = rest.strip_prefix("in (")?.trim_end().strip_suffix(')')?;
    let mut values = Vec::new();
    while !list.trim().is_empty() {
        let (value, tail) = take_quoted(list.trim_start())?;
        values.push(value);
        list = tail.trim_start().strip_prefix(',').unwrap_or(tail);
    }
    Some(Clause::In(field, values))
}

fn parse_query(jql: &str) -> Result<Vec<Clause>> {
    if jql.trim().is_empty() {
        return Ok(Vec::new());
    }
    jql.split(" AND ")
        .map(|part| {
            parse_clause(part)
                .ok_or_else(|| JiraError::Api(format!("400 Bad Request: unsupported clause '{part}'")))
        })
        .collect()
}

fn merge_fields(fields: &TicketFields, updates: Map<String, Value>) -> Result<TicketFields> {
    let mut current = match serde_json::to_value(fields)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    current.extend(updates);
    Ok(serde_json::from_value(Value::Object(current))?)
}

#[async_trait::async_trait]
impl Tracker for InMemoryTracker {
    async fn search(&self, jql: &str, start_at: u32, max_results: u32) -> Result<Vec<Ticket>> {
        let clauses = parse_query(jql)?;
        let mut state = self.lock();
        state.calls.searches.push(jql.to_string());
        let mut matched = Vec::new();
        for ticket in &state.tickets {
            if self.matches(ticket, &clauses)? {
                matched.push(ticket.clone());
            }
        }
        Ok(matched
            .into_iter()
            .skip(start_at as usize)
            .take(max_results as usize)
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Ticket> {
        let mut state = self.lock();
        state.calls.gets.push(key.to_string());
        state.check_failing(key)?;
        Ok(state.ticket_mut(key)?.clone())
    }

    async fn create(&self, fields: Map<String, Value>) -> Result<String> {
        let mut state = self.lock();
        let fields: Map<String, Value> = fields
            .into_iter()
            .map(|(k, v)| {
                let v = state.expand_user(v);
                (k, v)
            })
            .collect();
        let mut parsed = merge_fields(&TicketFields::default(), fields)?;

        state.next_id += 1;
        let key = format!("{PROJECT_KEY}-{}", state.next_id);
        let id = (10_000 + state.next_id).to_string();

        if let Some(project) = parsed.project.as_mut() {
            project.key.get_or_insert_with(|| PROJECT_KEY.to_string());
        }
        if let Some((name, status_id)) = self.initial_status(parsed.issuetype.as_ref().and_then(|t| t.name.as_deref()), &state) {
            parsed.status = Some(TicketStatus {
                id: Some(status_id.to_string()),
                name: Some(name),
                status_category: None,
            });
        }
        let now = state.tick();
        parsed.created = Some(now.clone());
        parsed.updated = Some(now);

        if let Some(parent_key) = parsed.parent.as_ref().and_then(|p| p.key.clone()) {
            let parent = state.ticket_mut(&parent_key)?;
            parent.fields.subtasks.push(TicketRef {
                id: Some(id.clone()),
                key: Some(key.clone()),
            });
            let parent_id = parent.id.clone();
            if let Some(p) = parsed.parent.as_mut() {
                p.id = Some(parent_id);
            }
        }

        state.tickets.push(Ticket {
            id,
            key: key.clone(),
            fields: parsed,
        });
        state.calls.creates.push(key.clone());
        Ok(key)
    }

    async fn update(&self, key: &str, fields: Map<String, Value>) -> Result<()> {
        let mut state = self.lock();
        state.calls.updates.push(key.to_string());
        state.check_failing(key)?;
        let fields: Map<String, Value> = fields
            .into_iter()
            .map(|(k, v)| {
                let v = state.expand_user(v);
                (k, v)
            })
            .collect();
        let now = state.tick();
        let ticket = state.ticket_mut(key)?;
        ticket.fields = merge_fields(&ticket.fields, fields)?;
        ticket.fields.updated = Some(now);
        Ok(())
    }

    async fn transition(&self, key: &str, transition_id: u64) -> Result<()> {
        let mut state = self.lock();
        state.calls.transitions.push((key.to_string(), transition_id));
        state.check_failing(key)?;
        state.take_failure("transition")?;
        let ticket = state.ticket_mut(key)?.clone();
        let graph = self.graph_for(ticket.issue_type());
        let current = ticket.status_id().unwrap_or_default();
        let edge = graph
            .edges_from(current)
            .iter()
            .find(|e| e.transition == transition_id)
            .ok_or_else(|| {
                JiraError::Api(format!(
                    "400 Bad Request: transition {transition_id} not valid from status {current}"
                ))
            })?;
        let target_id = graph
            .status_id(&edge.to)
            .or_else(|| state.extra_statuses.get(&edge.to).copied())
            .ok_or_else(|| JiraError::Api(format!("400 Bad Request: unknown status '{}'", edge.to)))?;
        let target_name = edge.to.clone();

        let now = state.tick();
        let ticket = state.ticket_mut(key)?;
        ticket.fields.status = Some(TicketStatus {
            id: Some(target_id.to_string()),
            name: Some(target_name),
            status_category: None,
        });
        ticket.fields.updated = Some(now);
        Ok(())
    }

    async fn search_user(&self, email: &str) -> Result<Option<TrackerUser>> {
        let state = self.lock();
        Ok(state
            .users
            .iter()
            .find(|u| u.email_address.as_deref() == Some(email) || u.name == email)
            .cloned())
    }

    async fn add_attachment(&self, key: &str, _bytes: Vec<u8>, filename: &str) -> Result<()> {
        let mut state = self.lock();
        state
            .calls
            .attachments
            .push((key.to_string(), filename.to_string()));
        state.check_failing(key)?;
        state.take_failure("add_attachment")?;
        state.ticket_mut(key)?;
        Ok(())
    }

    async fn add_to_epic(&self, epic_key: &str, issue_keys: &[String]) -> Result<()> {
        let mut state = self.lock();
        state
            .calls
            .epic_links
            .push((epic_key.to_string(), issue_keys.to_vec()));
        state.take_failure("add_to_epic")?;
        let link_key = self.fields.key(CustomField::EpicLink).to_string();
        for key in issue_keys {
            let now = state.tick();
            let ticket = state.ticket_mut(key)?;
            ticket
                .fields
                .extra
                .insert(link_key.clone(), Value::String(epic_key.to_string()));
            ticket.fields.updated = Some(now);
        }
        Ok(())
    }

    async fn filter_jql(&self, filter_id: u64) -> Result<String> {
        self.lock()
            .filters
            .get(&filter_id)
            .cloned()
            .ok_or_else(|| JiraError::NotFound(format!("filter {filter_id}")))
    }
}
