//! Field predicates composed into tracker query strings.

use ts_core::config::TrackerConfig;

/// Accepted values of one filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// Inactive: contributes nothing to the query.
    Null,
    Single(String),
    /// `None` entries match an empty field.
    List(Vec<Option<String>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchFilter {
    pub field: String,
    pub value: FilterValue,
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

impl SearchFilter {
    pub fn new(field: impl Into<String>, value: FilterValue) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, FilterValue::Single(value.into()))
    }

    pub fn any_of<I, S>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        Self::new(
            field,
            FilterValue::List(values.into_iter().map(|v| v.map(Into::into)).collect()),
        )
    }

    pub fn inactive(field: impl Into<String>) -> Self {
        Self::new(field, FilterValue::Null)
    }

    /// Query clause for this filter, or `None` when it is inactive.
    pub fn to_jql(&self) -> Option<String> {
        let field = quote(&self.field);
        match &self.value {
            FilterValue::Null => None,
            FilterValue::Single(v) => Some(format!("{field}={}", quote(v))),
            FilterValue::List(values) if values.is_empty() => None,
            FilterValue::List(values) => {
                let present: Vec<String> = values.iter().flatten().map(|v| quote(v)).collect();
                if present.is_empty() {
                    return Some(format!("{field} is EMPTY"));
                }
                let clause = format!("{field} in ({})", present.join(", "));
                if values.iter().any(Option::is_none) {
                    Some(format!("({clause} OR {field} is EMPTY)"))
                } else {
                    Some(clause)
                }
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.to_jql().is_some()
    }
}

/// Join the active filters with ` AND `, in order.
pub fn compose(filters: &[SearchFilter]) -> String {
    filters
        .iter()
        .filter_map(SearchFilter::to_jql)
        .collect::<Vec<_>>()
        .join(" AND ")
}

// ---------------------------------------------------------------------------
// Canned queries
// ---------------------------------------------------------------------------

/// Unresolved epics of the configured project.
pub fn epic_jql(tracker: &TrackerConfig) -> String {
    compose(&[
        SearchFilter::eq("project", tracker.project_id.to_string()),
        SearchFilter::eq("issuetype", &tracker.epic_issue_type),
        SearchFilter::eq("resolution", &tracker.unresolved),
    ])
}

/// Unresolved issues of the project that are neither epics nor subtasks.
pub fn issue_jql(tracker: &TrackerConfig) -> String {
    let base = compose(&[
        SearchFilter::eq("project", tracker.project_id.to_string()),
        SearchFilter::eq("resolution", &tracker.unresolved),
    ]);
    format!(
        "{base} AND issuetype != {} AND issuetype != {}",
        quote(&tracker.subtask_issue_type),
        quote(&tracker.epic_issue_type)
    )
}

pub fn issues_in_epic_jql(epic_key: &str) -> String {
    compose(&[SearchFilter::eq("Epic Link", epic_key)])
}

pub fn subtasks_jql(issue_key: &str) -> String {
    compose(&[SearchFilter::eq("parent", issue_key)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canned_queries() {
        let tracker = TrackerConfig::default();
        assert_eq!(
            epic_jql(&tracker),
            r#""project"="19413" AND "issuetype"="Epic" AND "resolution"="Unresolved""#
        );
        assert_eq!(
            issue_jql(&tracker),
            r#""project"="19413" AND "resolution"="Unresolved" AND issuetype != "Sub-task" AND issuetype != "Epic""#
        );
        assert_eq!(issues_in_epic_jql("TM-1"), r#""Epic Link"="TM-1""#);
        assert_eq!(subtasks_jql("TM-2"), r#""parent"="TM-2""#);
    }

    #[test]
    fn quotes_are_escaped() {
        let f = SearchFilter::eq("summary", r#"say "hi""#);
        assert_eq!(f.to_jql().as_deref(), Some(r#""summary"="say \"hi\"""#));
    }
}
