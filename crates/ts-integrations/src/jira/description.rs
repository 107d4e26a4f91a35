//! Pipe-delimited key/value tables embedded in ticket descriptions.
//!
//! A header row starts with `||` and separates names with runs of two or
//! more pipes; a data row starts with a single `|` and separates cells with
//! runs of one or more pipes. Header names and data cells are collected
//! across all rows, so the Nth header overall names the Nth cell overall.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use ts_core::types::Row;

static HEADER_DELIMITER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\|{2,}").expect("header delimiter regex is valid"));
static CELL_DELIMITER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\|+").expect("cell delimiter regex is valid"));

/// Split on `delimiter` and trim. The empty edge tokens produced by
/// leading/trailing delimiters are dropped; interior blanks are kept so
/// cell positions stay aligned.
fn split_pipes(line: &str, delimiter: &Regex) -> Vec<String> {
    let mut tokens: Vec<String> = delimiter
        .split(line)
        .map(|t| t.trim().to_string())
        .collect();
    if tokens.first().is_some_and(|t| t.is_empty()) {
        tokens.remove(0);
    }
    if tokens.last().is_some_and(|t| t.is_empty()) {
        tokens.pop();
    }
    tokens
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescriptionTable {
    headers: Vec<String>,
    cells: Vec<String>,
}

impl DescriptionTable {
    pub fn parse(description: Option<&str>) -> Self {
        let mut table = Self::default();
        let Some(text) = description else {
            return table;
        };
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if line.starts_with("||") {
                table.headers.extend(split_pipes(line, &HEADER_DELIMITER));
            } else if line.starts_with('|') {
                table.cells.extend(split_pipes(line, &CELL_DELIMITER));
            }
        }
        table
    }

    /// Cell under `name`. `None` when the header is absent, the data runs
    /// short, or the cell is blank.
    pub fn get(&self, name: &str) -> Option<&str> {
        let index = self.headers.iter().position(|h| h == name)?;
        self.cells
            .get(index)
            .map(String::as_str)
            .filter(|c| !c.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

const COLUMNS_PER_ROW: usize = 3;

fn cell_text(value: Option<&Value>) -> String {
    let text = match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    let text = text.replace('|', "/").replace(['\r', '\n'], " ");
    if text.trim().is_empty() {
        " ".to_string()
    } else {
        text
    }
}

/// Render `row` as a description table over `columns` and merge it into
/// `existing`.
///
/// Text before a previously rendered table is kept; the old table and
/// everything after it are replaced. `prelude` lines (`Farm Name: ...`) are
/// prepended.
pub fn render_description(
    existing: Option<&str>,
    row: &Row,
    columns: &[&str],
    prelude: &[String],
) -> String {
    let mut description = String::new();
    for line in prelude {
        description.push_str(line);
        description.push('\n');
    }
    description.push_str(existing.unwrap_or_default());

    if columns.is_empty() || row.is_empty() {
        return description;
    }

    let mut table = String::new();
    for chunk in columns.chunks(COLUMNS_PER_ROW) {
        let values: Vec<String> = chunk.iter().map(|c| cell_text(row.get(c))).collect();
        table.push_str(&format!("||{}||\n", chunk.join("||")));
        table.push_str(&format!("|{}|\n", values.join("|")));
    }

    let first_header = format!(
        "||{}||",
        columns[..columns.len().min(COLUMNS_PER_ROW)].join("||")
    );
    if let Some(start) = description.find(&first_header) {
        description.truncate(start);
    }
    let kept = description.trim_end_matches(['\r', '\n']).len();
    description.truncate(kept);
    description.push('\n');
    description.push_str(&table);
    description
}
