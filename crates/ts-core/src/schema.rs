//! Table layouts for the versioned sync tables and the upstream source tables.
//!
//! Column declarations keep the SQL types of the database of record
//! (`VARCHAR(255)`, `NUMERIC(10, 2)`, `TEXT[]`, ...). The change detector
//! derives its comparison rules from them, and the store maps them onto
//! SQLite affinities when it creates tables.

// ---------------------------------------------------------------------------
// Column types
// ---------------------------------------------------------------------------

/// Comparison class of a column, derived from its SQL declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Numeric,
    Timestamp,
    Date,
    TextList,
}

impl ColumnType {
    pub fn from_sql(decl: &str) -> Self {
        let decl = decl.trim().to_ascii_uppercase();
        if decl.ends_with("[]") {
            ColumnType::TextList
        } else if decl.starts_with("TIMESTAMP") {
            ColumnType::Timestamp
        } else if decl.starts_with("DATE") {
            ColumnType::Date
        } else if decl.starts_with("INT") || decl.starts_with("BIGINT") || decl.starts_with("SMALLINT") {
            ColumnType::Integer
        } else if ["NUMERIC", "DECIMAL", "REAL", "FLOAT", "DOUBLE"]
            .iter()
            .any(|p| decl.starts_with(p))
        {
            ColumnType::Numeric
        } else {
            ColumnType::Text
        }
    }

    /// SQLite storage affinity used in generated DDL.
    pub fn affinity(self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Numeric => "REAL",
            ColumnType::Text | ColumnType::Timestamp | ColumnType::Date | ColumnType::TextList => {
                "TEXT"
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Sync tables
// ---------------------------------------------------------------------------

/// Layout of one versioned sync table.
#[derive(Debug)]
pub struct TableSchema {
    pub table: &'static str,
    /// Conflict target for upserts.
    pub key_column: &'static str,
    /// Column used to find the existing row when computing its version.
    pub id_column: &'static str,
    /// `(name, SQL declaration)` in canonical column order.
    pub columns: &'static [(&'static str, &'static str)],
}

/// Bookkeeping columns every sync table carries in addition to its schema.
pub const VERSION_COLUMN: &str = "version";
pub const UPDATE_TIMESTAMP_COLUMN: &str = "update_timestamp";

impl TableSchema {
    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, decl)| ColumnType::from_sql(decl))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|(n, _)| *n)
    }

    pub fn create_table_sql(&self) -> String {
        let mut cols: Vec<String> = self
            .columns
            .iter()
            .map(|(name, decl)| {
                format!("    {} {}", name, ColumnType::from_sql(decl).affinity())
            })
            .collect();
        cols.push(format!("    {VERSION_COLUMN} INTEGER NOT NULL DEFAULT 0"));
        cols.push(format!("    {UPDATE_TIMESTAMP_COLUMN} TEXT"));
        cols.push(format!("    UNIQUE({})", self.key_column));
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (\n{cols}\n);\n\
             CREATE INDEX IF NOT EXISTS idx_{table}_{id} ON {table}({id});",
            table = self.table,
            cols = cols.join(",\n"),
            id = self.id_column,
        )
    }
}

pub const EPICS: TableSchema = TableSchema {
    table: "epics",
    key_column: "epic_key",
    id_column: "epic_id",
    columns: &[
        ("protocol_uuid", "VARCHAR(36)"),
        ("last_updated", "TIMESTAMP"),
        ("epic_id", "VARCHAR(50)"),
        ("epic_key", "VARCHAR(255)"),
        ("summary", "TEXT"),
        ("protocol_id", "VARCHAR(50)"),
        ("assignee_email", "VARCHAR(255)"),
        ("requestor_email", "VARCHAR(255)"),
        ("trial_engineer_email", "VARCHAR(255)"),
        ("protocol_sheet", "TEXT"),
        ("year_of_harvest", "INTEGER"),
        ("country", "VARCHAR(2)"),
        ("crop", "VARCHAR(255)"),
        ("business_case", "TEXT"),
        ("trial_type", "VARCHAR(255)"),
        ("trial_objective", "VARCHAR(255)"),
        ("budget", "NUMERIC(10, 2)"),
        ("paid_costs", "NUMERIC(10, 2)"),
        ("forecasted_costs", "NUMERIC(10, 2)"),
        ("planned_trials", "INTEGER"),
        ("executed_trials", "INTEGER"),
        ("sponsor", "VARCHAR(255)"),
        ("cost_sheet", "TEXT"),
        ("url_field", "TEXT"),
        ("components", "TEXT[]"),
        ("created", "TIMESTAMP"),
        ("updated", "TIMESTAMP"),
        ("last_viewed", "TIMESTAMP"),
        ("watch_count", "INTEGER"),
        ("labels", "TEXT[]"),
        ("status_name", "VARCHAR(50)"),
        ("status_id", "VARCHAR(50)"),
        ("status_category", "VARCHAR(50)"),
        ("creator_email", "VARCHAR(255)"),
        ("comments_count", "INTEGER"),
        ("due_date", "DATE"),
    ],
};

pub const ISSUES: TableSchema = TableSchema {
    table: "issues",
    key_column: "issue_key",
    id_column: "issue_id",
    columns: &[
        ("trial_uuid", "VARCHAR(36)"),
        ("trial_id", "VARCHAR(50)"),
        ("created", "TIMESTAMP"),
        ("updated", "TIMESTAMP"),
        ("last_viewed", "TIMESTAMP"),
        ("watch_count", "INTEGER"),
        ("labels", "TEXT[]"),
        ("status_name", "VARCHAR(50)"),
        ("status_id", "VARCHAR(50)"),
        ("status_category", "VARCHAR(50)"),
        ("summary", "TEXT"),
        ("creator_email", "VARCHAR(255)"),
        ("comments_count", "INTEGER"),
        ("due_date", "DATE"),
        ("issue_id", "VARCHAR(255)"),
        ("issue_key", "VARCHAR(255)"),
        ("trial_engineer_email", "VARCHAR(255)"),
        ("assignee_email", "VARCHAR(255)"),
        ("last_updated", "TIMESTAMP"),
        ("epic_link", "VARCHAR(255)"),
        ("requestor_email", "VARCHAR(255)"),
        ("subtask_ids", "TEXT[]"),
        ("subtask_keys", "TEXT[]"),
    ],
};

pub const SUB_TASKS: TableSchema = TableSchema {
    table: "sub_tasks",
    key_column: "subtask_key",
    id_column: "subtask_key",
    columns: &[
        ("parent_issue", "VARCHAR(255)"),
        ("subtask_key", "VARCHAR(255)"),
        ("file_uuid", "VARCHAR(36)"),
        ("trial_id", "VARCHAR(50)"),
        ("created", "TIMESTAMP"),
        ("updated", "TIMESTAMP"),
        ("last_viewed", "TIMESTAMP"),
        ("watch_count", "INTEGER"),
        ("labels", "TEXT[]"),
        ("status_name", "VARCHAR(50)"),
        ("status_category", "VARCHAR(50)"),
        ("status_id", "VARCHAR(50)"),
        ("summary", "TEXT"),
        ("creator_email", "VARCHAR(255)"),
        ("comments_count", "INTEGER"),
        ("trial_engineer_email", "VARCHAR(255)"),
        ("assignee_email", "VARCHAR(255)"),
    ],
};

pub const SYNC_TABLES: [&TableSchema; 3] = [&EPICS, &ISSUES, &SUB_TASKS];

/// Look up a sync table layout by table name.
pub fn sync_schema(table: &str) -> Option<&'static TableSchema> {
    SYNC_TABLES.iter().copied().find(|s| s.table == table)
}

// ---------------------------------------------------------------------------
// Description tables
// ---------------------------------------------------------------------------

/// Protocol columns rendered into an epic description, in table order.
pub const EPIC_DESC_COLUMNS: &[&str] = &[
    "uuid",
    "date_created",
    "last_updated",
    "country",
    "crop",
    "description",
    "factor_levels",
    "replicates",
    "plot_length",
    "plot_width",
    "min_plot_area",
    "max_plot_area",
    "is_active",
    "name",
    "type_name",
    "target_year",
    "protocol_number",
    "update_timestamp",
    "flow_run_id",
];

/// Trial columns rendered into an issue description, in table order.
pub const TRIAL_DESC_COLUMNS: &[&str] = &[
    "uuid",
    "date_created",
    "last_updated",
    "country",
    "name",
    "comment",
    "protocol_uuid",
    "crop_season_uuid",
    "field_uuid",
    "field_zone_uuids",
    "factor_levels",
    "replicates",
    "plot_length",
    "plot_width",
    "min_plot_area",
    "max_plot_area",
    "is_active",
    "trial_number",
    "update_timestamp",
    "flow_run_id",
    "is_abandoned",
];

// ---------------------------------------------------------------------------
// Source tables
// ---------------------------------------------------------------------------

/// DDL for the upstream tables. Production databases already carry these;
/// local databases and tests create them on demand.
pub const SOURCE_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS protocol (
    uuid             TEXT PRIMARY KEY,
    date_created     TEXT,
    last_updated     TEXT,
    country          TEXT,
    crop             TEXT,
    description      TEXT,
    factor_levels    TEXT,
    replicates       INTEGER,
    plot_length      REAL,
    plot_width       REAL,
    min_plot_area    REAL,
    max_plot_area    REAL,
    is_active        INTEGER,
    name             TEXT,
    type_name        TEXT,
    target_year      INTEGER,
    protocol_number  TEXT,
    update_timestamp TEXT,
    flow_run_id      TEXT
);

CREATE INDEX IF NOT EXISTS idx_protocol_name ON protocol(name);

CREATE TABLE IF NOT EXISTS trial (
    uuid             TEXT PRIMARY KEY,
    date_created     TEXT,
    last_updated     TEXT,
    country          TEXT,
    name             TEXT,
    comment          TEXT,
    protocol_uuid    TEXT,
    crop_season_uuid TEXT,
    field_uuid       TEXT,
    field_zone_uuids TEXT,
    factor_levels    TEXT,
    replicates       INTEGER,
    plot_length      REAL,
    plot_width       REAL,
    min_plot_area    REAL,
    max_plot_area    REAL,
    is_active        INTEGER,
    trial_number     TEXT,
    update_timestamp TEXT,
    flow_run_id      TEXT,
    is_abandoned     INTEGER
);

CREATE INDEX IF NOT EXISTS idx_trial_protocol ON trial(protocol_uuid);

CREATE TABLE IF NOT EXISTS uploaded_data (
    file_uuid        TEXT PRIMARY KEY,
    "cropSeasonUuid" TEXT,
    type             TEXT,
    file_name        TEXT,
    uploaded_at      TEXT
);

CREATE TABLE IF NOT EXISTS fields (
    uuid       TEXT PRIMARY KEY,
    name       TEXT,
    "farmUuid" TEXT
);

CREATE TABLE IF NOT EXISTS farm (
    uuid TEXT PRIMARY KEY,
    name TEXT
);
"#;
