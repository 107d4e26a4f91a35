use std::path::Path;

use chrono::Utc;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::OptionalExtension;
use serde_json::{Number, Value};
use thiserror::Error;
use tokio_rusqlite::Connection;

use crate::normalize::{format_timestamp, parse_timestamp};
use crate::schema::{
    sync_schema, ColumnType, TableSchema, SOURCE_TABLES_SQL, SYNC_TABLES, UPDATE_TIMESTAMP_COLUMN,
    VERSION_COLUMN,
};
use crate::types::{Row, SyncRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// A table or column name failed identifier validation.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Async SQLite-backed store for the versioned sync tables and the
/// upstream source tables they mirror.
#[derive(Clone)]
pub struct SyncStore {
    conn: Connection,
}

// ---------------------------------------------------------------------------
// helpers – identifiers and value conversion
// ---------------------------------------------------------------------------

fn quote_ident(name: &str) -> Result<String> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StoreError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{name}\""))
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
    }
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Bind form of a record column, following the column's declared type.
fn column_to_sql(ty: ColumnType, value: &Value) -> Result<SqlValue> {
    if value.is_null() {
        return Ok(SqlValue::Null);
    }
    let bound = match ty {
        ColumnType::Timestamp => value
            .as_str()
            .and_then(parse_timestamp)
            .map(|ts| SqlValue::Text(format_timestamp(&ts)))
            .unwrap_or(SqlValue::Null),
        ColumnType::Date => value
            .as_str()
            .and_then(parse_timestamp)
            .map(|ts| SqlValue::Text(ts.date().format("%Y-%m-%d").to_string()))
            .unwrap_or(SqlValue::Null),
        ColumnType::TextList => SqlValue::Text(serde_json::to_string(value)?),
        _ => json_to_sql(value),
    };
    Ok(bound)
}

/// Stored list columns come back as JSON text; turn them back into arrays.
fn decode_sync_row(schema: &TableSchema, row: Row) -> Row {
    let mut decoded = Row::new();
    for (name, value) in row.iter() {
        let value = match (schema.column_type(name), value) {
            (Some(ColumnType::TextList), Value::String(s)) => {
                serde_json::from_str::<Value>(s).unwrap_or_else(|_| value.clone())
            }
            _ => value.clone(),
        };
        decoded.push(name, value);
    }
    decoded
}

fn read_rows(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> rusqlite::Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let rows = stmt.query_map(params, |r| {
        let mut row = Row::new();
        for (i, name) in names.iter().enumerate() {
            row.push(name.clone(), sql_to_json(r.get_ref(i)?));
        }
        Ok(row)
    })?;
    let collected: rusqlite::Result<Vec<Row>> = rows.collect();
    collected
}

impl SyncStore {
    /// Open (or create) a database at the given file path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create a purely in-memory database with the source tables in place
    /// (useful for tests).
    pub async fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        let store = Self { conn };
        store.init_schema().await?;
        store.ensure_source_tables().await?;
        Ok(store)
    }

    // -----------------------------------------------------------------------
    // Schema
    // -----------------------------------------------------------------------

    async fn init_schema(&self) -> Result<()> {
        let ddl: String = SYNC_TABLES
            .iter()
            .map(|schema| schema.create_table_sql())
            .collect::<Vec<_>>()
            .join("\n");
        self.conn
            .call(move |conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA busy_timeout=5000;
                    ",
                )?;
                conn.execute_batch(&ddl)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Create the upstream tables if they are missing.
    pub async fn ensure_source_tables(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SOURCE_TABLES_SQL)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Generic reads
    // -----------------------------------------------------------------------

    /// All rows of `table` where `column` equals `value`.
    pub async fn select_all(&self, table: &str, column: &str, value: &str) -> Result<Vec<Row>> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?1",
            quote_ident(table)?,
            quote_ident(column)?
        );
        let value = value.to_string();
        let rows = self
            .conn
            .call(move |conn| Ok(read_rows(conn, &sql, &[&value])?))
            .await?;

        Ok(match sync_schema(table) {
            Some(schema) => rows.into_iter().map(|r| decode_sync_row(schema, r)).collect(),
            None => rows,
        })
    }

    /// First row of `table` where `column` equals `value`.
    pub async fn select_one(&self, table: &str, column: &str, value: &str) -> Result<Option<Row>> {
        Ok(self.select_all(table, column, value).await?.into_iter().next())
    }

    /// Insert a generic row into any table.
    pub async fn insert_row(&self, table: &str, row: &Row) -> Result<()> {
        let names = row
            .column_names()
            .into_iter()
            .map(quote_ident)
            .collect::<Result<Vec<_>>>()?;
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table)?,
            names.join(", "),
            placeholders.join(", ")
        );
        let values: Vec<SqlValue> = row.iter().map(|(_, v)| json_to_sql(v)).collect();

        self.conn
            .call(move |conn| {
                conn.execute(&sql, rusqlite::params_from_iter(values.iter()))?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Set `changes` on every row of `table` where `column` equals `value`.
    /// Returns the number of rows touched.
    pub async fn update_where(
        &self,
        table: &str,
        column: &str,
        value: &str,
        changes: &Row,
    ) -> Result<usize> {
        let assignments = changes
            .column_names()
            .into_iter()
            .enumerate()
            .map(|(i, name)| Ok(format!("{} = ?{}", quote_ident(name)?, i + 1)))
            .collect::<Result<Vec<_>>>()?;
        if assignments.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            quote_ident(table)?,
            assignments.join(", "),
            quote_ident(column)?,
            assignments.len() + 1
        );
        let mut values: Vec<SqlValue> = changes.iter().map(|(_, v)| json_to_sql(v)).collect();
        values.push(SqlValue::Text(value.to_string()));

        let touched = self
            .conn
            .call(move |conn| Ok(conn.execute(&sql, rusqlite::params_from_iter(values.iter()))?))
            .await?;
        Ok(touched)
    }

    /// Farm and field names for a field UUID, used as description prelude.
    pub async fn farm_and_field_names(
        &self,
        field_uuid: &str,
    ) -> Result<Option<(Option<String>, Option<String>)>> {
        let field_uuid = field_uuid.to_string();
        let names = self
            .conn
            .call(move |conn| {
                let found = conn
                    .query_row(
                        "SELECT fa.name, f.name
                         FROM fields f
                         LEFT JOIN farm fa ON fa.uuid = f.\"farmUuid\"
                         WHERE f.uuid = ?1",
                        rusqlite::params![field_uuid],
                        |r| Ok((r.get::<_, Option<String>>(0)?, r.get::<_, Option<String>>(1)?)),
                    )
                    .optional()?;
                Ok(found)
            })
            .await?;
        Ok(names)
    }

    pub async fn count_rows(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table)?);
        let count = self
            .conn
            .call(move |conn| Ok(conn.query_row(&sql, [], |r| r.get::<_, i64>(0))?))
            .await?;
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Versioned records
    // -----------------------------------------------------------------------

    /// Stored row for a record type, looked up by its id column.
    pub async fn find_record<R: SyncRecord>(&self, lookup_id: &str) -> Result<Option<Row>> {
        let schema = R::schema();
        self.select_one(schema.table, schema.id_column, lookup_id).await
    }

    pub async fn latest_version(&self, schema: &'static TableSchema, lookup_id: &str) -> Result<Option<i64>> {
        let sql = format!(
            "SELECT {VERSION_COLUMN} FROM {} WHERE {} = ?1 ORDER BY {VERSION_COLUMN} DESC LIMIT 1",
            schema.table, schema.id_column
        );
        let lookup_id = lookup_id.to_string();
        let version = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(&sql, rusqlite::params![lookup_id], |r| r.get::<_, i64>(0))
                    .optional()?)
            })
            .await?;
        Ok(version)
    }

    /// Insert or update a record by its natural key and return the version
    /// it was written with.
    ///
    /// The version is 0 for a first sighting, the previous version plus one
    /// when `new_version` is set, and the previous version otherwise. The
    /// lookup and the write run in one transaction.
    pub async fn upsert_record<R: SyncRecord>(&self, record: &R, new_version: bool) -> Result<i64> {
        let schema = R::schema();
        let columns = record.to_columns()?;

        let mut values = Vec::with_capacity(schema.columns.len() + 2);
        for (name, decl) in schema.columns {
            let value = columns.get(*name).unwrap_or(&Value::Null);
            values.push(column_to_sql(ColumnType::from_sql(decl), value)?);
        }
        let stamp = format_timestamp(&Utc::now().naive_utc());

        let names: Vec<&str> = schema.column_names().collect();
        let placeholders: Vec<String> = (1..=names.len() + 2).map(|i| format!("?{i}")).collect();
        let updates: Vec<String> = names
            .iter()
            .copied()
            .filter(|n| *n != schema.key_column)
            .chain([VERSION_COLUMN, UPDATE_TIMESTAMP_COLUMN])
            .map(|n| format!("{n} = excluded.{n}"))
            .collect();
        let upsert_sql = format!(
            "INSERT INTO {table} ({cols}, {VERSION_COLUMN}, {UPDATE_TIMESTAMP_COLUMN})
             VALUES ({placeholders})
             ON CONFLICT({key}) DO UPDATE SET {updates}",
            table = schema.table,
            cols = names.join(", "),
            placeholders = placeholders.join(", "),
            key = schema.key_column,
            updates = updates.join(", "),
        );
        let version_sql = format!(
            "SELECT {VERSION_COLUMN} FROM {} WHERE {} = ?1 ORDER BY {VERSION_COLUMN} DESC LIMIT 1",
            schema.table, schema.id_column
        );
        let lookup_id = record.lookup_id().to_string();

        let version = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let previous: Option<i64> = tx
                    .query_row(&version_sql, rusqlite::params![lookup_id], |r| r.get(0))
                    .optional()?;
                let version = match previous {
                    None => 0,
                    Some(v) if new_version => v + 1,
                    Some(v) => v,
                };

                values.push(SqlValue::Integer(version));
                values.push(SqlValue::Text(stamp));

                tx.execute(&upsert_sql, rusqlite::params_from_iter(values.iter()))?;
                tx.commit()?;
                Ok(version)
            })
            .await?;

        tracing::debug!(
            table = schema.table,
            key = record.natural_key(),
            version,
            "record upserted"
        );
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_validated() {
        assert_eq!(quote_ident("cropSeasonUuid").unwrap(), "\"cropSeasonUuid\"");
        assert!(quote_ident("name; DROP TABLE epics").is_err());
        assert!(quote_ident("").is_err());
        assert!(quote_ident("1abc").is_err());
    }

    #[tokio::test]
    async fn generic_rows_roundtrip() {
        let store = SyncStore::new_in_memory().await.unwrap();
        let row = Row::new()
            .with("file_uuid", "f-1")
            .with("cropSeasonUuid", "cs-1")
            .with("type", "yield");
        store.insert_row("uploaded_data", &row).await.unwrap();

        let rows = store
            .select_all("uploaded_data", "cropSeasonUuid", "cs-1")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_str("type").as_deref(), Some("yield"));
        assert!(rows[0].get_str("file_name").is_none());

        assert!(store
            .select_one("uploaded_data", "file_uuid", "missing")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn update_where_touches_matching_rows_only() {
        let store = SyncStore::new_in_memory().await.unwrap();
        for (uuid, name) in [("t-1", "T-01"), ("t-2", "T-02")] {
            store
                .insert_row("trial", &Row::new().with("uuid", uuid).with("name", name))
                .await
                .unwrap();
        }

        let changes = Row::new().with("last_updated", "2024-05-01 00:00:00");
        assert_eq!(store.update_where("trial", "uuid", "t-1", &changes).await.unwrap(), 1);
        assert_eq!(store.update_where("trial", "uuid", "t-9", &changes).await.unwrap(), 0);

        let one = store.select_one("trial", "uuid", "t-1").await.unwrap().unwrap();
        assert_eq!(one.get_str("last_updated").as_deref(), Some("2024-05-01 00:00:00"));
        let two = store.select_one("trial", "uuid", "t-2").await.unwrap().unwrap();
        assert!(two.get_str("last_updated").is_none());

        let bad = Row::new().with("name; --", "x");
        assert!(store.update_where("trial", "uuid", "t-1", &bad).await.is_err());
    }

    #[tokio::test]
    async fn farm_and_field_names_join() {
        let store = SyncStore::new_in_memory().await.unwrap();
        store
            .insert_row("farm", &Row::new().with("uuid", "farm-1").with("name", "North Farm"))
            .await
            .unwrap();
        store
            .insert_row(
                "fields",
                &Row::new()
                    .with("uuid", "field-1")
                    .with("name", "Plot A")
                    .with("farmUuid", "farm-1"),
            )
            .await
            .unwrap();

        let names = store.farm_and_field_names("field-1").await.unwrap();
        assert_eq!(
            names,
            Some((Some("North Farm".to_string()), Some("Plot A".to_string())))
        );
        assert!(store.farm_and_field_names("field-2").await.unwrap().is_none());
    }
}
