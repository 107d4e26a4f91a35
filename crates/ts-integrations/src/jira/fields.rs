//! Custom field lookup by logical name.

use std::collections::BTreeMap;

use serde_json::Value;
use ts_core::config::TrackerConfig;
use ts_core::types::CustomField;

use super::TicketFields;

/// Logical field name to payload key (`customfield_12506`, `duedate`).
#[derive(Debug, Clone)]
pub struct FieldMap {
    keys: BTreeMap<CustomField, String>,
}

impl Default for FieldMap {
    fn default() -> Self {
        Self::from_config(&TrackerConfig::default())
    }
}

impl FieldMap {
    pub fn from_config(tracker: &TrackerConfig) -> Self {
        let keys = CustomField::ALL
            .iter()
            .map(|f| (*f, tracker.field_key(*f)))
            .collect();
        Self { keys }
    }

    pub fn key(&self, field: CustomField) -> &str {
        self.keys.get(&field).map(String::as_str).unwrap_or_default()
    }

    /// Raw value of a field; JSON null counts as absent.
    pub fn raw<'a>(&self, fields: &'a TicketFields, field: CustomField) -> Option<&'a Value> {
        fields.extra.get(self.key(field)).filter(|v| !v.is_null())
    }

    /// Scalar values as-is; select options yield their `value` member.
    pub fn string(&self, fields: &TicketFields, field: CustomField) -> Option<String> {
        self.raw(fields, field).and_then(scalar_string)
    }

    /// A named member of an object value, e.g. `emailAddress` of a user picker.
    pub fn nested(&self, fields: &TicketFields, field: CustomField, member: &str) -> Option<String> {
        self.raw(fields, field)
            .and_then(|v| v.get(member))
            .and_then(scalar_string)
    }

    pub fn integer(&self, fields: &TicketFields, field: CustomField) -> Option<i64> {
        let value = self.string(fields, field)?;
        let value = value.trim();
        value
            .parse::<i64>()
            .ok()
            .or_else(|| value.parse::<f64>().ok().map(|f| f.trunc() as i64))
    }

    pub fn number(&self, fields: &TicketFields, field: CustomField) -> Option<f64> {
        self.string(fields, field)?.trim().parse::<f64>().ok()
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(obj) => obj.get("value").and_then(scalar_string),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(scalar_string).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
    }
}
