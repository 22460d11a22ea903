use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The mirrored customer record an evaluation mutates.
///
/// Every evaluation owns its own copy, seeded from the conversation's source
/// customer. Only the function executor produces new versions of it; the
/// engine swaps the whole record rather than mutating in place so before and
/// after snapshots are always available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CustomerRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub notes: Vec<String>,
    /// Fields the catalog does not model explicitly; preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single field-level difference between two customer snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub from: Value,
    pub to: Value,
}

impl CustomerRecord {
    /// Field-by-field diff against `after`, in stable field order.
    pub fn diff(&self, after: &CustomerRecord) -> Vec<FieldChange> {
        let before = to_map(self);
        let after = to_map(after);

        let mut fields: Vec<&String> = before.keys().chain(after.keys()).collect();
        fields.sort();
        fields.dedup();

        fields
            .into_iter()
            .filter_map(|field| {
                let from = before.get(field).cloned().unwrap_or(Value::Null);
                let to = after.get(field).cloned().unwrap_or(Value::Null);
                (from != to).then(|| FieldChange {
                    field: field.clone(),
                    from,
                    to,
                })
            })
            .collect()
    }

    /// Snapshot as a JSON value (used for persisted before/after states).
    pub fn snapshot(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn to_map(record: &CustomerRecord) -> Map<String, Value> {
    match serde_json::to_value(record) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}
