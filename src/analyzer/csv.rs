//! Tabular rendering of journey stages.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::journey::StageEvent;

const FIXED_COLUMNS: [&str; 2] = ["timestamp", "kind"];

/// Flatten a payload into dotted column names.
fn flatten(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, nested) in map {
                let column = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(&column, nested, out);
            }
        }
        Value::Null => {
            out.insert(prefix.to_string(), String::new());
        }
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

fn flatten_payload(stage: &StageEvent) -> BTreeMap<String, String> {
    let mut cells = BTreeMap::new();
    for (key, value) in &stage.payload {
        // Payload keys may not shadow the fixed columns.
        let column = if matches!(key.as_str(), "timestamp" | "kind") {
            format!("payload.{}", key)
        } else {
            key.clone()
        };
        flatten(&column, value, &mut cells);
    }
    cells
}

/// Quote a field when it contains a delimiter, quote or line break.
pub(crate) fn escape_field(field: &str) -> Cow<'_, str> {
    if field.contains(&[',', '"', '\n', '\r'][..]) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

fn push_row<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>) {
    let row: Vec<Cow<'_, str>> = cells.map(escape_field).collect();
    out.push_str(&row.join(","));
    out.push('\n');
}

/// Render stages as CSV: `timestamp,kind` then the sorted union of payload columns.
pub(crate) fn render_stages(stages: &[StageEvent]) -> String {
    let rows: Vec<BTreeMap<String, String>> = stages.iter().map(flatten_payload).collect();
    let payload_columns: BTreeSet<&str> = rows
        .iter()
        .flat_map(|cells| cells.keys().map(String::as_str))
        .collect();

    let mut header: Vec<&str> = FIXED_COLUMNS.to_vec();
    header.extend(payload_columns.iter().copied());

    let mut out = String::new();
    push_row(&mut out, header.into_iter());

    for (stage, cells) in stages.iter().zip(&rows) {
        let timestamp = stage.timestamp.to_rfc3339();
        let fixed = [timestamp.as_str(), stage.kind.as_str()];
        push_row(
            &mut out,
            fixed.into_iter().chain(
                payload_columns
                    .iter()
                    .map(|column| cells.get(*column).map(String::as_str).unwrap_or("")),
            ),
        );
    }
    out
}
