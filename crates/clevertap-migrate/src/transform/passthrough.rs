//! Transformer for NDJSON records already in upload shape.

use serde_json::Value;
use tracing::debug;

use super::properties::MAX_PROPERTIES;
use super::{RecordTransformer, Transformed};
use crate::record::{now_ts, DestinationRecord, Identity, Output, Properties, RawRecord, IDENTITY_KEYS};

/// Validates upload-shaped records and passes them through.
#[derive(Debug, Default)]
pub struct PassthroughTransformer;

impl PassthroughTransformer {
    /// Creates the transformer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn identity_of(record: &Value) -> Option<Identity> {
    IDENTITY_KEYS.iter().find_map(|key| {
        let value = match record.get(*key)? {
            Value::String(s) if !s.is_empty() => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        Identity::from_key(key, value)
    })
}

/// `ts` truncated to whole seconds; absent means now.
fn ts_of(record: &Value) -> Option<i64> {
    let ts = match record.get("ts") {
        None | Some(Value::Null) => Some(now_ts()),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Some(_) => None,
    };
    ts.filter(|ts| *ts >= 0)
}

fn object_field(record: &Value, key: &str) -> Option<Properties> {
    match record.get(key) {
        Some(Value::Object(map)) => Some(
            map.iter()
                .take(MAX_PROPERTIES)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        _ => None,
    }
}

impl RecordTransformer for PassthroughTransformer {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn transform(&self, record: RawRecord) -> Transformed {
        let RawRecord::Json(record) = record else {
            return Transformed::skipped();
        };
        let (Some(identity), Some(ts)) = (identity_of(&record), ts_of(&record)) else {
            debug!(record = %record, "Missing identity or timestamp. Skipping");
            return Transformed::skipped();
        };
        let out = match record.get("type").and_then(Value::as_str) {
            Some("profile") => DestinationRecord::profile(
                identity,
                ts,
                object_field(&record, "profileData").unwrap_or_default(),
            ),
            Some("event") => match record.get("evtName").and_then(Value::as_str) {
                Some(name) if !name.is_empty() => DestinationRecord::event(
                    identity,
                    ts,
                    name.to_string(),
                    object_field(&record, "evtData"),
                ),
                _ => return Transformed::skipped(),
            },
            _ => return Transformed::skipped(),
        };
        Transformed::output(Output::Api(out))
    }
}
