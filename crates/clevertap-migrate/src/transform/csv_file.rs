//! CSV row transformer.

use serde_json::Value;
use tracing::warn;

use super::properties::PropertyMapper;
use super::{RecordTransformer, TransformContext, Transformed};
use crate::config::DataType;
use crate::record::{
    destination_event_name, now_ts, CsvRow, DestinationRecord, Identity, Output, RawRecord,
    IDENTITY_KEYS,
};
use crate::schema::DeclaredType;

/// Turns CSV rows into profile or event records.
pub struct CsvTransformer {
    data_type: DataType,
    event_name: Option<String>,
    ctx: TransformContext,
    mapper: PropertyMapper,
}

impl CsvTransformer {
    /// Creates a transformer for rows of `data_type`.
    #[must_use]
    pub fn new(data_type: DataType, event_name: Option<String>, ctx: TransformContext) -> Self {
        let mapper =
            PropertyMapper::new(ctx.schema.clone()).with_lists(data_type == DataType::Profile);
        Self {
            data_type,
            event_name,
            ctx,
            mapper,
        }
    }

    /// Epoch seconds of a `ts` cell, `None` when malformed or negative.
    fn parse_ts(&self, value: &str) -> Option<i64> {
        if value.is_empty() {
            return Some(now_ts());
        }
        let ts = match self.mapper.schema().get("ts") {
            Some(DeclaredType::Date(format)) => format.to_epoch(value),
            _ => value.trim().parse::<i64>().ok(),
        };
        ts.filter(|ts| *ts >= 0)
    }

    fn transform_row(&self, row: &CsvRow) -> Transformed {
        if row.fields.len() != row.header.len() {
            warn!(line = row.line, "Mismatch in header and row data length. Skipping");
            return Transformed::skipped();
        }

        let is_profile = self.data_type == DataType::Profile;
        let mut identities: Vec<(&str, &str)> = Vec::new();
        let mut ts = None;
        let mut props: Vec<(String, Value)> = Vec::new();

        for (key, value) in row.header.iter().zip(&row.fields) {
            let key = key.as_str();
            if IDENTITY_KEYS.contains(&key) {
                if value.is_empty() {
                    warn!(line = row.line, column = key, "Identity field is missing. Skipping");
                    return Transformed::skipped();
                }
                identities.push((key, value));
                continue;
            }
            match key {
                "ts" => match self.parse_ts(value) {
                    Some(epoch) => ts = Some(epoch),
                    None => {
                        warn!(line = row.line, value = %value, "Timestamp is in wrong format. Skipping");
                        return Transformed::skipped();
                    }
                },
                "evtName" if !is_profile => {
                    if Some(value.as_str()) != self.event_name.as_deref() {
                        warn!(
                            line = row.line,
                            "Event name in record is different from command line option. Skipping"
                        );
                        return Transformed::skipped();
                    }
                }
                _ => {
                    if is_profile && value.is_empty() {
                        continue;
                    }
                    props.push((key.to_string(), Value::String(value.clone())));
                }
            }
        }

        // Primary identity follows IDENTITY_KEYS priority, not column order.
        identities.sort_by_key(|(key, _)| IDENTITY_KEYS.iter().position(|k| k == key));
        let mut identities = identities.into_iter();
        let Some(identity) = identities
            .next()
            .and_then(|(key, value)| Identity::from_key(key, value.to_string()))
        else {
            return Transformed::skipped();
        };
        let ts = ts.unwrap_or_else(now_ts);

        if is_profile {
            let mut data = self.mapper.map(props);
            for (key, value) in identities {
                self.mapper.insert(&mut data, key, Value::String(value.to_string()));
            }
            return Transformed::output(Output::Api(DestinationRecord::profile(identity, ts, data)));
        }

        let name = self.event_name.clone().unwrap_or_default();
        if !self.ctx.event_allowed(&name) {
            return Transformed::filtered();
        }
        let data = self.mapper.map(props);
        Transformed::output(Output::Api(DestinationRecord::event(
            identity,
            ts,
            destination_event_name(&name),
            Some(data),
        )))
    }
}

impl RecordTransformer for CsvTransformer {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn transform(&self, record: RawRecord) -> Transformed {
        match record {
            RawRecord::CsvRow(row) => self.transform_row(&row),
            RawRecord::Json(_) => Transformed::skipped(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaMap;
    use serde_json::json;
    use std::sync::Arc;

    fn row(header: &[&str], fields: &[&str]) -> RawRecord {
        RawRecord::CsvRow(CsvRow {
            line: 2,
            header: Arc::new(header.iter().map(|s| s.to_string()).collect()),
            fields: fields.iter().map(|s| s.to_string()).collect(),
        })
    }

    fn ctx(schema: &str) -> TransformContext {
        TransformContext {
            schema: Arc::new(SchemaMap::from_json_str(schema).unwrap()),
            ..TransformContext::default()
        }
    }

    fn profile_transformer(schema: &str) -> CsvTransformer {
        CsvTransformer::new(DataType::Profile, None, ctx(schema))
    }

    fn event_transformer() -> CsvTransformer {
        CsvTransformer::new(DataType::Event, Some("Purchase".to_string()), ctx("{}"))
    }

    fn single(out: Transformed) -> DestinationRecord {
        assert_eq!(out.outputs.len(), 1, "{out:?}");
        match out.outputs.into_iter().next() {
            Some(Output::Api(record)) => record,
            other => panic!("unexpected output {other:?}"),
        }
    }

    #[test]
    fn test_profile_row() {
        let t = profile_transformer(r#"{"age": "integer", "tags": "string[]"}"#);
        let record = single(t.transform(row(
            &["identity", "Name", "age", "tags", "ts", "city"],
            &["u1", "Jack", "30", "vip", "1700000000", ""],
        )));

        assert_eq!(record.identity, Identity::Identity("u1".into()));
        assert_eq!(record.ts, 1_700_000_000);
        assert_eq!(
            Value::Object(record.profile_data.unwrap()),
            json!({"Name": "Jack", "age": 30, "tags": {"$add": ["vip"]}})
        );
    }

    #[test]
    fn test_identity_priority_and_extra_columns() {
        let t = profile_transformer("{}");
        let record = single(t.transform(row(&["GPID", "objectId", "Name"], &["g1", "o1", "A"])));
        assert_eq!(record.identity, Identity::ObjectId("o1".into()));
        let data = record.profile_data.unwrap();
        assert_eq!(data["GPID"], json!("g1"));
    }

    #[test]
    fn test_empty_identity_skips_row() {
        let t = profile_transformer("{}");
        let out = t.transform(row(&["identity", "objectId"], &["u1", ""]));
        assert!(out.outputs.is_empty());
        assert_eq!(out.skipped, 1);
    }

    #[test]
    fn test_column_count_mismatch_skips_row() {
        let t = profile_transformer("{}");
        let out = t.transform(row(&["identity", "Name"], &["u1"]));
        assert_eq!(out.skipped, 1);
    }

    #[test]
    fn test_ts_rules() {
        let t = profile_transformer("{}");
        let before = now_ts();
        let record = single(t.transform(row(&["identity", "ts"], &["u1", ""])));
        assert!(record.ts >= before);

        let out = t.transform(row(&["identity", "ts"], &["u1", "yesterday"]));
        assert_eq!(out.skipped, 1);

        let out = t.transform(row(&["identity", "ts"], &["u1", "-86400"]));
        assert!(out.outputs.is_empty());
        assert_eq!(out.skipped, 1);

        let record = single(t.transform(row(&["identity"], &["u1"])));
        assert!(record.ts >= before);
    }

    #[test]
    fn test_ts_with_date_schema() {
        let t = profile_transformer(r#"{"ts": "date$2006-01-02$UTC"}"#);
        let record = single(t.transform(row(&["identity", "ts"], &["u1", "2024-01-02"])));
        assert_eq!(record.ts, 1_704_153_600);

        let out = t.transform(row(&["identity", "ts"], &["u1", "02/01/2024"]));
        assert_eq!(out.skipped, 1);
    }

    #[test]
    fn test_event_row() {
        let t = event_transformer();
        let record = single(t.transform(row(
            &["identity", "evtName", "amount", "note"],
            &["u1", "Purchase", "10", ""],
        )));
        assert_eq!(record.event_name.as_deref(), Some("Purchase"));
        assert_eq!(
            Value::Object(record.event_data.unwrap()),
            json!({"amount": "10", "note": ""})
        );
    }

    #[test]
    fn test_event_name_column_must_match() {
        let t = event_transformer();
        let out = t.transform(row(&["identity", "evtName"], &["u1", "Refund"]));
        assert_eq!(out.skipped, 1);
    }

    #[test]
    fn test_event_lists_not_wrapped() {
        let t = CsvTransformer::new(
            DataType::Event,
            Some("Play".to_string()),
            ctx(r#"{"score": "integer[]"}"#),
        );
        let record = single(t.transform(row(&["identity", "score"], &["u1", "7"])));
        assert_eq!(record.event_data.unwrap()["score"], json!(7));
    }
}
