//! mParticle event batch transformer.
//!
//! One S3 line is a batch: device info shared by a list of events. Each
//! event becomes one event record.

use serde_json::{Map, Value};
use tracing::debug;

use super::properties::PropertyMapper;
use super::{RecordTransformer, TransformContext, Transformed};
use crate::record::{
    android_object_id, destination_event_name, ios_object_id, DestinationRecord, Identity, Output,
    RawRecord,
};

/// `user_id` value mParticle uses for anonymous users.
const ANONYMOUS_USER_ID: &str = "-1";

/// mParticle batch transformer.
pub struct MparticleTransformer {
    ctx: TransformContext,
    mapper: PropertyMapper,
}

impl MparticleTransformer {
    /// Creates the transformer.
    #[must_use]
    pub fn new(ctx: TransformContext) -> Self {
        let mapper = PropertyMapper::new(ctx.schema.clone());
        Self { ctx, mapper }
    }

    fn transform_event(&self, event: &Value, device: &Map<String, Value>) -> Transformed {
        let Some(data) = event.get("data").and_then(Value::as_object) else {
            return Transformed::skipped();
        };
        let name = match data.get("event_name") {
            Some(Value::String(name)) if !name.is_empty() => name.as_str(),
            _ => {
                debug!("Event name missing. Skipping");
                return Transformed::skipped();
            }
        };
        if !self.ctx.event_allowed(name) {
            debug!(event = name, "Filtered event");
            return Transformed::filtered();
        }
        let Some(ts) = timestamp_seconds(data.get("timestamp_unixtime_ms")) else {
            debug!(event = name, "Time stamp is missing or in wrong format. Skipping");
            return Transformed::skipped();
        };
        let attributes = data
            .get("custom_attributes")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let Some(identity) = identity_of(&attributes, device) else {
            debug!(event = name, "Both user_id and advertising ids are missing. Skipping");
            return Transformed::skipped();
        };
        Transformed::output(Output::Api(DestinationRecord::event(
            identity,
            ts,
            destination_event_name(name),
            Some(self.mapper.map(attributes)),
        )))
    }
}

/// `timestamp_unixtime_ms` (string or number) in seconds.
fn timestamp_seconds(value: Option<&Value>) -> Option<i64> {
    let millis = match value? {
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        _ => return None,
    };
    (millis >= 0).then_some(millis / 1000)
}

fn non_empty_str<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn identity_of(attributes: &Map<String, Value>, device: &Map<String, Value>) -> Option<Identity> {
    let user_id = match attributes.get("user_id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    if let Some(user_id) = user_id.filter(|id| !id.is_empty() && id != ANONYMOUS_USER_ID) {
        return Some(Identity::Identity(user_id));
    }
    if let Some(ad_id) = non_empty_str(device, "android_advertising_id") {
        return Some(Identity::ObjectId(android_object_id(ad_id)));
    }
    non_empty_str(device, "ios_advertising_id").map(|ad_id| Identity::ObjectId(ios_object_id(ad_id)))
}

impl RecordTransformer for MparticleTransformer {
    fn name(&self) -> &'static str {
        "mparticle"
    }

    fn transform(&self, record: RawRecord) -> Transformed {
        let RawRecord::Json(record) = record else {
            return Transformed::skipped();
        };
        let events = record
            .get("events")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let device = record
            .get("device_info")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let country = device.get("locale_country").and_then(Value::as_str);
        if self.ctx.blocks_country(country) {
            return Transformed {
                europe_dropped: events.len() as u64,
                ..Transformed::default()
            };
        }

        let mut out = Transformed::default();
        for event in events {
            out.merge(self.transform_event(event, &device));
        }
        out
    }
}
