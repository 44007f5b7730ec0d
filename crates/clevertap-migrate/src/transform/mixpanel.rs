//! Mixpanel profile and event transformers.
//!
//! The event transformer also handles Amplitude export lines.

use serde_json::Value;
use tracing::debug;

use super::properties::{
    PropertyMapper, MIXPANEL_PROFILE_DROPS, MIXPANEL_PROFILE_RENAMES,
};
use super::{RecordTransformer, TransformContext, Transformed};
use crate::record::{destination_event_name, now_ts, DestinationRecord, Identity, Output, RawRecord};

/// Engage API result object to profile record.
pub struct MixpanelProfileTransformer {
    mapper: PropertyMapper,
}

impl MixpanelProfileTransformer {
    /// Creates the transformer.
    #[must_use]
    pub fn new(ctx: TransformContext) -> Self {
        Self {
            mapper: PropertyMapper::new(ctx.schema)
                .with_renames(&MIXPANEL_PROFILE_RENAMES)
                .with_drops(&MIXPANEL_PROFILE_DROPS)
                .with_keep_first(&["Email"])
                .with_lists(true),
        }
    }
}

/// String form of an id that may be a string or a number.
fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl RecordTransformer for MixpanelProfileTransformer {
    fn name(&self) -> &'static str {
        "mixpanel_profiles"
    }

    fn transform(&self, record: RawRecord) -> Transformed {
        let RawRecord::Json(Value::Object(mut record)) = record else {
            return Transformed::skipped();
        };
        let Some(identity) = id_string(record.get("$distinct_id")) else {
            debug!("Identity not found for profile. Skipping");
            return Transformed::skipped();
        };
        let data = match record.remove("$properties") {
            Some(Value::Object(props)) => self.mapper.map(props),
            _ => Default::default(),
        };
        Transformed::output(Output::Api(DestinationRecord::profile(
            Identity::Identity(identity),
            now_ts(),
            data,
        )))
    }
}

/// Raw export line (`{"event": ..., "properties": {...}}`) to event record.
pub struct MixpanelEventTransformer {
    ctx: TransformContext,
    mapper: PropertyMapper,
}

impl MixpanelEventTransformer {
    /// Creates the transformer.
    #[must_use]
    pub fn new(ctx: TransformContext) -> Self {
        let mapper = PropertyMapper::new(ctx.schema.clone())
            .with_excluded(&["distinct_id", "time"])
            .with_joined_lists();
        Self { ctx, mapper }
    }
}

fn epoch_seconds(value: Option<&Value>) -> Option<i64> {
    let ts = match value? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f.trunc() as i64),
        _ => None,
    };
    ts.filter(|ts| *ts >= 0)
}

impl RecordTransformer for MixpanelEventTransformer {
    fn name(&self) -> &'static str {
        "mixpanel_events"
    }

    fn transform(&self, record: RawRecord) -> Transformed {
        let RawRecord::Json(Value::Object(mut record)) = record else {
            return Transformed::skipped();
        };
        let name = match record.get("event") {
            Some(Value::String(name)) if !name.is_empty() => name.clone(),
            _ => {
                debug!("Event name missing. Skipping");
                return Transformed::skipped();
            }
        };
        let Some(Value::Object(props)) = record.remove("properties") else {
            return Transformed::skipped();
        };
        let Some(identity) = id_string(props.get("distinct_id")) else {
            debug!(event = %name, "Identity missing. Skipping");
            return Transformed::skipped();
        };
        let Some(ts) = epoch_seconds(props.get("time")) else {
            debug!(event = %name, "Time stamp missing. Skipping");
            return Transformed::skipped();
        };
        if !self.ctx.event_allowed(&name) {
            return Transformed::filtered();
        }
        Transformed::output(Output::Api(DestinationRecord::event(
            Identity::Identity(identity),
            ts,
            destination_event_name(&name),
            Some(self.mapper.map(props)),
        )))
    }
}
