//! Leanplum session transformer.
//!
//! A Leanplum export line is one session. It yields a profile record (when
//! the session carries user attributes), one event record per state event,
//! and an SDK registration payload for sessions with full device details.

use serde_json::{json, Map, Value};
use tracing::debug;

use super::properties::PropertyMapper;
use super::{RecordTransformer, TransformContext, Transformed};
use crate::record::{
    android_object_id, destination_event_name, ios_object_id, now_ts, DestinationRecord, Identity,
    Os, Output, RawRecord,
};

/// Leanplum session transformer.
pub struct LeanplumTransformer {
    account_id: String,
    token: String,
    ctx: TransformContext,
    profile_mapper: PropertyMapper,
    event_mapper: PropertyMapper,
}

impl LeanplumTransformer {
    /// Creates the transformer; `account_id` and `token` go into SDK payloads.
    #[must_use]
    pub fn new(account_id: String, token: String, ctx: TransformContext) -> Self {
        Self {
            account_id,
            token,
            profile_mapper: PropertyMapper::new(ctx.schema.clone())
                .with_lists(true)
                .with_keep_first(&["identity"]),
            event_mapper: PropertyMapper::new(ctx.schema.clone()),
            ctx,
        }
    }

    fn profile(&self, attributes: &Map<String, Value>, object_id: Option<&str>, user_id: Option<&str>) -> Option<Output> {
        let attributes = attributes.clone().into_iter();
        let (identity, data) = match (object_id, user_id) {
            // The user id rides along as a property and must survive the cap.
            (Some(object_id), Some(user_id)) => {
                let leading = ("identity".to_string(), Value::String(user_id.to_string()));
                (
                    Identity::ObjectId(object_id.to_string()),
                    self.profile_mapper.map(std::iter::once(leading).chain(attributes)),
                )
            }
            (Some(object_id), None) => (
                Identity::ObjectId(object_id.to_string()),
                self.profile_mapper.map(attributes),
            ),
            (None, Some(user_id)) => (
                Identity::Identity(user_id.to_string()),
                self.profile_mapper.map(attributes),
            ),
            (None, None) => return None,
        };
        Some(Output::Api(DestinationRecord::profile(identity, now_ts(), data)))
    }

    fn events(&self, session: &Map<String, Value>, identity: &Identity) -> Transformed {
        let mut out = Transformed::default();
        let states = session.get("states").and_then(Value::as_array);
        for event in states
            .into_iter()
            .flatten()
            .filter_map(|state| state.get("events").and_then(Value::as_array))
            .flatten()
        {
            let name = match event.get("name") {
                Some(Value::String(name)) if !name.is_empty() => name.as_str(),
                _ => {
                    out.skipped += 1;
                    continue;
                }
            };
            if !self.ctx.event_allowed(name) {
                out.filtered += 1;
                continue;
            }
            let ts = event
                .get("time")
                .and_then(Value::as_f64)
                .map_or_else(now_ts, |t| t.trunc() as i64);
            if ts < 0 {
                out.skipped += 1;
                continue;
            }
            let data = event
                .get("parameters")
                .and_then(Value::as_object)
                .map(|params| self.event_mapper.map(params.clone()));
            out.outputs.push(Output::Api(DestinationRecord::event(
                identity.clone(),
                ts,
                destination_event_name(name),
                data,
            )));
        }
        out
    }

    fn sdk_payload(&self, session: &Map<String, Value>, os: Os, object_id: &str) -> Option<Output> {
        let app_version = non_empty_str(session, "appVersion")?;
        let model = non_empty_str(session, "deviceModel")?;
        let os_version = non_empty_str(session, "systemVersion")?;

        let (sdk_version, make, push_type) = match os {
            Os::Ios => ("30401", "Apple", "apns"),
            Os::Android => ("30403", "Others", "gcm"),
        };
        let mut app_fields = json!({
            "Version Name": app_version,
            "App Version": app_version,
            "SDK Version": sdk_version,
            "Model": model,
            "Make": make,
            "OS Version": os_version,
            "wdt": 2.57,
            "hgt": 4.84
        });
        if let (Some(lat), Some(lon)) = (coordinate(session, "lat"), coordinate(session, "lon")) {
            app_fields["Latitude"] = json!(lat);
            app_fields["Longitude"] = json!(lon);
        }

        let meta = json!({
            "type": "meta",
            "id": self.account_id,
            "g": object_id,
            "tk": self.token,
            "af": app_fields
        });
        let data = json!({
            "pg": 1,
            "type": "data",
            "data": {"id": "", "action": "register", "type": push_type}
        });
        Some(Output::Sdk {
            os,
            payload: vec![meta, data],
        })
    }
}

fn non_empty_str<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn coordinate(session: &Map<String, Value>, key: &str) -> Option<f64> {
    match session.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.is_empty() => s.trim().parse().ok(),
        _ => None,
    }
}

/// Platform and `objectId` derived from the session's advertising id.
fn object_id(session: &Map<String, Value>) -> Option<(Os, String)> {
    let attributes = session.get("userAttributes").and_then(Value::as_object)?;
    let system = non_empty_str(session, "systemName")?;
    match Os::from_system_name(system) {
        Some(Os::Android) => {
            non_empty_str(attributes, "adid").map(|id| (Os::Android, android_object_id(id)))
        }
        Some(Os::Ios) => non_empty_str(attributes, "IDFA").map(|id| (Os::Ios, ios_object_id(id))),
        None => {
            if attributes.contains_key("adid") || attributes.contains_key("IDFA") {
                debug!(system, "Unknown system name");
            }
            None
        }
    }
}

impl RecordTransformer for LeanplumTransformer {
    fn name(&self) -> &'static str {
        "leanplum"
    }

    fn transform(&self, record: RawRecord) -> Transformed {
        let RawRecord::Json(Value::Object(session)) = record else {
            return Transformed::skipped();
        };
        let mut out = Transformed {
            sessions: 1,
            ..Transformed::default()
        };

        if self.ctx.blocks_country(non_empty_str(&session, "country")) {
            out.europe_dropped = 1;
            return out;
        }

        let user_id = non_empty_str(&session, "userId");
        let device = object_id(&session);
        let identity = match (&device, user_id) {
            (Some((_, object_id)), _) => Identity::ObjectId(object_id.clone()),
            (None, Some(user_id)) => Identity::Identity(user_id.to_string()),
            (None, None) => {
                out.skipped = 1;
                return out;
            }
        };

        if let Some(attributes) = session.get("userAttributes").and_then(Value::as_object) {
            let object_id = device.as_ref().map(|(_, id)| id.as_str());
            out.outputs.extend(self.profile(attributes, object_id, user_id));
        }
        out.merge(self.events(&session, &identity));
        if let Some((os, object_id)) = &device {
            out.outputs.extend(self.sdk_payload(&session, *os, object_id));
        }
        out
    }
}
