//! Records flowing through the pipeline.
//!
//! Sources produce [`RawRecord`]s, transformers turn them into [`Output`]s
//! and the batcher wraps API records into [`ApiBatch`] payloads.

use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// JSON object with insertion order preserved.
pub type Properties = Map<String, Value>;

/// Identity column names, in priority order.
pub const IDENTITY_KEYS: [&str; 4] = ["identity", "objectId", "FBID", "GPID"];

/// Event names reserved by CleverTap; imported events with these names are
/// prefixed with `_`.
pub const RESTRICTED_EVENTS: [&str; 7] = [
    "Notification Sent",
    "Notification Viewed",
    "Notification Clicked",
    "UTM Visited",
    "App Launched",
    "App Uninstalled",
    "Stayed",
];

/// One parsed vendor object.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    /// A JSON line or API result object.
    Json(Value),
    /// A CSV row bound to the file header.
    CsvRow(CsvRow),
}

/// A CSV row with its header.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvRow {
    /// 1-based line number in the file, header included.
    pub line: u64,
    /// Shared header columns.
    pub header: Arc<Vec<String>>,
    /// Row values.
    pub fields: Vec<String>,
}

/// Destination record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// User profile update.
    Profile,
    /// Behavioral event.
    Event,
}

/// The key a destination record is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Identity {
    /// Customer user id.
    #[serde(rename = "identity")]
    Identity(String),
    /// Device id derived from an advertising id.
    #[serde(rename = "objectId")]
    ObjectId(String),
    /// Facebook id.
    #[serde(rename = "FBID")]
    Fbid(String),
    /// Google Plus id.
    #[serde(rename = "GPID")]
    Gpid(String),
}

impl Identity {
    /// Builds the binding for one of [`IDENTITY_KEYS`].
    #[must_use]
    pub fn from_key(key: &str, value: String) -> Option<Self> {
        match key {
            "identity" => Some(Identity::Identity(value)),
            "objectId" => Some(Identity::ObjectId(value)),
            "FBID" => Some(Identity::Fbid(value)),
            "GPID" => Some(Identity::Gpid(value)),
            _ => None,
        }
    }

    /// Bound value.
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Identity::Identity(v) | Identity::ObjectId(v) | Identity::Fbid(v) | Identity::Gpid(v) => v,
        }
    }
}

/// A record in CleverTap upload form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DestinationRecord {
    /// Record type.
    #[serde(rename = "type")]
    pub kind: RecordKind,
    /// Identity binding, serialized as its own key.
    #[serde(flatten)]
    pub identity: Identity,
    /// Epoch seconds.
    pub ts: i64,
    /// Event name (events only).
    #[serde(rename = "evtName", skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    /// Event properties (events only).
    #[serde(rename = "evtData", skip_serializing_if = "Option::is_none")]
    pub event_data: Option<Properties>,
    /// Profile properties (profiles only).
    #[serde(rename = "profileData", skip_serializing_if = "Option::is_none")]
    pub profile_data: Option<Properties>,
}

impl DestinationRecord {
    /// Creates a profile record.
    #[must_use]
    pub fn profile(identity: Identity, ts: i64, data: Properties) -> Self {
        Self {
            kind: RecordKind::Profile,
            identity,
            ts,
            event_name: None,
            event_data: None,
            profile_data: Some(data),
        }
    }

    /// Creates an event record.
    #[must_use]
    pub fn event(identity: Identity, ts: i64, name: String, data: Option<Properties>) -> Self {
        Self {
            kind: RecordKind::Event,
            identity,
            ts,
            event_name: Some(name),
            event_data: data,
            profile_data: None,
        }
    }
}

/// Device platform of an SDK registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    /// Apple iOS.
    Ios,
    /// Android.
    Android,
}

impl Os {
    /// Maps a vendor system name to a platform.
    #[must_use]
    pub fn from_system_name(name: &str) -> Option<Self> {
        match name {
            "iOS" | "iPhone OS" => Some(Os::Ios),
            "Android OS" => Some(Os::Android),
            _ => None,
        }
    }

    /// Value of the `os` query parameter on the SDK endpoint.
    #[must_use]
    pub fn query_value(self) -> &'static str {
        match self {
            Os::Ios => "iOS",
            Os::Android => "android",
        }
    }

    /// Channel SDK payloads for this platform are routed to.
    #[must_use]
    pub fn channel(self) -> TargetChannel {
        match self {
            Os::Ios => TargetChannel::SdkIos,
            Os::Android => TargetChannel::SdkAndroid,
        }
    }
}

/// Upload channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetChannel {
    /// Batched upload API.
    Api,
    /// iOS SDK endpoint.
    SdkIos,
    /// Android SDK endpoint.
    SdkAndroid,
}

impl TargetChannel {
    /// Name used in logs.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            TargetChannel::Api => "api",
            TargetChannel::SdkIos => "sdk-ios",
            TargetChannel::SdkAndroid => "sdk-android",
        }
    }
}

/// Transformer output, tagged with its channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// Record for the upload API.
    Api(DestinationRecord),
    /// Complete `[meta, data]` SDK payload.
    Sdk {
        /// Target platform.
        os: Os,
        /// Payload records.
        payload: Vec<Value>,
    },
}

impl Output {
    /// Channel this output is sent on.
    #[must_use]
    pub fn channel(&self) -> TargetChannel {
        match self {
            Output::Api(_) => TargetChannel::Api,
            Output::Sdk { os, .. } => os.channel(),
        }
    }
}

/// Upload API request body: `{"d": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiBatch {
    /// Records, never empty.
    #[serde(rename = "d")]
    pub records: Vec<DestinationRecord>,
}

impl ApiBatch {
    /// Whether the batch carries profile records.
    ///
    /// Batches never mix kinds, so the first record decides.
    #[must_use]
    pub fn is_profile(&self) -> bool {
        self.records
            .first()
            .is_some_and(|r| r.kind == RecordKind::Profile)
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn strip_ad_id(ad_id: &str) -> String {
    ad_id.replace('-', "").to_lowercase()
}

/// `objectId` for an Android advertising id.
#[must_use]
pub fn android_object_id(ad_id: &str) -> String {
    format!("__g{}", strip_ad_id(ad_id))
}

/// `objectId` for an iOS advertising id (IDFA).
#[must_use]
pub fn ios_object_id(ad_id: &str) -> String {
    format!("-g{}", strip_ad_id(ad_id))
}

/// Applies the restricted-name prefix.
#[must_use]
pub fn destination_event_name(name: &str) -> String {
    if RESTRICTED_EVENTS.contains(&name) {
        format!("_{name}")
    } else {
        name.to_string()
    }
}

/// Current epoch seconds.
#[must_use]
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_profile_serialization_order() {
        let mut data = Properties::new();
        data.insert("age".to_string(), json!("30"));
        data.insert("gender".to_string(), json!("male"));
        let record = DestinationRecord::profile(Identity::Identity("user1".into()), 1700, data);

        let body = serde_json::to_string(&ApiBatch {
            records: vec![record],
        })
        .unwrap();
        assert_eq!(
            body,
            r#"{"d":[{"type":"profile","identity":"user1","ts":1700,"profileData":{"age":"30","gender":"male"}}]}"#
        );
    }

    #[test]
    fn test_event_serialization() {
        let record = DestinationRecord::event(
            Identity::ObjectId("__gabc".into()),
            5,
            "Play".into(),
            None,
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({"type": "event", "objectId": "__gabc", "ts": 5, "evtName": "Play"})
        );
    }

    #[test]
    fn test_object_ids() {
        assert_eq!(
            android_object_id("38400000-8CF0-11BD-B23E-10B96E40000D"),
            "__g384000008cf011bdb23e10b96e40000d"
        );
        assert_eq!(ios_object_id("AB-CD"), "-gabcd");
    }

    #[test]
    fn test_restricted_event_prefix() {
        assert_eq!(destination_event_name("Notification Sent"), "_Notification Sent");
        assert_eq!(destination_event_name("Stayed"), "_Stayed");
        assert_eq!(destination_event_name("Purchase"), "Purchase");
    }

    #[test]
    fn test_batch_kind() {
        let event = DestinationRecord::event(Identity::Identity("u".into()), 1, "e".into(), None);
        let batch = ApiBatch {
            records: vec![event],
        };
        assert!(!batch.is_profile());
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_os_mapping() {
        assert_eq!(Os::from_system_name("iPhone OS"), Some(Os::Ios));
        assert_eq!(Os::from_system_name("Android OS"), Some(Os::Android));
        assert_eq!(Os::from_system_name("Windows"), None);
        assert_eq!(Os::Android.channel(), TargetChannel::SdkAndroid);
        assert_eq!(Os::Ios.query_value(), "iOS");
    }
}
