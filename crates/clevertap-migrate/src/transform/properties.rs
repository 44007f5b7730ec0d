//! Property mapping shared by every transformer.
//!
//! Rules run per property, in order: nulls are dropped, a leading `$` is
//! stripped, the rename table is applied, the drop list is applied, list
//! values are joined (events only), the schema coerces the value and the
//! [`MAX_PROPERTIES`] cap is enforced.

use serde_json::Value;
use std::sync::Arc;

use crate::record::Properties;
use crate::schema::SchemaMap;

/// Properties kept per record.
pub const MAX_PROPERTIES: usize = 255;

/// Mixpanel profile keys renamed to CleverTap system properties.
pub const MIXPANEL_PROFILE_RENAMES: [(&str, &str); 7] = [
    ("name", "Name"),
    ("email", "Email"),
    ("gender", "Gender"),
    ("facebook_id", "fbId"),
    ("timezone", "Timezone"),
    ("date_of_birth", "Birthday"),
    ("phone", "Phone"),
];

/// Mixpanel profile keys never imported.
pub const MIXPANEL_PROFILE_DROPS: [&str; 2] = ["Phone", "Date Of Birth"];

/// Maps vendor properties to destination properties.
#[derive(Debug, Clone)]
pub struct PropertyMapper {
    schema: Arc<SchemaMap>,
    renames: &'static [(&'static str, &'static str)],
    drops: &'static [&'static str],
    keep_first: &'static [&'static str],
    excluded: &'static [&'static str],
    allow_lists: bool,
    join_lists: bool,
}

impl PropertyMapper {
    /// Creates a mapper that only coerces through `schema`.
    #[must_use]
    pub fn new(schema: Arc<SchemaMap>) -> Self {
        Self {
            schema,
            renames: &[],
            drops: &[],
            keep_first: &[],
            excluded: &[],
            allow_lists: false,
            join_lists: false,
        }
    }

    /// Rename table, keyed by the key after `$` stripping.
    #[must_use]
    pub fn with_renames(mut self, renames: &'static [(&'static str, &'static str)]) -> Self {
        self.renames = renames;
        self
    }

    /// Keys dropped after renaming.
    #[must_use]
    pub fn with_drops(mut self, drops: &'static [&'static str]) -> Self {
        self.drops = drops;
        self
    }

    /// Keys whose first value wins over later duplicates.
    #[must_use]
    pub fn with_keep_first(mut self, keys: &'static [&'static str]) -> Self {
        self.keep_first = keys;
        self
    }

    /// Raw keys skipped before any other rule.
    #[must_use]
    pub fn with_excluded(mut self, keys: &'static [&'static str]) -> Self {
        self.excluded = keys;
        self
    }

    /// Whether `T[]` schema types produce `$add` values (profiles).
    #[must_use]
    pub fn with_lists(mut self, allow: bool) -> Self {
        self.allow_lists = allow;
        self
    }

    /// Joins array values with `,`.
    #[must_use]
    pub fn with_joined_lists(mut self) -> Self {
        self.join_lists = true;
        self
    }

    /// Schema used for coercion.
    #[must_use]
    pub fn schema(&self) -> &SchemaMap {
        &self.schema
    }

    /// Destination key for `key`, or `None` when it is dropped.
    fn map_key(&self, key: &str) -> Option<String> {
        if self.excluded.contains(&key) {
            return None;
        }
        let key = key.strip_prefix('$').unwrap_or(key);
        let key = self
            .renames
            .iter()
            .find(|(from, _)| *from == key)
            .map_or(key, |(_, to)| *to);
        if self.drops.contains(&key) {
            return None;
        }
        Some(key.to_string())
    }

    /// Adds one property to `out`.
    pub fn insert(&self, out: &mut Properties, key: &str, value: Value) {
        if value.is_null() {
            return;
        }
        let Some(key) = self.map_key(key) else {
            return;
        };
        let exists = out.contains_key(&key);
        if exists && self.keep_first.contains(&key.as_str()) {
            return;
        }
        if !exists && out.len() >= MAX_PROPERTIES {
            return;
        }
        let value = match value {
            Value::Array(items) if self.join_lists => Value::String(join_list(&items)),
            other => other,
        };
        let value = self.schema.coerce(&key, value, self.allow_lists);
        out.insert(key, value);
    }

    /// Maps every property of `props`, preserving order.
    #[must_use]
    pub fn map<I>(&self, props: I) -> Properties
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut out = Properties::new();
        for (key, value) in props {
            self.insert(&mut out, &key, value);
        }
        out
    }
}

/// Joins the string and number elements of a list with `,`.
#[must_use]
pub fn join_list(items: &[Value]) -> String {
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(",")
}
