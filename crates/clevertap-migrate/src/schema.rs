//! Property schema loading and value coercion.
//!
//! A schema file is a flat JSON object mapping property names to declared
//! types:
//!
//! ```json
//! {
//!     "age": "Integer",
//!     "score": "Float",
//!     "tags": "string[]",
//!     "signup": "date$2006-01-02 15:04$Asia/Kolkata"
//! }
//! ```
//!
//! Scalar type names are case-insensitive. Date layouts accept either
//! `strftime` patterns (`%Y-%m-%d`) or Go reference layouts
//! (`2006-01-02`), the latter being what existing schema files use.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use serde_json::{Number, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

use crate::error::{Error, Result};

/// Scalar property type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    /// 64-bit float.
    Float,
    /// 64-bit signed integer.
    Integer,
    /// Boolean.
    Boolean,
    /// String.
    String,
}

/// Declared type of a property.
#[derive(Debug, Clone, PartialEq)]
pub enum DeclaredType {
    /// Single value.
    Scalar(ScalarType),
    /// Multi-value profile property (`T[]`).
    List(ScalarType),
    /// Date parsed with a layout and timezone, sent as `$D_<epoch>`.
    Date(DateFormat),
}

/// Layout and timezone of a `date$<layout>$<tz>` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct DateFormat {
    layout: String,
    tz: DateZone,
}

#[derive(Debug, Clone, PartialEq)]
enum DateZone {
    Fixed(FixedOffset),
    Named(chrono_tz::Tz),
}

fn parse_scalar(name: &str) -> Option<ScalarType> {
    match name {
        "float" | "number" | "double" => Some(ScalarType::Float),
        "integer" | "int" => Some(ScalarType::Integer),
        "boolean" | "bool" => Some(ScalarType::Boolean),
        "string" => Some(ScalarType::String),
        _ => None,
    }
}

impl std::str::FromStr for DeclaredType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        if lower.starts_with("date") {
            return DateFormat::parse(s.trim()).map(DeclaredType::Date);
        }
        if let Some(element) = lower.strip_suffix("[]") {
            return parse_scalar(element)
                .map(DeclaredType::List)
                .ok_or_else(|| Error::Schema(format!("unknown list type '{s}'")));
        }
        parse_scalar(&lower)
            .map(DeclaredType::Scalar)
            .ok_or_else(|| Error::Schema(format!("unknown type '{s}'")))
    }
}

/// Go reference-layout tokens, longest first.
const GO_LAYOUT_TOKENS: &[(&str, &str)] = &[
    ("January", "%B"),
    ("Monday", "%A"),
    ("-07:00", "%:z"),
    ("-0700", "%z"),
    ("Z07:00", "%:z"),
    (".000000", "%.6f"),
    (".000", "%.3f"),
    ("2006", "%Y"),
    ("Jan", "%b"),
    ("Mon", "%a"),
    ("MST", "%Z"),
    ("_2", "%e"),
    ("01", "%m"),
    ("02", "%d"),
    ("03", "%I"),
    ("04", "%M"),
    ("05", "%S"),
    ("06", "%y"),
    ("15", "%H"),
    ("PM", "%p"),
];

/// Translates a Go reference layout into a `strftime` pattern.
fn go_layout_to_strftime(layout: &str) -> String {
    let mut out = String::with_capacity(layout.len() + 8);
    let mut rest = layout;
    'outer: while !rest.is_empty() {
        for (token, spec) in GO_LAYOUT_TOKENS {
            if let Some(tail) = rest.strip_prefix(token) {
                out.push_str(spec);
                rest = tail;
                continue 'outer;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            if c == '%' {
                out.push_str("%%");
            } else {
                out.push(c);
            }
        }
        rest = chars.as_str();
    }
    out
}

fn parse_zone(raw: &str) -> Result<DateZone> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("utc") || raw == "Z" {
        return Ok(DateZone::Fixed(Utc.fix()));
    }
    if raw.starts_with('+') || raw.starts_with('-') {
        let digits: String = raw[1..].chars().filter(char::is_ascii_digit).collect();
        if digits.len() == 4 {
            let hours: i32 = digits[..2].parse().unwrap_or(0);
            let minutes: i32 = digits[2..].parse().unwrap_or(0);
            let mut secs = hours * 3600 + minutes * 60;
            if raw.starts_with('-') {
                secs = -secs;
            }
            if let Some(offset) = FixedOffset::east_opt(secs) {
                return Ok(DateZone::Fixed(offset));
            }
        }
        return Err(Error::Schema(format!("invalid UTC offset '{raw}'")));
    }
    raw.parse::<chrono_tz::Tz>()
        .map(DateZone::Named)
        .map_err(|_| Error::Schema(format!("unknown timezone '{raw}'")))
}

/// Removes zone-name fields (`MST`, `%Z`) from a layout.
///
/// chrono cannot turn a zone abbreviation into an offset, so such layouts
/// are localized with the declared zone instead.
fn strip_zone_name(layout: &str) -> String {
    if !layout.contains("%Z") {
        return layout.to_string();
    }
    layout
        .split("%Z")
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

impl DateFormat {
    /// Parses `date$<layout>$<tz>`.
    ///
    /// # Errors
    ///
    /// Returns a schema error when the declaration is malformed.
    pub fn parse(declaration: &str) -> Result<Self> {
        let mut parts = declaration.splitn(3, '$');
        let _ = parts.next();
        let layout = parts
            .next()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| Error::Schema(format!("date type without layout: '{declaration}'")))?;
        let tz = parse_zone(parts.next().unwrap_or(""))?;
        let layout = if layout.contains('%') {
            layout.to_string()
        } else {
            go_layout_to_strftime(layout)
        };
        Ok(Self {
            layout: strip_zone_name(&layout),
            tz,
        })
    }

    fn layout_has_zone(&self) -> bool {
        self.layout.contains("%z") || self.layout.contains("%:z")
    }

    fn localize(&self, naive: NaiveDateTime) -> Option<i64> {
        match &self.tz {
            DateZone::Fixed(offset) => offset
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.timestamp()),
            DateZone::Named(tz) => tz
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.timestamp()),
        }
    }

    fn zone_suffix(&self) -> String {
        match &self.tz {
            DateZone::Fixed(offset) => offset.to_string().replace(':', ""),
            DateZone::Named(tz) => tz.name().to_string(),
        }
    }

    /// Parses `input` and returns epoch seconds.
    #[must_use]
    pub fn to_epoch(&self, input: &str) -> Option<i64> {
        let input = input.trim();
        if self.layout_has_zone() {
            // The layout carries the offset; the declared zone is appended to the value.
            let with_zone = format!("{input} {}", self.zone_suffix());
            return DateTime::parse_from_str(&with_zone, &self.layout)
                .or_else(|_| DateTime::parse_from_str(input, &self.layout))
                .ok()
                .map(|dt| dt.timestamp());
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, &self.layout) {
            return self.localize(naive);
        }
        NaiveDate::parse_from_str(input, &self.layout)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .and_then(|naive| self.localize(naive))
    }
}

/// Parses a boolean the permissive way schema files expect.
fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "t" | "true" => Some(true),
        "0" | "f" | "false" => Some(false),
        _ => None,
    }
}

/// Converts `value` to `ty`, or `None` when no conversion applies.
#[must_use]
pub fn coerce_scalar(ty: ScalarType, value: &Value) -> Option<Value> {
    match (ty, value) {
        (ScalarType::Float, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        (ScalarType::Integer, Value::String(s)) => {
            s.trim().parse::<i64>().ok().map(|n| Value::Number(n.into()))
        }
        (ScalarType::Integer, Value::Number(n)) if !n.is_i64() && !n.is_u64() => n
            .as_f64()
            .filter(|f| f.is_finite())
            .map(|f| Value::Number((f.trunc() as i64).into())),
        (ScalarType::Boolean, Value::String(s)) => parse_bool(s).map(Value::Bool),
        (ScalarType::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (ScalarType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
        _ => None,
    }
}

fn has_scalar_type(ty: ScalarType, value: &Value) -> bool {
    match (ty, value) {
        (ScalarType::Float, Value::Number(_)) => true,
        (ScalarType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
        (ScalarType::Boolean, Value::Bool(_)) => true,
        (ScalarType::String, Value::String(_)) => true,
        _ => false,
    }
}

impl DeclaredType {
    /// Applies this declaration to `value`.
    ///
    /// Values that do not convert are returned unchanged. List types wrap
    /// the value as `{"$add": [...]}` only when `allow_lists` is set
    /// (profile records); otherwise the element rule applies.
    #[must_use]
    pub fn coerce(&self, value: Value, allow_lists: bool) -> Value {
        match self {
            DeclaredType::Scalar(ty) => coerce_scalar(*ty, &value).unwrap_or(value),
            DeclaredType::Date(format) => match &value {
                Value::String(s) => format
                    .to_epoch(s)
                    .map(|epoch| Value::String(format!("$D_{epoch}")))
                    .unwrap_or(value),
                _ => value,
            },
            DeclaredType::List(ty) if allow_lists => {
                if let Value::Array(items) = value {
                    let items = items
                        .into_iter()
                        .map(|item| coerce_scalar(*ty, &item).unwrap_or(item))
                        .collect();
                    return serde_json::json!({ "$add": Value::Array(items) });
                }
                let element = coerce_scalar(*ty, &value).unwrap_or(value);
                if has_scalar_type(*ty, &element) {
                    serde_json::json!({ "$add": [element] })
                } else {
                    element
                }
            }
            DeclaredType::List(ty) => coerce_scalar(*ty, &value).unwrap_or(value),
        }
    }
}

/// Immutable property name to declared type table.
#[derive(Debug, Clone, Default)]
pub struct SchemaMap {
    types: HashMap<String, DeclaredType>,
}

impl SchemaMap {
    /// Loads a schema file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a JSON object
    /// of strings.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Schema(format!("Unable to read schema file '{}': {e}", path.display()))
        })?;
        Self::from_json_str(&content)
    }

    /// Parses schema JSON text.
    ///
    /// Entries with an unknown type are logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object of strings.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw: HashMap<String, String> = serde_json::from_str(content)
            .map_err(|e| Error::Schema(format!("Unable to parse schema file: {e}")))?;
        let mut types = HashMap::with_capacity(raw.len());
        for (name, declared) in raw {
            match declared.parse::<DeclaredType>() {
                Ok(ty) => {
                    types.insert(name, ty);
                }
                Err(e) => warn!(property = %name, "Ignoring schema entry: {}", e),
            }
        }
        Ok(Self { types })
    }

    /// Declared type of `property`, if any.
    #[must_use]
    pub fn get(&self, property: &str) -> Option<&DeclaredType> {
        self.types.get(property)
    }

    /// Number of declared properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether no property is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Coerces `value` using the declaration for `property`.
    #[must_use]
    pub fn coerce(&self, property: &str, value: Value, allow_lists: bool) -> Value {
        match self.types.get(property) {
            Some(ty) => ty.coerce(value, allow_lists),
            None => value,
        }
    }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
