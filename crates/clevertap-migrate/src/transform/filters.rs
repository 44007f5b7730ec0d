//! Event name and geographic filters.

use std::collections::HashSet;

use crate::config::EventFilterConfig;

/// Lowercase country codes of the EU, the EEA, the UK and Switzerland.
pub const EUROPE_CODES: [&str; 33] = [
    "at", "be", "bg", "hr", "cy", "cz", "dk", "ee", "fi", "fr", "de", "gr", "hu", "ie", "it", "lv",
    "lt", "lu", "mt", "nl", "pl", "pt", "ro", "sk", "si", "es", "se", "is", "li", "no", "gb", "uk",
    "ch",
];

/// Whether `country` is a European country code (case-insensitive).
#[must_use]
pub fn is_europe(country: &str) -> bool {
    let code = country.trim().to_lowercase();
    EUROPE_CODES.contains(&code.as_str())
}

/// Allow or deny list applied to source event names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    allow: bool,
    names: HashSet<String>,
}

impl EventFilter {
    /// Builds the filter from its configuration.
    #[must_use]
    pub fn from_config(config: &EventFilterConfig) -> Self {
        let (allow, names) = match config {
            EventFilterConfig::Allow(names) => (true, names),
            EventFilterConfig::Deny(names) => (false, names),
        };
        Self {
            allow,
            names: names.iter().map(|n| n.trim().to_string()).collect(),
        }
    }

    /// Whether an event named `name` is imported.
    #[must_use]
    pub fn allows(&self, name: &str) -> bool {
        self.names.contains(name) == self.allow
    }
}
