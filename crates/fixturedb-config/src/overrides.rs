use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Section the engine reads its server settings from.
pub const SERVER_SECTION: &str = "mysqld";

/// Free-form config entries layered over the declared tunables.
///
/// Entries are grouped by section and kept sorted, so rendering is stable
/// regardless of insertion order. A `None` value renders as a bare key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigOverrides {
    sections: BTreeMap<String, BTreeMap<String, Option<String>>>,
}

impl ConfigOverrides {
    /// Builds an empty override map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key = value` in `section`, replacing any earlier override.
    pub fn set(
        &mut self,
        section: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.insert(section.into(), key.into(), Some(value.into()))
    }

    /// Sets a bare `key` in `section`.
    pub fn set_bare(&mut self, section: impl Into<String>, key: impl Into<String>) -> &mut Self {
        self.insert(section.into(), key.into(), None)
    }

    fn insert(&mut self, section: String, key: String, value: Option<String>) -> &mut Self {
        self.sections
            .entry(section)
            .or_default()
            .insert(key, value);
        self
    }

    /// Entries for one section, sorted by key.
    pub fn section(&self, name: &str) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.sections
            .get(name)
            .into_iter()
            .flat_map(|entries| entries.iter())
            .map(|(key, value)| (key.as_str(), value.as_deref()))
    }

    /// Names of all sections with overrides, sorted.
    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Whether no override has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.values().all(BTreeMap::is_empty)
    }
}

/// Canonical form of a config key: the engine treats `-` and `_` alike.
#[must_use]
pub fn normalise_key(key: &str) -> String {
    key.trim().replace('_', "-").to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_override_replaces_earlier() {
        let mut overrides = ConfigOverrides::new();
        overrides
            .set(SERVER_SECTION, "max-connections", "10")
            .set(SERVER_SECTION, "max-connections", "20");
        let entries: Vec<_> = overrides.section(SERVER_SECTION).collect();
        assert_eq!(entries, vec![("max-connections", Some("20"))]);
    }

    #[test]
    fn missing_section_yields_nothing() {
        let overrides = ConfigOverrides::new();
        assert_eq!(overrides.section("client").count(), 0);
        assert!(overrides.is_empty());
    }

    #[test]
    fn normalises_underscores_and_case() {
        assert_eq!(normalise_key(" Max_Connections "), "max-connections");
    }
}
