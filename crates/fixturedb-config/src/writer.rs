//! Renders [`Settings`] into the engine's option-file syntax.
//!
//! The output is a pure function of the settings: tunables are visited in
//! [`TUNABLES`] order, overrides in sorted order, and nothing else (clock,
//! environment, hash seeds) influences the text.

use std::fmt::Write as _;

use crate::Settings;
use crate::overrides::{SERVER_SECTION, normalise_key};
use crate::tunables::{TUNABLES, Tunable, TunableKind, TunableValue};

/// One `key` or `key = value` line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    key: String,
    value: Option<String>,
}

#[derive(Debug, Default)]
struct Section {
    name: String,
    entries: Vec<Entry>,
}

impl Section {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            entries: Vec::new(),
        }
    }

    fn push(&mut self, key: &str, value: Option<String>) {
        self.entries.push(Entry {
            key: key.to_owned(),
            value,
        });
    }

    /// Replaces an entry with the same normalised key in place, or appends.
    fn upsert(&mut self, key: &str, value: Option<String>) {
        let wanted = normalise_key(key);
        match self
            .entries
            .iter_mut()
            .find(|entry| normalise_key(&entry.key) == wanted)
        {
            Some(entry) => {
                key.clone_into(&mut entry.key);
                entry.value = value;
            }
            None => self.push(key, value),
        }
    }
}

/// Produces config file text from settings.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigWriter;

impl ConfigWriter {
    /// Builds a writer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Renders the runtime config: every declared tunable followed by the
    /// free-form overrides, which win on key collisions.
    #[must_use]
    pub fn render(&self, settings: &Settings) -> String {
        let mut server = Section::named(SERVER_SECTION);
        for tunable in TUNABLES {
            apply_tunable(&mut server, tunable, tunable.value(&settings.engine));
        }

        let mut sections = vec![server];
        for name in settings.overrides.section_names() {
            let index = match sections.iter().position(|section| section.name == name) {
                Some(index) => index,
                None => {
                    sections.push(Section::named(name));
                    sections.len() - 1
                }
            };
            if let Some(section) = sections.get_mut(index) {
                for (key, value) in settings.overrides.section(name) {
                    section.upsert(key, value.map(str::to_owned));
                }
            }
        }
        write_sections(&sections)
    }

    /// Renders the minimal config used only by the first-time initialisation
    /// subcommand. Only tunables that must agree between initialisation and
    /// runtime are included; overrides are not applied.
    #[must_use]
    pub fn render_initialisation(&self, settings: &Settings) -> String {
        let mut server = Section::named(SERVER_SECTION);
        for tunable in TUNABLES.iter().filter(|tunable| tunable.at_initialisation) {
            apply_tunable(&mut server, tunable, tunable.value(&settings.engine));
        }
        write_sections(&[server])
    }
}

fn apply_tunable(section: &mut Section, tunable: &Tunable, value: TunableValue) {
    match (tunable.kind, value) {
        (TunableKind::Bare { .. }, TunableValue::Flag(true)) => section.push(tunable.key, None),
        (TunableKind::Bare { when_false }, TunableValue::Flag(false)) => {
            if let Some(negated) = when_false {
                section.push(negated, None);
            }
        }
        (TunableKind::Switch, TunableValue::Flag(flag)) => {
            section.push(tunable.key, Some(if flag { "1" } else { "0" }.to_owned()));
        }
        (_, TunableValue::Text(text)) => section.push(tunable.key, Some(text)),
        (_, TunableValue::Unset) if tunable.omit_if_unset => {}
        (_, TunableValue::Unset) => section.push(tunable.key, Some("\"\"".to_owned())),
        (TunableKind::Value, TunableValue::Flag(flag)) => {
            section.push(tunable.key, Some(flag.to_string()));
        }
    }
}

fn write_sections(sections: &[Section]) -> String {
    let mut output = String::new();
    for (index, section) in sections.iter().enumerate() {
        if index > 0 {
            output.push('\n');
        }
        // Writing into a String cannot fail.
        let _ = writeln!(output, "[{}]", section.name);
        for entry in &section.entries {
            let _ = match &entry.value {
                Some(value) => writeln!(output, "{} = {}", entry.key, value),
                None => writeln!(output, "{}", entry.key),
            };
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::EngineSettings;

    #[fixture]
    fn settings() -> Settings {
        Settings::default()
    }

    fn lines(text: &str) -> Vec<&str> {
        text.lines().collect()
    }

    #[rstest]
    fn render_is_deterministic(settings: Settings) {
        let writer = ConfigWriter::new();
        assert_eq!(writer.render(&settings), writer.render(&settings.clone()));
    }

    #[rstest]
    fn starts_with_server_section(settings: Settings) {
        let text = ConfigWriter::new().render(&settings);
        assert_eq!(lines(&text).first(), Some(&"[mysqld]"));
    }

    #[rstest]
    #[case(true, Some("skip-name-resolve"))]
    #[case(false, None)]
    fn bare_flag_renders_without_value(
        mut settings: Settings,
        #[case] enabled: bool,
        #[case] expected: Option<&str>,
    ) {
        settings.engine.skip_name_resolve = enabled;
        let text = ConfigWriter::new().render(&settings);
        let found = lines(&text)
            .into_iter()
            .find(|line| line.starts_with("skip-name-resolve"));
        assert_eq!(found, expected);
    }

    #[rstest]
    #[case(true, "log-bin")]
    #[case(false, "skip-log-bin")]
    fn bare_flag_may_render_a_negated_key(
        mut settings: Settings,
        #[case] enabled: bool,
        #[case] expected: &str,
    ) {
        settings.engine.log_bin = enabled;
        let text = ConfigWriter::new().render(&settings);
        assert!(lines(&text).contains(&expected), "missing {expected} in:\n{text}");
    }

    #[rstest]
    fn unset_values_are_omitted_when_flagged(mut settings: Settings) {
        settings.engine.max_connections = None;
        let text = ConfigWriter::new().render(&settings);
        assert!(!text.contains("max-connections"));
    }

    #[rstest]
    fn unset_values_render_empty_when_not_omittable(mut settings: Settings) {
        settings.engine.sql_mode = None;
        let text = ConfigWriter::new().render(&settings);
        assert!(lines(&text).contains(&"sql-mode = \"\""));
    }

    #[rstest]
    fn switches_render_as_digits(mut settings: Settings) {
        settings.engine.general_log = true;
        let text = ConfigWriter::new().render(&settings);
        assert!(lines(&text).contains(&"general-log = 1"));
        assert!(lines(&text).contains(&"slow-query-log = 0"));
    }

    #[rstest]
    fn overrides_win_and_keep_position(mut settings: Settings) {
        settings
            .overrides
            .set(SERVER_SECTION, "character_set_server", "latin1")
            .set(SERVER_SECTION, "wait-timeout", "30");
        let text = ConfigWriter::new().render(&settings);
        let rendered = lines(&text);
        assert!(rendered.contains(&"character_set_server = latin1"));
        assert!(!rendered.contains(&"character-set-server = utf8mb4"));
        assert_eq!(rendered.last(), Some(&"wait-timeout = 30"));
        let replaced = rendered
            .iter()
            .position(|line| line.starts_with("character_set_server"))
            .expect("override should be rendered");
        let bind = rendered
            .iter()
            .position(|line| line.starts_with("bind-address"))
            .expect("bind-address should be rendered");
        assert!(bind < replaced);
    }

    #[rstest]
    fn extra_sections_follow_the_server_section(mut settings: Settings) {
        settings
            .overrides
            .set("client", "default-character-set", "utf8mb4")
            .set_bare("client", "no-beep");
        let text = ConfigWriter::new().render(&settings);
        assert!(text.ends_with("\n[client]\ndefault-character-set = utf8mb4\nno-beep\n"));
    }

    #[test]
    fn initialisation_config_is_minimal() {
        let settings = Settings {
            engine: EngineSettings {
                lower_case_table_names: Some(1),
                ..EngineSettings::default()
            },
            ..Settings::default()
        };
        let text = ConfigWriter::new().render_initialisation(&settings);
        assert!(text.contains("lower-case-table-names = 1"));
        assert!(text.contains("skip-log-bin"));
        assert!(!text.contains("bind-address"));
        assert!(!text.contains("log-error"));
    }
}
