//! Env-file codec
//!
//! Line-oriented KEY=value format with an exact quoting rule: a value is
//! double-quoted iff it contains a space, `=` or `#`. Key order is
//! preserved across parse/serialize; `#` lines are comments.

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;

#[derive(Debug, Clone, Default)]
pub struct EnvFile {
    vars: IndexMap<String, String>,
}

impl EnvFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(content: &str) -> Self {
        let mut vars = IndexMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                vars.insert(key.trim().to_string(), unquote(value).to_string());
            }
        }
        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|v| v.as_str())
    }

    /// Existing keys keep their position; new keys append.
    pub fn set(&mut self, key: &str, value: &str) {
        self.vars.insert(key.to_string(), value.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn vars(&self) -> &IndexMap<String, String> {
        &self.vars
    }

    /// Canonical serialization: version header, generation timestamp, blank
    /// line, then one KEY=value line per variable.
    pub fn render(&self, generated_at: DateTime<Utc>) -> String {
        let mut out = String::new();
        out.push_str("# CodeB v5.0 - Auto-generated ENV\n");
        out.push_str(&format!(
            "# Generated: {}\n",
            generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
        out.push('\n');
        for (key, value) in &self.vars {
            if needs_quoting(value) {
                out.push_str(&format!("{}=\"{}\"\n", key, value));
            } else {
                out.push_str(&format!("{}={}\n", key, value));
            }
        }
        out
    }
}

fn needs_quoting(value: &str) -> bool {
    value.contains(' ') || value.contains('=') || value.contains('#')
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}
