use serde::{Deserialize, Serialize};

/// Markers the analyzer prints instead of an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sentinels {
    pub unknown_person: String,
    pub no_persons_found: String,
}

impl Default for Sentinels {
    fn default() -> Self {
        Self {
            unknown_person: "unknown_person".to_string(),
            no_persons_found: "no_persons_found".to_string(),
        }
    }
}

impl Sentinels {
    fn any_in(&self, text: &str) -> bool {
        [&self.unknown_person, &self.no_persons_found]
            .into_iter()
            .any(|sentinel| !sentinel.is_empty() && text.contains(sentinel.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Raw analyzer output naming at least one identity.
    Match(String),
    NoMatch,
}

impl Classification {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match(_))
    }

    /// Text sent on the result topic.
    pub fn published_text<'a>(&'a self, no_match_message: &'a str) -> &'a str {
        match self {
            Self::Match(raw) => raw,
            Self::NoMatch => no_match_message,
        }
    }
}

pub fn classify(raw: &str, sentinels: &Sentinels) -> Classification {
    if raw.trim().is_empty() || sentinels.any_in(raw) {
        return Classification::NoMatch;
    }
    Classification::Match(raw.to_string())
}

/// Strips the `<artifact>,` prefix from every line and drops trailing line
/// terminators. Applying it to its own output returns the same text.
pub fn normalize_response(raw: &str, prefix: &str) -> String {
    let lines: Vec<&str> = raw
        .split('\n')
        .map(|line| strip_prefix_repeatedly(line, prefix))
        .collect();
    lines.join("\n").trim_end_matches(['\r', '\n']).to_string()
}

/// True when every non-blank line carries the `<artifact>,` prefix.
pub fn is_well_formed(raw: &str, prefix: &str) -> bool {
    raw.lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .all(|line| line.starts_with(prefix))
}

/// Response persisted for a classified run.
pub fn recorded_response(
    classification: &Classification,
    prefix: &str,
    no_match_message: &str,
) -> String {
    match classification {
        Classification::NoMatch => no_match_message.to_string(),
        Classification::Match(raw) => {
            if !is_well_formed(raw, prefix) {
                tracing::warn!(
                    target: "pipeline",
                    prefix = prefix,
                    output = raw.as_str(),
                    "analysis_output_malformed"
                );
            }
            normalize_response(raw, prefix)
        }
    }
}

fn strip_prefix_repeatedly<'a>(mut line: &'a str, prefix: &str) -> &'a str {
    if prefix.is_empty() {
        return line;
    }
    while let Some(rest) = line.strip_prefix(prefix) {
        line = rest;
    }
    line
}
