use crate::types::source::TaskSource;
use serde::{Deserialize, Serialize};
use std::fmt;

const SEPARATOR: &str = "::";

/// Canonical `(source, originalId)` key.
///
/// `%` and `:` are percent-escaped in the source component, so the first `::`
/// always separates the two parts and distinct pairs never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskKey(String);

impl TaskKey {
    pub fn new(source: &TaskSource, original_id: &str) -> Self {
        let escaped = escape_source(source.display_name());
        Self(format!("{escaped}{SEPARATOR}{original_id}"))
    }

    /// Placeholder key for a record whose identity cannot be resolved. Never contains `::`.
    pub(crate) fn unresolved(slot: usize) -> Self {
        Self(format!("#unresolved:{slot}"))
    }

    pub fn parse(value: &str) -> Option<(TaskSource, String)> {
        let (source, original_id) = value.split_once(SEPARATOR)?;
        let source = unescape_source(source)?;
        Some((TaskSource::parse(&source), original_id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key text with every non-alphanumeric character replaced by `-`, for synthesized ids.
    pub fn sanitized(&self) -> String {
        sanitize(&self.0)
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub(crate) fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '-' })
        .collect()
}

fn escape_source(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn unescape_source(value: &str) -> Option<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3)?;
        match code {
            "25" => out.push('%'),
            "3A" => out.push(':'),
            _ => return None,
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Some(out)
}
