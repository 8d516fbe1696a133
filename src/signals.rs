//! Core data model shared by every pipeline stage
//!
//! The six signal keys are a closed set. Scanner, extractor, merge and
//! rewriter all speak in terms of [`SignalKey`] so no stage can invent a new
//! field.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Separator placed between per-source excerpts inside one aggregated blob.
pub const EXCERPT_SEPARATOR: &str = "\n\n---\n\n";

/// Marker appended to excerpts cut at the clamp length.
pub const TRUNCATION_MARKER: &str = " ...[truncated]";

/// One of the six compliance signals tracked per run.
///
/// Declaration order is the fixed output order; `Ord` follows it so
/// `BTreeMap<SignalKey, _>` iterates in that order too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKey {
    SystemArchitecture,
    DataSources,
    PreprocessingSteps,
    ModelType,
    EvaluationMetrics,
    RuntimeEnvironment,
}

impl SignalKey {
    pub const ALL: [SignalKey; 6] = [
        SignalKey::SystemArchitecture,
        SignalKey::DataSources,
        SignalKey::PreprocessingSteps,
        SignalKey::ModelType,
        SignalKey::EvaluationMetrics,
        SignalKey::RuntimeEnvironment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKey::SystemArchitecture => "system_architecture",
            SignalKey::DataSources => "data_sources",
            SignalKey::PreprocessingSteps => "preprocessing_steps",
            SignalKey::ModelType => "model_type",
            SignalKey::EvaluationMetrics => "evaluation_metrics",
            SignalKey::RuntimeEnvironment => "runtime_environment",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.as_str() == name)
    }
}

impl fmt::Display for SignalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw text content of one submitted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    #[serde(default)]
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
    #[serde(default)]
    pub content: String,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            relative_path: None,
            content: content.into(),
        }
    }

    pub fn with_relative_path(mut self, path: impl Into<String>) -> Self {
        self.relative_path = Some(path.into());
        self
    }

    /// Name used by the scanner: filename first, then relative path.
    pub fn display_name(&self) -> &str {
        non_blank(&self.filename)
            .or_else(|| self.relative_path.as_deref().and_then(non_blank))
            .unwrap_or("unknown")
    }

    /// Label used by the extractor: relative path first, then filename.
    pub fn label(&self) -> &str {
        self.relative_path
            .as_deref()
            .and_then(non_blank)
            .or_else(|| non_blank(&self.filename))
            .unwrap_or("unknown")
    }

    /// Lowercased extension of the display name, empty when there is none.
    pub fn extension(&self) -> String {
        let name = self.display_name();
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() || name.starts_with('.') => {
                ext.to_ascii_lowercase()
            }
            _ => String::new(),
        }
    }
}

fn non_blank(s: &str) -> Option<&str> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

/// A claimed verbatim quote from a specific file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Evidence {
    pub filename: String,
    pub quote: String,
}

impl Evidence {
    pub fn new(filename: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            quote: quote.into(),
        }
    }
}

/// Signal key to aggregated excerpt blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMap(BTreeMap<SignalKey, String>);

impl SignalMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: SignalKey) -> Option<&str> {
        self.0.get(&key).map(String::as_str)
    }

    /// Non-blank value for `key`, if any.
    pub fn value(&self, key: SignalKey) -> Option<&str> {
        self.get(key).filter(|v| !v.trim().is_empty())
    }

    /// Return a new map with `key` set to `value`.
    pub fn with(mut self, key: SignalKey, value: impl Into<String>) -> Self {
        self.0.insert(key, value.into());
        self
    }

    /// Build a map from per-signal excerpt lists, dropping empty lists.
    pub fn from_excerpts(excerpts: BTreeMap<SignalKey, Vec<String>>) -> Self {
        excerpts
            .into_iter()
            .filter(|(_, parts)| !parts.is_empty())
            .map(|(key, parts)| (key, parts.join(EXCERPT_SEPARATOR)))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SignalKey, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(SignalKey, String)> for SignalMap {
    fn from_iter<I: IntoIterator<Item = (SignalKey, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Signal key to evidence list, in file-processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceMap(BTreeMap<SignalKey, Vec<Evidence>>);

impl EvidenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: SignalKey) -> Option<&[Evidence]> {
        self.0
            .get(&key)
            .map(Vec::as_slice)
            .filter(|list| !list.is_empty())
    }

    /// Return a new map with `items` appended to `key`, skipping any
    /// `(filename, quote)` pair already recorded for that key.
    pub fn with_appended(mut self, key: SignalKey, items: impl IntoIterator<Item = Evidence>) -> Self {
        let list = self.0.entry(key).or_default();
        for item in items {
            if !list.contains(&item) {
                list.push(item);
            }
        }
        if list.is_empty() {
            self.0.remove(&key);
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (SignalKey, &[Evidence])> {
        self.0.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Where a fact's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactSource {
    /// Rewritten by the backend from a gated excerpt.
    Ai,
    /// Entered by a person downstream; never produced by the pipeline.
    Original,
    /// No admissible candidate.
    Missing,
}

/// Final output unit, exactly one per signal key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    pub key: SignalKey,
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_value: Option<String>,
    pub source: FactSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Vec<Evidence>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
}

impl Fact {
    pub fn missing(key: SignalKey, raw_value: Option<String>, evidence: Option<Vec<Evidence>>) -> Self {
        Self {
            key,
            value: None,
            raw_value,
            source: FactSource::Missing,
            evidence,
            analysis: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.source == FactSource::Ai && self.value.is_some()
    }
}

/// Pipeline output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactReport {
    pub facts: Vec<Fact>,
}

impl FactReport {
    pub fn get(&self, key: SignalKey) -> Option<&Fact> {
        self.facts.iter().find(|f| f.key == key)
    }

    pub fn accepted_count(&self) -> usize {
        self.facts.iter().filter(|f| f.is_accepted()).count()
    }
}

/// Normalize line endings and blank runs, then clamp to `max_chars`.
pub fn normalize_excerpt(s: &str, max_chars: usize) -> String {
    let unix = s.replace("\r\n", "\n");
    let mut out = String::with_capacity(unix.len());
    let mut newline_run = 0usize;
    for ch in unix.trim().chars() {
        if ch == '\n' {
            newline_run += 1;
            if newline_run > 2 {
                continue;
            }
        } else {
            newline_run = 0;
        }
        out.push(ch);
    }
    clamp_chars(&out, max_chars, TRUNCATION_MARKER)
}

/// Cut `s` to `max_chars` characters, appending `marker` when cut.
pub fn clamp_chars(s: &str, max_chars: usize, marker: &str) -> String {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{}", &s[..byte_idx], marker),
        None => s.to_string(),
    }
}

/// `From <label>: <excerpt>`
pub fn with_source_prefix(label: &str, excerpt: &str) -> String {
    format!("From {}: {}", label, excerpt)
}

/// Drop a leading `From <label>: ` prefix, returning the bare excerpt.
pub fn strip_source_prefix(part: &str) -> &str {
    let trimmed = part.trim();
    if let Some(rest) = trimmed.strip_prefix("From ") {
        if let Some(idx) = rest.find(": ") {
            return rest[idx + 2..].trim();
        }
    }
    trimmed
}

/// Split an aggregated blob back into its non-empty parts.
pub fn split_excerpts(blob: &str) -> impl Iterator<Item = &str> {
    blob.split(EXCERPT_SEPARATOR)
        .map(str::trim)
        .filter(|p| !p.is_empty())
}
