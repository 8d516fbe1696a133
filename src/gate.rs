//! Admissibility checks around a rewrite
//!
//! Before a candidate reaches the backend it must mention its signal and
//! must not hedge. After the rewrite comes back it must still share enough
//! vocabulary with the source excerpt.

use crate::policy::GatePolicy;
use crate::signals::{Evidence, SignalKey};
use std::collections::HashSet;

/// Outcome of [`legal_semantic_gate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateVerdict {
    Admit,
    /// Blank candidate text.
    Empty,
    /// A negative indicator appears in the candidate.
    Hedged,
    /// Neither the candidate nor clean evidence names the signal.
    NoKeyword,
}

impl GateVerdict {
    pub fn admitted(self) -> bool {
        self == GateVerdict::Admit
    }
}

/// Lowercase, with every run of non-alphanumeric characters (including `_`)
/// collapsed to one space.
pub fn normalize_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_gap = false;
    for ch in s.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            in_gap = false;
        } else if !in_gap {
            out.push(' ');
            in_gap = true;
        }
    }
    out
}

pub fn tokens(s: &str) -> Vec<String> {
    normalize_text(s)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn contains_any(normalized: &str, phrases: &[String]) -> bool {
    phrases.iter().any(|phrase| {
        let needle = normalize_text(phrase);
        let needle = needle.trim();
        !needle.is_empty() && normalized.contains(needle)
    })
}

pub fn contains_any_keyword(text: &str, keywords: &[String]) -> bool {
    contains_any(&normalize_text(text), keywords)
}

pub fn contains_negative_indicator(text: &str, policy: &GatePolicy) -> bool {
    contains_any(&normalize_text(text), &policy.negative_indicators)
}

/// Decide whether `text` may be rewritten as a statement for `key`.
///
/// Hedged text is always rejected. Otherwise the text itself, or any
/// attached evidence quote that is not hedged, must contain one of the
/// signal's keywords.
pub fn legal_semantic_gate(
    key: SignalKey,
    text: &str,
    evidence: Option<&[Evidence]>,
    policy: &GatePolicy,
) -> GateVerdict {
    if text.trim().is_empty() {
        return GateVerdict::Empty;
    }
    if contains_negative_indicator(text, policy) {
        return GateVerdict::Hedged;
    }

    let keywords = policy.keywords_for(key);
    if contains_any_keyword(text, keywords) {
        return GateVerdict::Admit;
    }

    let evidence_admits = evidence.unwrap_or_default().iter().any(|e| {
        contains_any_keyword(&e.quote, keywords) && !contains_negative_indicator(&e.quote, policy)
    });
    if evidence_admits {
        GateVerdict::Admit
    } else {
        GateVerdict::NoKeyword
    }
}

/// Share of rewrite tokens found in the source, relative to the shorter side.
pub fn token_overlap(source: &str, rewritten: &str) -> f64 {
    let source_tokens = tokens(source);
    let rewrite_tokens = tokens(rewritten);
    if source_tokens.is_empty() || rewrite_tokens.is_empty() {
        return 0.0;
    }
    let source_set: HashSet<&str> = source_tokens.iter().map(String::as_str).collect();
    let common = rewrite_tokens
        .iter()
        .filter(|t| source_set.contains(t.as_str()))
        .count();
    common as f64 / source_tokens.len().min(rewrite_tokens.len()) as f64
}

/// Anti-hallucination check: the rewrite must reuse enough source vocabulary.
pub fn has_sufficient_overlap(source: &str, rewritten: &str, threshold: f64) -> bool {
    let source_empty = tokens(source).is_empty();
    let rewrite_empty = tokens(rewritten).is_empty();
    !source_empty && !rewrite_empty && token_overlap(source, rewritten) >= threshold
}
