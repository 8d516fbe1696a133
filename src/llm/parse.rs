use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Strip markdown code fences from a response
pub(crate) fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(without_open) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (```json) on the opening line.
    let body = match without_open.find('\n') {
        Some(idx) => &without_open[idx + 1..],
        None => without_open,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Slice between the first `{` and the last `}`, inclusive.
pub(crate) fn json_object_slice(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if start < end {
        Some(&text[start..=end])
    } else {
        None
    }
}

/// Parse the JSON object embedded in a backend response, tolerating prose
/// and code fences around it. Anything that is not an object is rejected.
pub fn extract_json_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    let slice = json_object_slice(strip_markdown_fences(text))?;
    match serde_json::from_str::<Value>(slice).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Parsed answer to the rewrite prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteReply {
    pub analysis: Option<String>,
    /// `None` when the backend declined (`NULL`) or produced nothing usable.
    pub rewritten: Option<String>,
}

fn labeled_reply_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)ANALYSIS:\s*(.*?)\r?\nREWRITTEN:\s*(.*)$")
            .expect("labeled reply regex is valid")
    })
}

fn rewritten_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)(?:^|\n)\s*REWRITTEN:\s*(.*)$").expect("rewritten line regex is valid")
    })
}

/// Parse `ANALYSIS:` / `REWRITTEN:` lines, falling back to a JSON object
/// with `analysis` and `rewritten` fields, and finally to the whole reply.
pub fn parse_rewrite_reply(reply: &str) -> RewriteReply {
    let text = reply.trim();

    if let Some(caps) = labeled_reply_regex().captures(text) {
        let analysis = caps.get(1).map(|m| m.as_str().trim().to_string());
        let rewritten = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        return RewriteReply {
            analysis: analysis.filter(|a| !a.is_empty()),
            rewritten: usable_rewrite(rewritten),
        };
    }

    // REWRITTEN without a preceding ANALYSIS line.
    if let Some(caps) = rewritten_line_regex().captures(text) {
        let rewritten = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        return RewriteReply {
            analysis: None,
            rewritten: usable_rewrite(rewritten),
        };
    }

    if let Some(obj) = extract_json_object(text) {
        let analysis = obj.get("analysis").and_then(value_as_text);
        let rewritten = obj
            .get("rewritten")
            .and_then(value_as_text)
            .and_then(|r| usable_rewrite(&r));
        return RewriteReply { analysis, rewritten };
    }

    RewriteReply {
        analysis: None,
        rewritten: usable_rewrite(text),
    }
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        other => Some(other.to_string()),
    }
}

fn usable_rewrite(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(trimmed.to_string())
    }
}
