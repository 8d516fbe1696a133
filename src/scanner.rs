//! Heuristic signal scanner
//!
//! Format-aware, model-free pass over the uploaded files:
//! - JSON: keys matching a signal keyword, at any depth
//! - CSV: header row as a data-source listing
//! - YAML: `keyword: value` lines
//! - Free text: Markdown sections or paragraphs mentioning a keyword, with a
//!   `label: value` fallback
//!
//! CSV and YAML files also get the free-text pass; a JSON file only falls
//! back to it when it does not parse.

use crate::policy::ScanPolicy;
use crate::signals::{normalize_excerpt, with_source_prefix, SignalKey, SignalMap, UploadedFile};
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;

/// File format, decided by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Json,
    Csv,
    Yaml,
    Text,
}

impl FileKind {
    pub fn detect(file: &UploadedFile) -> Self {
        match file.extension().as_str() {
            "json" => FileKind::Json,
            "csv" => FileKind::Csv,
            "yaml" | "yml" => FileKind::Yaml,
            _ => FileKind::Text,
        }
    }
}

/// Per-signal excerpts, deduplicated, in discovery order.
#[derive(Debug, Default)]
struct Excerpts(BTreeMap<SignalKey, Vec<String>>);

impl Excerpts {
    fn push(&mut self, key: SignalKey, source: &str, excerpt: &str) {
        if excerpt.trim().is_empty() {
            return;
        }
        let note = with_source_prefix(source, excerpt);
        let list = self.0.entry(key).or_default();
        if !list.contains(&note) {
            list.push(note);
        }
    }
}

/// Scan every file and aggregate excerpts per signal.
pub fn scan(files: &[UploadedFile], policy: &ScanPolicy) -> SignalMap {
    let mut excerpts = Excerpts::default();
    for file in files {
        scan_file(file, policy, &mut excerpts);
    }
    let map = SignalMap::from_excerpts(excerpts.0);
    debug!(signals = map.len(), files = files.len(), "Heuristic scan complete");
    map
}

fn scan_file(file: &UploadedFile, policy: &ScanPolicy, out: &mut Excerpts) {
    let name = file.display_name();
    let content = file.content.as_str();
    let max = policy.excerpt_max_chars;

    match FileKind::detect(file) {
        FileKind::Json => match serde_json::from_str::<Value>(content) {
            Ok(root) => {
                for key in SignalKey::ALL {
                    for found in search_json(&root, policy.keywords_for(key)) {
                        out.push(key, name, &normalize_excerpt(&found, max));
                    }
                }
                return;
            }
            Err(err) => {
                debug!(file = name, "JSON did not parse ({}), scanning as text", err);
            }
        },
        FileKind::Csv => {
            if let Some(columns) = csv_header_excerpt(content) {
                out.push(SignalKey::DataSources, name, &normalize_excerpt(&columns, max));
            }
        }
        FileKind::Yaml => {
            for key in SignalKey::ALL {
                for value in yaml_values(content, policy.keywords_for(key)) {
                    out.push(key, name, &normalize_excerpt(&value, max));
                }
            }
        }
        FileKind::Text => {}
    }

    scan_text(content, name, policy, out);
}

/// Walk a JSON value; every object key containing a keyword yields
/// `"<key>: <value>"`. Matching values are still descended into.
pub fn search_json(value: &Value, keywords: &[String]) -> Vec<String> {
    let mut results = Vec::new();
    walk_json(value, keywords, &mut results);
    results
}

fn walk_json(value: &Value, keywords: &[String], results: &mut Vec<String>) {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {}
        Value::Array(items) => {
            for item in items {
                walk_json(item, keywords, results);
            }
        }
        Value::Object(map) => {
            for (k, v) in map {
                let lower = k.to_lowercase();
                if keywords.iter().any(|p| lower.contains(&p.to_lowercase())) {
                    results.push(format!("{}: {}", k, render_json_value(v)));
                }
                walk_json(v, keywords, results);
            }
        }
    }
}

fn render_json_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn csv_header_excerpt(content: &str) -> Option<String> {
    let header = content.lines().next()?.trim();
    if header.is_empty() {
        return None;
    }
    let columns: Vec<&str> = header
        .split(',')
        .map(|c| c.trim().trim_matches('"'))
        .filter(|c| !c.is_empty())
        .collect();
    if columns.is_empty() {
        None
    } else {
        Some(format!("columns: {}", columns.join(", ")))
    }
}

fn case_insensitive(pattern: &str) -> Option<Regex> {
    RegexBuilder::new(pattern).case_insensitive(true).build().ok()
}

fn yaml_values(content: &str, keywords: &[String]) -> Vec<String> {
    let mut values = Vec::new();
    for keyword in keywords {
        let pattern = format!(r"^\s*{}\s*:\s*(.+)$", regex::escape(keyword));
        let Some(re) = case_insensitive(&pattern) else {
            continue;
        };
        for line in content.lines() {
            if let Some(value) = re.captures(line).and_then(|c| c.get(1)) {
                values.push(value.as_str().to_string());
            }
        }
    }
    values
}

fn heading_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^#{1,6} .*$").expect("heading regex is valid"))
}

/// Markdown sections when the text has headings, otherwise paragraphs.
pub fn split_blocks(content: &str) -> Vec<String> {
    let content = content.replace("\r\n", "\n");
    let headings: Vec<_> = heading_regex().find_iter(&content).collect();

    if headings.is_empty() {
        return content
            .split("\n\n")
            .flat_map(split_on_blank_lines)
            .collect();
    }

    let mut blocks = Vec::with_capacity(headings.len() + 1);
    let preamble = content[..headings[0].start()].trim();
    if !preamble.is_empty() {
        blocks.push(preamble.to_string());
    }
    for (i, heading) in headings.iter().enumerate() {
        let body_end = headings
            .get(i + 1)
            .map(|next| next.start())
            .unwrap_or(content.len());
        let body = content[heading.end()..body_end].trim();
        blocks.push(format!("{}\n{}", heading.as_str().trim(), body).trim().to_string());
    }
    blocks
}

// "\n  \n" also separates paragraphs.
fn split_on_blank_lines(chunk: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = Vec::new();
    for line in chunk.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push(current.join("\n"));
    }
    out.into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn scan_text(content: &str, name: &str, policy: &ScanPolicy, out: &mut Excerpts) {
    let blocks = split_blocks(content);
    let max = policy.excerpt_max_chars;

    for key in SignalKey::ALL {
        let keywords = policy.keywords_for(key);
        let matched = blocks.iter().find(|block| {
            let lower = block.to_lowercase();
            keywords.iter().any(|p| lower.contains(&p.to_lowercase()))
        });

        match matched {
            Some(block) => out.push(key, name, &normalize_excerpt(block, max)),
            None => {
                if let Some(value) = labeled_value(content, keywords) {
                    out.push(key, name, &normalize_excerpt(&value, max));
                }
            }
        }
    }
}

/// First `label: value` or `label - value` line for any keyword.
fn labeled_value(content: &str, keywords: &[String]) -> Option<String> {
    keywords.iter().find_map(|keyword| {
        let pattern = format!(r"(?:^|\n)\s*{}\s*[:\-]\s*(.+)", regex::escape(keyword));
        let re = case_insensitive(&pattern)?;
        re.captures(content)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|v| !v.is_empty())
    })
}
