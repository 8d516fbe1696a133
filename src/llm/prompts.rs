// ═══════════════════════════════════════════════════════════════════════════════
// SHARED BUILDING BLOCKS
// ═══════════════════════════════════════════════════════════════════════════════

use crate::signals::Evidence;

/// Schema the extractor asks the backend to fill, one object per signal.
const EXTRACTION_SCHEMA: &str = r#"Return JSON only, matching this schema exactly (no extra keys):

{
  "system_architecture": {"value": string|null, "evidence": [{"filename": string, "quote": string}]},
  "data_sources": {"value": string|null, "evidence": [{"filename": string, "quote": string}]},
  "preprocessing_steps": {"value": string|null, "evidence": [{"filename": string, "quote": string}]},
  "model_type": {"value": string|null, "evidence": [{"filename": string, "quote": string}]},
  "evaluation_metrics": {"value": string|null, "evidence": [{"filename": string, "quote": string}]},
  "runtime_environment": {"value": string|null, "evidence": [{"filename": string, "quote": string}]}
}"#;

const EXTRACTION_RULES: &str = r#"Task:
- Extract ONLY information explicitly stated in the provided file.
- Do NOT add, infer, guess, or improve any information.
- If a field is not explicitly stated, set its value to null and evidence to an empty array.
- Evidence quotes MUST be verbatim snippets from the provided file.
- Keep values concise. Preserve numbers, versions, regions, and names exactly."#;

// ═══════════════════════════════════════════════════════════════════════════════
// PROMPTS
// ═══════════════════════════════════════════════════════════════════════════════

pub const EXTRACTION_PREAMBLE: &str = "You are an information extraction system.";

pub const REWRITE_PREAMBLE: &str = "You are a regulatory writing assistant for the EU AI Act.";

/// Per-file extraction prompt. `body` is already clipped.
pub fn extraction_prompt(label: &str, body: &str) -> String {
    format!(
        "{}\n\n{}\n\n{}\n\nFILE: {}\n\"\"\"\n{}\n\"\"\"",
        EXTRACTION_PREAMBLE, EXTRACTION_RULES, EXTRACTION_SCHEMA, label, body
    )
}

/// Two-part rewrite prompt for a single gated excerpt.
pub fn rewrite_prompt(excerpt: &str, evidence: Option<&[Evidence]>) -> String {
    let mut prompt = format!(
        r#"{}

Task: Read the provided excerpt and produce TWO labeled parts exactly as shown:
ANALYSIS: (1-3 short sentences: list explicit facts found, any missing details, and confidence high/medium/low).
REWRITTEN: (a single concise paragraph, regulator-facing EU AI Act tone, preserving only facts explicitly stated in the excerpt; do NOT infer or invent).

If you cannot confidently produce a rewritten EU-AI-Act-style sentence that is strictly supported by the excerpt, output "REWRITTEN: NULL".

Excerpt:
"""
{}
"""
"#,
        REWRITE_PREAMBLE, excerpt
    );

    if let Some(evidence) = evidence.filter(|e| !e.is_empty()) {
        prompt.push_str("\nEvidence quotes:\n");
        for item in evidence {
            prompt.push_str(&format!("- {}: {}\n", item.filename, item.quote));
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_prompt_embeds_label_schema_and_body() {
        let prompt = extraction_prompt("docs/arch.md", "We deploy on Kubernetes.");
        assert!(prompt.contains("FILE: docs/arch.md"));
        assert!(prompt.contains("\"runtime_environment\""));
        assert!(prompt.contains("We deploy on Kubernetes."));
        assert!(prompt.contains("verbatim"));
    }

    #[test]
    fn test_rewrite_prompt_lists_evidence_only_when_present() {
        let bare = rewrite_prompt("Uses XGBoost.", None);
        assert!(bare.contains("REWRITTEN: NULL"));
        assert!(!bare.contains("Evidence quotes"));

        let evidence = [Evidence::new("model.md", "Uses XGBoost.")];
        let with_evidence = rewrite_prompt("Uses XGBoost.", Some(&evidence));
        assert!(with_evidence.contains("Evidence quotes:\n- model.md: Uses XGBoost."));
    }
}
