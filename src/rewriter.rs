//! Evidence gate and rewriter
//!
//! Signals are handled one at a time in fixed key order. For each signal the
//! candidates are tried in order (evidence quotes, then scanner excerpts)
//! and the first one that clears the gate, gets a usable rewrite and passes
//! the overlap check becomes the fact. An excerpt accepted for one signal is
//! never reused by a later one.

use crate::error::{LlmError, PipelineError};
use crate::gate::{has_sufficient_overlap, legal_semantic_gate, normalize_text};
use crate::llm::client::{GenerationMode, TextGenerator};
use crate::llm::parse::parse_rewrite_reply;
use crate::llm::prompts::rewrite_prompt;
use crate::policy::GatePolicy;
use crate::signals::{
    split_excerpts, strip_source_prefix, Evidence, EvidenceMap, Fact, FactReport, FactSource,
    SignalKey, SignalMap,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// One excerpt that may become a fact.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    /// Text used for gating, prompting and the overlap check.
    text: String,
    /// Text reported as `raw_value` if accepted.
    raw_value: String,
    evidence: Option<Vec<Evidence>>,
}

fn candidates_for(key: SignalKey, signals: &SignalMap, evidence: Option<&EvidenceMap>) -> Vec<Candidate> {
    let from_evidence = evidence
        .and_then(|map| map.get(key))
        .unwrap_or_default()
        .iter()
        .filter(|e| !e.quote.trim().is_empty())
        .map(|e| Candidate {
            text: e.quote.trim().to_string(),
            raw_value: e.quote.trim().to_string(),
            evidence: Some(vec![e.clone()]),
        });

    let from_excerpts = split_excerpts(signals.get(key).unwrap_or_default())
        .filter(|part| !strip_source_prefix(part).is_empty())
        .map(|part| Candidate {
            text: strip_source_prefix(part).to_string(),
            raw_value: part.to_string(),
            evidence: None,
        });

    from_evidence.chain(from_excerpts).collect()
}

enum Attempt {
    Accepted(Fact),
    Rejected,
    /// No backend; nothing further can be rewritten for this signal.
    Stop,
}

pub struct Rewriter {
    generator: Arc<dyn TextGenerator>,
    policy: GatePolicy,
    require_llm: bool,
}

impl Rewriter {
    pub fn new(generator: Arc<dyn TextGenerator>, policy: GatePolicy, require_llm: bool) -> Self {
        Self {
            generator,
            policy,
            require_llm,
        }
    }

    /// Produce exactly one fact per signal key, in key order.
    pub async fn rewrite(
        &self,
        signals: &SignalMap,
        evidence: Option<&EvidenceMap>,
    ) -> Result<FactReport, PipelineError> {
        let mut used: HashSet<String> = HashSet::new();
        let mut facts = Vec::with_capacity(SignalKey::ALL.len());

        for key in SignalKey::ALL {
            let fact = self.rewrite_signal(key, signals, evidence, &mut used).await?;
            facts.push(fact);
        }

        Ok(FactReport { facts })
    }

    async fn rewrite_signal(
        &self,
        key: SignalKey,
        signals: &SignalMap,
        evidence: Option<&EvidenceMap>,
        used: &mut HashSet<String>,
    ) -> Result<Fact, LlmError> {
        for candidate in candidates_for(key, signals, evidence) {
            let normalized = normalize_text(&candidate.text).trim().to_string();
            if used.contains(&normalized) {
                debug!(signal = %key, "Skipping excerpt already used by another signal");
                continue;
            }

            match self.attempt(key, candidate).await? {
                Attempt::Accepted(fact) => {
                    used.insert(normalized);
                    return Ok(fact);
                }
                Attempt::Rejected => continue,
                Attempt::Stop => break,
            }
        }

        let raw = signals.value(key).map(str::to_string);
        let signal_evidence = evidence.and_then(|m| m.get(key)).map(<[Evidence]>::to_vec);
        Ok(Fact::missing(key, raw, signal_evidence))
    }

    async fn attempt(&self, key: SignalKey, candidate: Candidate) -> Result<Attempt, LlmError> {
        let verdict = legal_semantic_gate(key, &candidate.text, candidate.evidence.as_deref(), &self.policy);
        if !verdict.admitted() {
            debug!(signal = %key, ?verdict, "Candidate rejected by gate");
            return Ok(Attempt::Rejected);
        }

        if !self.generator.is_configured() {
            debug!(signal = %key, "Backend not configured, leaving signal missing");
            return Ok(Attempt::Stop);
        }

        let prompt = rewrite_prompt(&candidate.text, candidate.evidence.as_deref());
        let reply = match self.generator.generate(&prompt, GenerationMode::Text).await {
            Ok(reply) => reply,
            Err(err) if self.require_llm => return Err(err),
            Err(err) => {
                debug!(signal = %key, "Rewrite call failed: {}", err);
                return Ok(Attempt::Rejected);
            }
        };

        let parsed = parse_rewrite_reply(&reply);
        let Some(rewritten) = parsed.rewritten else {
            debug!(signal = %key, "Backend declined to rewrite candidate");
            return Ok(Attempt::Rejected);
        };

        if !has_sufficient_overlap(&candidate.text, &rewritten, self.policy.overlap_threshold) {
            debug!(signal = %key, "Rewrite drifted from its source excerpt");
            return Ok(Attempt::Rejected);
        }

        Ok(Attempt::Accepted(Fact {
            key,
            value: Some(rewritten),
            raw_value: Some(candidate.raw_value),
            source: FactSource::Ai,
            evidence: candidate.evidence,
            analysis: parsed.analysis,
        }))
    }
}
