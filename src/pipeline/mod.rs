//! End-to-end run: scan, optional model extraction, merge, gated rewrite.

use crate::config::Config;
use crate::error::{LlmError, PipelineError, Result};
use crate::extractor::{ExtractionResult, Extractor};
use crate::llm::client::{HttpTextGenerator, TextGenerator};
use crate::merge::merge;
use crate::rewriter::Rewriter;
use crate::scanner::scan;
use crate::signals::{EvidenceMap, FactReport, UploadedFile};
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;


pub struct Pipeline {
    config: Config,
    generator: Arc<dyn TextGenerator>,
}

impl Pipeline {
    pub fn new(config: Config, generator: Arc<dyn TextGenerator>) -> Self {
        Self { config, generator }
    }

    /// Validate `config` and talk to the HTTP backend it describes.
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let generator = HttpTextGenerator::new(config.backend.clone())?;
        Ok(Self::new(config, Arc::new(generator)))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Turn uploaded files into exactly six facts.
    pub async fn process(&self, files: &[UploadedFile]) -> Result<FactReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("annex_run", %run_id, files = files.len());
        self.run(files).instrument(span).await
    }

    async fn run(&self, files: &[UploadedFile]) -> Result<FactReport> {
        if files.is_empty() {
            return Err(PipelineError::NoFiles);
        }

        let heuristic = scan(files, &self.config.policy.scan);
        let extraction = self.extract(files).await?;

        let (signals, evidence) = match extraction {
            Some(ExtractionResult { signals, evidence }) => (merge(heuristic, &signals), Some(evidence)),
            None => (heuristic, None),
        };

        let rewriter = Rewriter::new(
            self.generator.clone(),
            self.config.policy.gate.clone(),
            self.config.require_llm,
        );
        let report = rewriter.rewrite(&signals, evidence.as_ref()).await?;
        let report = attach_extraction_evidence(report, evidence.as_ref());

        let accepted = report.accepted_count();
        info!(
            accepted,
            missing = report.facts.len() - accepted,
            "Annex signals processed"
        );
        Ok(report)
    }

    async fn extract(&self, files: &[UploadedFile]) -> Result<Option<ExtractionResult>> {
        if !self.config.enable_extraction {
            return Ok(None);
        }
        if !self.generator.is_configured() {
            if self.config.require_llm {
                return Err(LlmError::NotConfigured.into());
            }
            warn!("Model extraction enabled but no backend is configured; using heuristic scan only");
            return Ok(None);
        }

        let extractor = Extractor::new(
            self.generator.clone(),
            self.config.policy.extraction,
            self.config.require_llm,
        );
        Ok(extractor.extract(files).await?)
    }
}

/// Show the full extraction evidence for every signal that has any, so a
/// reviewer sees all supporting quotes and not only the accepted one.
fn attach_extraction_evidence(report: FactReport, evidence: Option<&EvidenceMap>) -> FactReport {
    let Some(evidence) = evidence else {
        return report;
    };
    let facts = report
        .facts
        .into_iter()
        .map(|mut fact| {
            if let Some(list) = evidence.get(fact.key) {
                fact.evidence = Some(list.to_vec());
            }
            fact
        })
        .collect();
    FactReport { facts }
}
