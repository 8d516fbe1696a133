//! Schema-constrained extraction
//!
//! One backend request per file, at most `concurrency` in flight. Workers
//! pull the next file index from a shared cursor so a slow file never holds
//! back the rest. Each reply is validated field by field; a bad field or a
//! bad reply only costs that field or that file.

use crate::error::LlmError;
use crate::llm::client::{GenerationMode, TextGenerator};
use crate::llm::parse::extract_json_object;
use crate::llm::prompts::extraction_prompt;
use crate::policy::ExtractionLimits;
use crate::signals::{
    clamp_chars, with_source_prefix, Evidence, EvidenceMap, SignalKey, SignalMap, UploadedFile,
    EXCERPT_SEPARATOR,
};
use futures::future::join_all;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const CLIP_MARKER: &str = "\n...TRUNCATED...";

/// Merged extraction output across all processed files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionResult {
    pub signals: SignalMap,
    pub evidence: EvidenceMap,
}

/// One validated signal entry from one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldExtraction {
    pub key: SignalKey,
    pub value: Option<String>,
    pub evidence: Vec<Evidence>,
}

pub struct Extractor {
    generator: Arc<dyn TextGenerator>,
    limits: ExtractionLimits,
    require_llm: bool,
}

impl Extractor {
    pub fn new(generator: Arc<dyn TextGenerator>, limits: ExtractionLimits, require_llm: bool) -> Self {
        Self {
            generator,
            limits,
            require_llm,
        }
    }

    /// Extract all six signals from every file (up to `max_files`).
    ///
    /// Returns `Ok(None)` only when `files` is empty. A file whose call fails
    /// is dropped unless `require_llm` is set, in which case the first
    /// failure (in file order) is returned once the pool has drained.
    pub async fn extract(&self, files: &[UploadedFile]) -> Result<Option<ExtractionResult>, LlmError> {
        if files.is_empty() {
            return Ok(None);
        }
        if !self.generator.is_configured() {
            return Err(LlmError::NotConfigured);
        }

        let used = &files[..files.len().min(self.limits.max_files)];
        if used.len() < files.len() {
            warn!(
                "Extracting from the first {} of {} files",
                used.len(),
                files.len()
            );
        }

        let cursor = AtomicUsize::new(0);
        let failed = AtomicBool::new(false);
        let worker_count = self.limits.concurrency.max(1).min(used.len());

        let workers = (0..worker_count).map(|_| {
            let (cursor, failed, this) = (&cursor, &failed, self);
            async move {
                let mut done = Vec::new();
                loop {
                    if this.require_llm && failed.load(Ordering::SeqCst) {
                        break;
                    }
                    let idx = cursor.fetch_add(1, Ordering::SeqCst);
                    let Some(file) = used.get(idx) else {
                        break;
                    };
                    let outcome = this.extract_file(file).await;
                    if outcome.is_err() {
                        failed.store(true, Ordering::SeqCst);
                    }
                    done.push((idx, outcome));
                }
                done
            }
        });

        let mut outcomes: Vec<_> = join_all(workers).await.into_iter().flatten().collect();
        outcomes.sort_by_key(|(idx, _)| *idx);

        let mut result = ExtractionResult::default();
        let mut first_error = None;
        for (idx, outcome) in outcomes {
            let file = &used[idx];
            match outcome {
                Ok(fields) => result = fold_fields(result, file.label(), fields),
                Err(err) => {
                    warn!(file = file.label(), "Extraction call failed: {}", err);
                    first_error.get_or_insert(err);
                }
            }
        }

        if self.require_llm {
            if let Some(err) = first_error {
                return Err(err);
            }
        }

        info!(
            files = used.len(),
            signals = result.signals.len(),
            "Model extraction complete"
        );
        Ok(Some(result))
    }

    async fn extract_file(&self, file: &UploadedFile) -> Result<Vec<FieldExtraction>, LlmError> {
        let label = file.label();
        let body = clamp_chars(
            &file.content.replace("\r\n", "\n"),
            self.limits.max_chars_per_file,
            CLIP_MARKER,
        );
        let reply = self
            .generator
            .generate(&extraction_prompt(label, &body), GenerationMode::Json)
            .await?;

        match extract_json_object(&reply) {
            Some(obj) => Ok(validate_fields(&obj)),
            None => {
                debug!(file = label, "Extraction reply had no parsable JSON object");
                Ok(Vec::new())
            }
        }
    }
}

/// Keep only schema-conformant entries: `value` is a string or null and
/// `evidence` is an array of `{filename, quote}` string pairs.
pub fn validate_fields(obj: &Map<String, Value>) -> Vec<FieldExtraction> {
    SignalKey::ALL
        .into_iter()
        .filter_map(|key| {
            let entry = obj.get(key.as_str())?.as_object()?;
            let value = match entry.get("value") {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Null) | None => None,
                Some(_) => return None,
            };
            let evidence = evidence_list(entry.get("evidence")?)?;
            Some(FieldExtraction {
                key,
                value,
                evidence,
            })
        })
        .collect()
}

fn evidence_list(value: &Value) -> Option<Vec<Evidence>> {
    value
        .as_array()?
        .iter()
        .map(|item| {
            let item = item.as_object()?;
            let filename = item.get("filename")?.as_str()?;
            let quote = item.get("quote")?.as_str()?;
            Some(Evidence::new(filename, quote))
        })
        .collect()
}

/// Fold one file's validated fields into the running result.
pub fn fold_fields(acc: ExtractionResult, label: &str, fields: Vec<FieldExtraction>) -> ExtractionResult {
    fields.into_iter().fold(acc, |acc, field| {
        let signals = match field.value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            Some(value) => {
                let note = with_source_prefix(label, value);
                match acc.signals.get(field.key) {
                    None => acc.signals.with(field.key, note),
                    Some(current) if current.contains(&note) => acc.signals,
                    Some(current) => {
                        let joined = format!("{}{}{}", current, EXCERPT_SEPARATOR, note);
                        acc.signals.with(field.key, joined)
                    }
                }
            }
            None => acc.signals,
        };

        let items = field.evidence.into_iter().map(|e| {
            if e.filename.is_empty() {
                Evidence::new(label, e.quote)
            } else {
                e
            }
        });
        let evidence = acc.evidence.with_appended(field.key, items);

        ExtractionResult { signals, evidence }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::stub::ScriptedGenerator;
    use serde_json::json;

    fn reply_for(key: &str, value: &str, file: &str, quote: &str) -> String {
        json!({
            key: {"value": value, "evidence": [{"filename": file, "quote": quote}]}
        })
        .to_string()
    }

    fn extractor(stub: Arc<ScriptedGenerator>, require_llm: bool) -> Extractor {
        Extractor::new(stub, ExtractionLimits::default(), require_llm)
    }

    #[test]
    fn test_validate_skips_fields_with_wrong_types() {
        let obj = json!({
            "model_type": {"value": "XGBoost", "evidence": [{"filename": "m.md", "quote": "XGBoost"}]},
            "data_sources": {"value": 42, "evidence": []},
            "runtime_environment": {"value": "Docker", "evidence": [{"filename": "d", "quote": 1}]},
            "evaluation_metrics": {"value": null, "evidence": []},
            "system_architecture": "flat string",
            "preprocessing_steps": {"value": "dedupe"}
        });
        let fields = validate_fields(obj.as_object().unwrap());
        let keys: Vec<_> = fields.iter().map(|f| f.key).collect();
        assert_eq!(keys, vec![SignalKey::ModelType, SignalKey::EvaluationMetrics]);
        assert_eq!(fields[0].value.as_deref(), Some("XGBoost"));
        assert_eq!(fields[1].value, None);
    }

    #[test]
    fn test_fold_appends_new_values_and_skips_repeats() {
        let field = |value: &str, quote: &str| FieldExtraction {
            key: SignalKey::RuntimeEnvironment,
            value: Some(value.to_string()),
            evidence: vec![Evidence::new("", quote)],
        };
        let acc = fold_fields(ExtractionResult::default(), "a.md", vec![field("Docker", "in Docker")]);
        let acc = fold_fields(acc, "a.md", vec![field("Docker", "in Docker")]);
        let acc = fold_fields(acc, "b.md", vec![field("Python 3.11", "Python 3.11")]);

        assert_eq!(
            acc.signals.get(SignalKey::RuntimeEnvironment),
            Some("From a.md: Docker\n\n---\n\nFrom b.md: Python 3.11")
        );
        assert_eq!(
            acc.evidence.get(SignalKey::RuntimeEnvironment).unwrap(),
            &[
                Evidence::new("a.md", "in Docker"),
                Evidence::new("b.md", "Python 3.11")
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_input_returns_none() {
        let stub = Arc::new(ScriptedGenerator::fixed("{}"));
        let result = extractor(stub.clone(), false).extract(&[]).await.unwrap();
        assert!(result.is_none());
        assert_eq!(stub.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unconfigured_backend_is_reported() {
        let stub = Arc::new(ScriptedGenerator::unconfigured());
        let err = extractor(stub, false)
            .extract(&[UploadedFile::new("a.md", "x")])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::NotConfigured));
    }

    #[tokio::test]
    async fn test_merges_results_in_file_order() {
        let stub = Arc::new(ScriptedGenerator::new(|prompt, mode| {
            assert_eq!(mode, GenerationMode::Json);
            let reply = if prompt.contains("FILE: first.md") {
                format!("Here you go:\n{}", reply_for("model_type", "CNN", "first.md", "a CNN"))
            } else {
                reply_for("model_type", "LSTM", "second.md", "an LSTM")
            };
            Ok(reply)
        }));
        let files = [
            UploadedFile::new("first.md", "a CNN"),
            UploadedFile::new("second.md", "an LSTM"),
        ];
        let result = extractor(stub, false).extract(&files).await.unwrap().unwrap();
        assert_eq!(
            result.signals.get(SignalKey::ModelType),
            Some("From first.md: CNN\n\n---\n\nFrom second.md: LSTM")
        );
        assert_eq!(result.evidence.get(SignalKey::ModelType).map(|e| e.len()), Some(2));
    }

    #[tokio::test]
    async fn test_malformed_reply_only_drops_that_file() {
        let stub = Arc::new(ScriptedGenerator::new(|prompt, _| {
            if prompt.contains("FILE: bad.md") {
                Ok("I could not find anything.".to_string())
            } else {
                Ok(reply_for("data_sources", "S3 bucket", "good.md", "s3://bucket"))
            }
        }));
        let files = [
            UploadedFile::new("bad.md", "?"),
            UploadedFile::new("good.md", "s3://bucket"),
        ];
        let result = extractor(stub, false).extract(&files).await.unwrap().unwrap();
        assert_eq!(
            result.signals.get(SignalKey::DataSources),
            Some("From good.md: S3 bucket")
        );
    }

    #[tokio::test]
    async fn test_call_failure_is_dropped_unless_required() {
        let responder = |prompt: &str, _: GenerationMode| {
            if prompt.contains("FILE: down.md") {
                Err(LlmError::Timeout(60))
            } else {
                Ok(reply_for("model_type", "BERT", "up.md", "BERT"))
            }
        };
        let files = [UploadedFile::new("down.md", "x"), UploadedFile::new("up.md", "BERT")];

        let lenient = extractor(Arc::new(ScriptedGenerator::new(responder)), false);
        let result = lenient.extract(&files).await.unwrap().unwrap();
        assert_eq!(result.signals.get(SignalKey::ModelType), Some("From up.md: BERT"));

        let strict = extractor(Arc::new(ScriptedGenerator::new(responder)), true);
        assert!(matches!(
            strict.extract(&files).await,
            Err(LlmError::Timeout(60))
        ));
    }

    #[tokio::test]
    async fn test_respects_file_cap_and_concurrency_bound() {
        let stub = Arc::new(ScriptedGenerator::fixed("{}"));
        let files: Vec<_> = (0..30)
            .map(|i| UploadedFile::new(format!("f{}.md", i), "text"))
            .collect();
        let result = extractor(stub.clone(), false).extract(&files).await.unwrap();
        assert!(result.is_some());
        assert_eq!(stub.call_count(), 20);
        assert!(stub.max_in_flight() <= 3);
        assert!(stub.max_in_flight() >= 2);
    }

    #[tokio::test]
    async fn test_label_prefers_relative_path_and_content_is_clipped() {
        let stub = Arc::new(ScriptedGenerator::fixed("{}"));
        let limits = ExtractionLimits {
            max_chars_per_file: 10,
            ..ExtractionLimits::default()
        };
        let file = UploadedFile::new("a.md", "0123456789ABCDEF").with_relative_path("docs/a.md");
        Extractor::new(stub.clone(), limits, false)
            .extract(&[file])
            .await
            .unwrap();
        let prompt = &stub.prompts()[0];
        assert!(prompt.contains("FILE: docs/a.md"));
        assert!(prompt.contains("0123456789\n...TRUNCATED..."));
        assert!(!prompt.contains("ABCDEF"));
    }
}
