//! Tunable policy for scanning, extraction and gating
//!
//! Every word list and threshold lives here with its default so deployments
//! can override them from the config file instead of patching constants.

use crate::signals::SignalKey;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Default clamp for scanner excerpts (characters).
pub const DEFAULT_EXCERPT_MAX_CHARS: usize = 1200;
/// Default minimum rewrite/source token overlap.
pub const DEFAULT_OVERLAP_THRESHOLD: f64 = 0.2;

pub const DEFAULT_MAX_FILES: usize = 20;
pub const DEFAULT_MAX_CHARS_PER_FILE: usize = 4500;
pub const DEFAULT_EXTRACTION_CONCURRENCY: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    pub scan: ScanPolicy,
    pub gate: GatePolicy,
    pub extraction: ExtractionLimits,
}

/// Keywords the heuristic scanner looks for, per signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanPolicy {
    /// Per-signal overrides; signals left out keep their default list.
    #[serde(deserialize_with = "scan_keywords")]
    pub keywords: BTreeMap<SignalKey, Vec<String>>,
    pub excerpt_max_chars: usize,
}

impl ScanPolicy {
    pub fn keywords_for(&self, key: SignalKey) -> &[String] {
        self.keywords.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            keywords: keyword_table(&[
                (
                    SignalKey::SystemArchitecture,
                    &["system architecture", "architecture", "system-architecture", "system design"],
                ),
                (
                    SignalKey::DataSources,
                    &["data sources", "data source", "datasets", "dataset", "input data", "data inputs"],
                ),
                (
                    SignalKey::PreprocessingSteps,
                    &[
                        "preprocessing",
                        "pre-processing",
                        "data cleaning",
                        "feature engineering",
                        "preprocessing steps",
                    ],
                ),
                (
                    SignalKey::ModelType,
                    &[
                        "model type",
                        "model",
                        "architecture",
                        "neural network",
                        "transformer",
                        "xgboost",
                        "random forest",
                        "logistic regression",
                    ],
                ),
                (
                    SignalKey::EvaluationMetrics,
                    &[
                        "evaluation",
                        "metrics",
                        "evaluation metrics",
                        "performance metrics",
                        "accuracy",
                        "f1",
                        "auc",
                        "precision",
                        "recall",
                    ],
                ),
                (
                    SignalKey::RuntimeEnvironment,
                    &[
                        "runtime",
                        "environment",
                        "docker",
                        "kubernetes",
                        "python version",
                        "node version",
                        "runtime environment",
                    ],
                ),
            ]),
            excerpt_max_chars: DEFAULT_EXCERPT_MAX_CHARS,
        }
    }
}

/// Admissibility rules applied before and after a rewrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatePolicy {
    /// A candidate must contain one of its signal's keywords (or carry
    /// evidence that does). Signals left out keep their default list.
    #[serde(deserialize_with = "gate_keywords")]
    pub keywords: BTreeMap<SignalKey, Vec<String>>,
    /// Hedging phrases; any hit blocks the candidate.
    pub negative_indicators: Vec<String>,
    /// Minimum `common / min(source, rewrite)` token ratio.
    pub overlap_threshold: f64,
}

impl GatePolicy {
    pub fn keywords_for(&self, key: SignalKey) -> &[String] {
        self.keywords.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            keywords: keyword_table(&[
                (
                    SignalKey::SystemArchitecture,
                    &[
                        "architecture",
                        "microservice",
                        "docker",
                        "kubernetes",
                        "cluster",
                        "vm",
                        "server",
                        "instance",
                        "load balancer",
                        "service mesh",
                    ],
                ),
                (
                    SignalKey::DataSources,
                    &[
                        "dataset",
                        "datasets",
                        "csv",
                        "s3",
                        "bucket",
                        "database",
                        "db",
                        "data source",
                        "data sources",
                        "input data",
                        "table",
                    ],
                ),
                (
                    SignalKey::PreprocessingSteps,
                    &[
                        "preprocess",
                        "pre-processing",
                        "preprocessing",
                        "data cleaning",
                        "feature engineering",
                        "tokeniz",
                        "normaliz",
                        "scal",
                        "imput",
                    ],
                ),
                (
                    SignalKey::ModelType,
                    &[
                        "transformer",
                        "bert",
                        "gpt",
                        "xgboost",
                        "random forest",
                        "logistic regression",
                        "cnn",
                        "rnn",
                        "lstm",
                        "model type",
                        "model architecture",
                    ],
                ),
                (
                    SignalKey::EvaluationMetrics,
                    &[
                        "accuracy",
                        "precision",
                        "recall",
                        "f1",
                        "auc",
                        "roc",
                        "mse",
                        "mean squared",
                        "rmse",
                        "evaluation",
                        "metrics",
                        "performance",
                    ],
                ),
                (
                    SignalKey::RuntimeEnvironment,
                    &[
                        "docker",
                        "kubernetes",
                        "k8s",
                        "python",
                        "node",
                        "runtime",
                        "gpu",
                        "cuda",
                        "cpu",
                        "ubuntu",
                        "centos",
                    ],
                ),
            ]),
            negative_indicators: [
                "may",
                "might",
                "could",
                "possible",
                "plan to",
                "planned",
                "in the future",
                "to be decided",
                "tbd",
                "under development",
                "prototype",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            overlap_threshold: DEFAULT_OVERLAP_THRESHOLD,
        }
    }
}

/// Bounds on the per-file extraction fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionLimits {
    pub max_files: usize,
    pub max_chars_per_file: usize,
    pub concurrency: usize,
}

impl Default for ExtractionLimits {
    fn default() -> Self {
        Self {
            max_files: DEFAULT_MAX_FILES,
            max_chars_per_file: DEFAULT_MAX_CHARS_PER_FILE,
            concurrency: DEFAULT_EXTRACTION_CONCURRENCY,
        }
    }
}

fn scan_keywords<'de, D>(deserializer: D) -> Result<BTreeMap<SignalKey, Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = BTreeMap::deserialize(deserializer)?;
    Ok(with_default_keywords(overrides, ScanPolicy::default().keywords))
}

fn gate_keywords<'de, D>(deserializer: D) -> Result<BTreeMap<SignalKey, Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = BTreeMap::deserialize(deserializer)?;
    Ok(with_default_keywords(overrides, GatePolicy::default().keywords))
}

fn with_default_keywords(
    overrides: BTreeMap<SignalKey, Vec<String>>,
    defaults: BTreeMap<SignalKey, Vec<String>>,
) -> BTreeMap<SignalKey, Vec<String>> {
    defaults.into_iter().chain(overrides).collect()
}

fn keyword_table(rows: &[(SignalKey, &[&str])]) -> BTreeMap<SignalKey, Vec<String>> {
    rows.iter()
        .map(|(key, words)| (*key, words.iter().map(|w| w.to_string()).collect()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_signal() {
        let policy = Policy::default();
        for key in SignalKey::ALL {
            assert!(!policy.scan.keywords_for(key).is_empty(), "scan {}", key);
            assert!(!policy.gate.keywords_for(key).is_empty(), "gate {}", key);
        }
        assert_eq!(policy.gate.overlap_threshold, 0.2);
        assert_eq!(policy.extraction.concurrency, 3);
    }

    #[test]
    fn test_partial_toml_overrides_keep_other_defaults() {
        let policy: Policy = toml::from_str(
            r#"
            [gate]
            overlap_threshold = 0.35

            [extraction]
            concurrency = 5
            "#,
        )
        .unwrap();
        assert_eq!(policy.gate.overlap_threshold, 0.35);
        assert!(policy.gate.negative_indicators.contains(&"tbd".to_string()));
        assert_eq!(policy.extraction.concurrency, 5);
        assert_eq!(policy.extraction.max_files, DEFAULT_MAX_FILES);
        assert_eq!(policy.scan.excerpt_max_chars, DEFAULT_EXCERPT_MAX_CHARS);
    }

    #[test]
    fn test_keyword_tables_deserialize_by_signal_name() {
        let scan: ScanPolicy = toml::from_str(
            r#"
            [keywords]
            model_type = ["classifier"]
            "#,
        )
        .unwrap();
        assert_eq!(scan.keywords_for(SignalKey::ModelType), ["classifier".to_string()]);
        assert_eq!(
            scan.keywords_for(SignalKey::DataSources),
            ScanPolicy::default().keywords_for(SignalKey::DataSources)
        );
    }

    #[test]
    fn test_gate_keyword_override_keeps_other_signals() {
        let policy: Policy = toml::from_str(
            r#"
            [gate.keywords]
            runtime_environment = ["jvm"]
            "#,
        )
        .unwrap();
        let defaults = GatePolicy::default();
        assert_eq!(policy.gate.keywords_for(SignalKey::RuntimeEnvironment), ["jvm".to_string()]);
        for key in SignalKey::ALL.into_iter().filter(|k| *k != SignalKey::RuntimeEnvironment) {
            assert_eq!(policy.gate.keywords_for(key), defaults.keywords_for(key), "{}", key);
        }
        assert_eq!(policy.scan, ScanPolicy::default());
    }
}
