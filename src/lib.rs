//! Evidence-gated extraction of Annex IV technical-documentation signals
//!
//! Uploaded project files are scanned for six signals (architecture, data
//! sources, preprocessing, model type, evaluation metrics, runtime). A
//! text-generation backend optionally extracts the same signals with
//! verbatim evidence, and then rewrites each admissible excerpt into a
//! regulator-facing statement. Rewrites that drift from their source are
//! dropped and the signal is reported as missing.

pub mod config;
pub mod error;
pub mod extractor;
pub mod gate;
pub mod llm;
pub mod merge;
pub mod pipeline;
pub mod policy;
pub mod rewriter;
pub mod scanner;
pub mod signals;

pub use config::Config;
pub use error::{LlmError, PipelineError};
pub use pipeline::Pipeline;
pub use signals::{Evidence, Fact, FactReport, FactSource, SignalKey, UploadedFile};
