use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failures talking to the text-generation backend.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Text-generation backend is not configured. Set LLM_API_KEY (or OPENAI_API_KEY) and LLM_ENDPOINT.")]
    NotConfigured,

    #[error("Backend request timed out after {0}s")]
    Timeout(u64),

    #[error("Could not reach backend: {0}")]
    Transport(String),

    #[error("Backend error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Backend returned an empty response")]
    EmptyResponse,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("No files were provided")]
    NoFiles,

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
