//! Deterministic in-process backend for tests.

use super::client::{GenerationMode, TextGenerator};
use crate::error::LlmError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

type Responder = Box<dyn Fn(&str, GenerationMode) -> Result<String, LlmError> + Send + Sync>;

/// Answers every prompt through a closure and records what it was asked.
pub(crate) struct ScriptedGenerator {
    configured: bool,
    responder: Responder,
    prompts: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedGenerator {
    pub(crate) fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, GenerationMode) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            configured: true,
            responder: Box::new(responder),
            prompts: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Always answers with `reply`.
    pub(crate) fn fixed(reply: &str) -> Self {
        let reply = reply.to_string();
        Self::new(move |_, _| Ok(reply.clone()))
    }

    /// Reports itself unconfigured and fails every call.
    pub(crate) fn unconfigured() -> Self {
        let mut stub = Self::new(|_, _| Err(LlmError::NotConfigured));
        stub.configured = false;
        stub
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.prompts().len()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn generate(&self, prompt: &str, mode: GenerationMode) -> Result<String, LlmError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        // Let sibling workers interleave so concurrency bounds are observable.
        tokio::task::yield_now().await;
        let result = (self.responder)(prompt, mode);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
