//! Test support: an in-memory completion backend driven by a closure.
//!
//! `ScriptedBackend` records every request it sees so tests can assert which
//! models were tried and how many calls a stage made.

use crate::error::CompletionError;
use crate::llm::{CompletionBackend, CompletionPool, CompletionRequest, PoolSettings};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

type Script = dyn Fn(&str, &str) -> Result<String, CompletionError> + Send + Sync;

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

pub struct ScriptedBackend {
    script: Box<Script>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedBackend {
    /// `script(model, prompt)` decides each answer.
    pub fn new(script: impl Fn(&str, &str) -> Result<String, CompletionError> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with `text`.
    pub fn replying(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_, _| Ok(text.clone()))
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn models_called(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.model).collect()
    }

    pub fn last_params(&self) -> Option<(f64, u32)> {
        self.calls().last().map(|c| (c.temperature, c.max_tokens))
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, CompletionError> {
        self.calls.lock().unwrap().push(RecordedCall {
            model: request.model.to_string(),
            prompt: request.prompt.to_string(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        });
        (self.script)(request.model, request.prompt)
    }
}

pub fn rate_limited(model: &str) -> CompletionError {
    CompletionError::RateLimited {
        model: model.to_string(),
        message: "429 Too Many Requests".to_string(),
    }
}

/// Single-model pool over `backend` with no rotation pause.
pub fn pool_over(backend: Arc<ScriptedBackend>) -> Arc<CompletionPool> {
    let settings = PoolSettings {
        models: vec!["test-model".to_string()],
        rotation_pause_ms: 0,
        ..PoolSettings::default()
    };
    Arc::new(CompletionPool::new(backend, &settings).unwrap())
}
