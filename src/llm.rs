//! LLM completion pool with rate-limit driven model rotation.
//!
//! The pool owns an ordered model catalog and a shared cursor. Each
//! [`CompletionPool::call`] starts at the cursor and, whenever the current
//! model reports a rate limit, moves the cursor one step (wrapping) and tries
//! the next model it has not tried yet. The walk is bounded by the catalog
//! size: once every model has been rate limited the last error is returned.
//! Any other failure is returned immediately and leaves the cursor alone.
//!
//! Bookkeeping lives behind a `std::sync::Mutex` that is only held for
//! counter updates, never across the network call, so workers for different
//! providers can have requests in flight at the same time.
//!
//! The transport is abstracted behind [`CompletionBackend`]; production uses
//! [`ChatCompletionsClient`], an OpenAI-compatible `/chat/completions`
//! client (Groq by default).

use crate::error::{CompletionError, ConfigError};
use crate::utils::{now_millis, truncate_for_log};
use async_trait::async_trait;
use rand::{Rng, rng};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Models tried in order; earlier entries are cheaper and faster.
pub const DEFAULT_MODELS: [&str; 8] = [
    "llama-3.1-8b-instant",
    "meta-llama/llama-4-maverick-17b-128e-instruct",
    "llama-3.3-70b-versatile",
    "groq/compound",
    "groq/compound-mini",
    "allam-2-7b",
    "moonshotai/kimi-k2-instruct",
    "openai/gpt-oss-20b",
];

/// Pool and transport settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PoolSettings {
    pub base_url: String,
    pub models: Vec<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub enable_model_rotation: bool,
    /// Pause before retrying on the next model.
    pub rotation_pause_ms: u64,
    pub timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            models: DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
            temperature: 0.1,
            max_tokens: 1024,
            enable_model_rotation: true,
            rotation_pause_ms: 1000,
            timeout_secs: 60,
        }
    }
}

/// One prompt addressed to one model.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Something that can answer a single prompt with a single model.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, CompletionError>;
}

/// OpenAI-compatible chat completions over HTTP.
pub struct ChatCompletionsClient {
    http: Client,
    endpoint: String,
    api_key: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl ChatCompletionsClient {
    pub fn new(settings: &PoolSettings, api_key: impl Into<String>) -> Result<Self, ConfigError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl CompletionBackend for ChatCompletionsClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, CompletionError> {
        let body = ChatRequest {
            model: request.model,
            messages: vec![ChatMessage {
                role: "user",
                content: request.prompt,
            }],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let message = response.text().await.unwrap_or_default();
            return Err(CompletionError::RateLimited {
                model: request.model.to_string(),
                message: truncate_for_log(&message, 300),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Api {
                model: request.model.to_string(),
                status,
                body: truncate_for_log(&body, 500),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| CompletionError::Malformed(format!("empty completion from {}", request.model)))
    }
}

/// Text returned by the pool and the model that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub model: String,
}

#[derive(Debug, Default)]
struct RotationState {
    cursor: usize,
    total_api_calls: u64,
    successes: HashMap<String, u64>,
    failures: HashMap<String, u64>,
    last_used_ms: HashMap<String, i64>,
}

/// Snapshot of the pool counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    /// Every request issued, successful or not.
    pub total_api_calls: u64,
    pub current_model: String,
    pub successes: HashMap<String, u64>,
    pub failures: HashMap<String, u64>,
    /// Epoch millis of each model's last successful answer.
    pub last_used_ms: HashMap<String, i64>,
    pub rotation_enabled: bool,
    pub models: Vec<String>,
}

pub struct CompletionPool {
    backend: Arc<dyn CompletionBackend>,
    models: Vec<String>,
    temperature: f64,
    max_tokens: u32,
    rotation_enabled: bool,
    rotation_pause: Duration,
    state: Mutex<RotationState>,
}

impl CompletionPool {
    pub fn new(backend: Arc<dyn CompletionBackend>, settings: &PoolSettings) -> Result<Self, CompletionError> {
        let models: Vec<String> = settings
            .models
            .iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if models.is_empty() {
            return Err(CompletionError::NoModels);
        }
        info!(
            models = models.len(),
            first = %models[0],
            rotation = settings.enable_model_rotation,
            "Completion pool ready"
        );
        Ok(Self {
            backend,
            models,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            rotation_enabled: settings.enable_model_rotation,
            rotation_pause: Duration::from_millis(settings.rotation_pause_ms),
            state: Mutex::new(RotationState::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, RotationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send `prompt`, rotating models on rate limits.
    ///
    /// Starts at the shared cursor. Each rate-limited answer moves the cursor
    /// one model forward and retries there, at most once per model.
    ///
    /// # Arguments
    ///
    /// * `prompt` - Sent as a single user message
    /// * `temperature` - `None` uses the pool default
    /// * `max_tokens` - `None` uses the pool default
    ///
    /// # Returns
    ///
    /// The first successful [`Completion`]. When every model is rate limited
    /// the last [`CompletionError::RateLimited`] is returned; any other error
    /// is returned at once without rotating.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let out = pool.call("Summarize: ...", Some(0.05), Some(256)).await?;
    /// info!(model = %out.model, "answered");
    /// ```
    #[instrument(level = "debug", skip_all, fields(prompt_len = prompt.len()))]
    pub async fn call(
        &self,
        prompt: &str,
        temperature: Option<f64>,
        max_tokens: Option<u32>,
    ) -> Result<Completion, CompletionError> {
        let temperature = temperature.unwrap_or(self.temperature);
        let max_tokens = max_tokens.unwrap_or(self.max_tokens);
        let budget = if self.rotation_enabled { self.models.len() } else { 1 };

        let mut tried = vec![false; self.models.len()];
        let mut idx = self.lock().cursor;
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            tried[idx] = true;
            let model = self.models[idx].as_str();
            self.lock().total_api_calls += 1;
            debug!(%model, attempt, "Calling model");

            let outcome = self
                .backend
                .complete(CompletionRequest {
                    model,
                    prompt,
                    temperature,
                    max_tokens,
                })
                .await;

            match outcome {
                Ok(text) => {
                    let mut state = self.lock();
                    *state.successes.entry(model.to_string()).or_default() += 1;
                    state.last_used_ms.insert(model.to_string(), now_millis());
                    drop(state);
                    debug!(%model, bytes = text.len(), "Completion succeeded");
                    return Ok(Completion {
                        text,
                        model: model.to_string(),
                    });
                }
                Err(e) => {
                    *self.lock().failures.entry(model.to_string()).or_default() += 1;

                    if !e.is_rate_limit() {
                        error!(%model, error = %e, "Completion failed");
                        return Err(e);
                    }
                    if attempt >= budget {
                        error!(%model, attempt, error = %e, "Every model is rate limited");
                        return Err(e);
                    }

                    idx = self.rotate_from(idx, &tried);
                    warn!(
                        limited = %model,
                        next = %self.models[idx],
                        error = %truncate_for_log(&e.to_string(), 100),
                        "Rate limited; rotating model"
                    );
                    if !self.rotation_pause.is_zero() {
                        let jitter = rng().random_range(0..=250);
                        sleep(self.rotation_pause + Duration::from_millis(jitter)).await;
                    }
                }
            }
        }
    }

    /// Move the shared cursor past `used` and pick the next untried model.
    ///
    /// The cursor only moves if it still points at `used`; another worker
    /// may already have rotated it.
    fn rotate_from(&self, used: usize, tried: &[bool]) -> usize {
        let n = self.models.len();
        let mut state = self.lock();
        if state.cursor == used {
            state.cursor = (used + 1) % n;
        }
        let start = state.cursor;
        (0..n)
            .map(|offset| (start + offset) % n)
            .find(|i| !tried[*i])
            .unwrap_or(start)
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            total_api_calls: state.total_api_calls,
            current_model: self.models[state.cursor].clone(),
            successes: state.successes.clone(),
            failures: state.failures.clone(),
            last_used_ms: state.last_used_ms.clone(),
            rotation_enabled: self.rotation_enabled,
            models: self.models.clone(),
        }
    }

    /// Zero the counters. The cursor keeps pointing at the current model.
    pub fn reset_stats(&self) {
        let mut state = self.lock();
        state.total_api_calls = 0;
        state.successes.clear();
        state.failures.clear();
        state.last_used_ms.clear();
        info!("Completion pool statistics reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedBackend, rate_limited};
    use wiremock::matchers::{bearer_token, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(models: &[&str]) -> PoolSettings {
        PoolSettings {
            models: models.iter().map(|m| m.to_string()).collect(),
            rotation_pause_ms: 0,
            ..PoolSettings::default()
        }
    }

    #[tokio::test]
    async fn test_rotates_until_a_model_answers() {
        let backend = Arc::new(ScriptedBackend::new(|model, _| match model {
            "c" => Ok("from c".into()),
            other => Err(rate_limited(other)),
        }));
        let pool = CompletionPool::new(backend.clone(), &settings(&["a", "b", "c"])).unwrap();

        let out = pool.call("hello", None, None).await.unwrap();
        assert_eq!(out.model, "c");
        assert_eq!(out.text, "from c");
        assert_eq!(backend.models_called(), vec!["a", "b", "c"]);

        let stats = pool.stats();
        assert_eq!(stats.total_api_calls, 3);
        assert_eq!(stats.current_model, "c");
        assert_eq!(stats.failures.get("a"), Some(&1));
        assert_eq!(stats.successes.get("c"), Some(&1));
        assert!(stats.last_used_ms.contains_key("c"));
        assert!(!stats.last_used_ms.contains_key("a"));
    }

    #[tokio::test]
    async fn test_all_rate_limited_returns_last_error() {
        let backend = Arc::new(ScriptedBackend::new(|model, _| Err(rate_limited(model))));
        let pool = CompletionPool::new(backend.clone(), &settings(&["a", "b", "c"])).unwrap();

        let err = pool.call("hello", None, None).await.unwrap_err();
        match err {
            CompletionError::RateLimited { model, .. } => assert_eq!(model, "c"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(backend.models_called(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_other_errors_do_not_rotate() {
        let backend = Arc::new(ScriptedBackend::new(|model, _| {
            Err(CompletionError::Api {
                model: model.to_string(),
                status: StatusCode::UNAUTHORIZED,
                body: "invalid key".into(),
            })
        }));
        let pool = CompletionPool::new(backend.clone(), &settings(&["a", "b"])).unwrap();

        assert!(pool.call("hello", None, None).await.is_err());
        assert_eq!(backend.models_called(), vec!["a"]);
        assert_eq!(pool.stats().current_model, "a");
    }

    #[tokio::test]
    async fn test_cursor_persists_between_calls() {
        let backend = Arc::new(ScriptedBackend::new(|model, _| match model {
            "a" => Err(rate_limited(model)),
            _ => Ok("ok".into()),
        }));
        let pool = CompletionPool::new(backend.clone(), &settings(&["a", "b"])).unwrap();

        pool.call("one", None, None).await.unwrap();
        pool.call("two", None, None).await.unwrap();
        assert_eq!(backend.models_called(), vec!["a", "b", "b"]);
    }

    #[tokio::test]
    async fn test_rotation_disabled_gives_up_after_first_model() {
        let backend = Arc::new(ScriptedBackend::new(|model, _| Err(rate_limited(model))));
        let mut s = settings(&["a", "b"]);
        s.enable_model_rotation = false;
        let pool = CompletionPool::new(backend.clone(), &s).unwrap();

        assert!(pool.call("hello", None, None).await.is_err());
        assert_eq!(backend.models_called(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_overrides_reach_backend_and_reset_stats() {
        let backend = Arc::new(ScriptedBackend::new(|_, _| Ok("ok".into())));
        let pool = CompletionPool::new(backend.clone(), &settings(&["a"])).unwrap();

        pool.call("x", Some(0.05), Some(256)).await.unwrap();
        assert_eq!(backend.last_params(), Some((0.05, 256)));

        pool.call("x", None, None).await.unwrap();
        assert_eq!(backend.last_params(), Some((0.1, 1024)));

        pool.reset_stats();
        let stats = pool.stats();
        assert_eq!(stats.total_api_calls, 0);
        assert!(stats.successes.is_empty());
    }

    /// Holds every call on model `a` until `parties` calls are waiting, then
    /// rate limits them all together.
    struct GatedBackend {
        gate: tokio::sync::Barrier,
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl CompletionBackend for GatedBackend {
        async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, CompletionError> {
            self.calls
                .lock()
                .unwrap()
                .push((request.prompt.to_string(), request.model.to_string()));
            if request.model == "a" {
                self.gate.wait().await;
                return Err(rate_limited(request.model));
            }
            Ok(format!("{} via {}", request.prompt, request.model))
        }
    }

    #[tokio::test]
    async fn test_concurrent_rate_limits_advance_cursor_once() {
        let backend = Arc::new(GatedBackend {
            gate: tokio::sync::Barrier::new(2),
            calls: Mutex::new(Vec::new()),
        });
        let pool = CompletionPool::new(backend.clone(), &settings(&["a", "b", "c"])).unwrap();

        let (one, two) = tokio::join!(pool.call("one", None, None), pool.call("two", None, None));
        assert_eq!(one.unwrap().model, "b");
        assert_eq!(two.unwrap().model, "b");
        assert_eq!(pool.stats().current_model, "b");

        let calls = backend.calls.lock().unwrap().clone();
        for prompt in ["one", "two"] {
            let models: Vec<_> = calls
                .iter()
                .filter(|(p, _)| p == prompt)
                .map(|(_, m)| m.as_str())
                .collect();
            assert_eq!(models, vec!["a", "b"]);
        }
        assert_eq!(pool.stats().total_api_calls, 4);
    }

    #[test]
    fn test_empty_catalog_rejected() {
        let backend = Arc::new(ScriptedBackend::new(|_, _| Ok(String::new())));
        assert!(matches!(
            CompletionPool::new(backend, &settings(&[" "])),
            Err(CompletionError::NoModels)
        ));
    }

    #[tokio::test]
    async fn test_chat_client_maps_429_to_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(bearer_token("secret"))
            .and(body_partial_json(serde_json::json!({"model": "slow"})))
            .respond_with(ResponseTemplate::new(429).set_body_string("Rate limit reached"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({"model": "fast"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "  hi there "}}]
            })))
            .mount(&server)
            .await;

        let mut s = settings(&["slow", "fast"]);
        s.base_url = server.uri();
        let client = ChatCompletionsClient::new(&s, "secret").unwrap();
        let pool = CompletionPool::new(Arc::new(client), &s).unwrap();

        let out = pool.call("hello", None, None).await.unwrap();
        assert_eq!(out.text, "hi there");
        assert_eq!(out.model, "fast");
    }
}
