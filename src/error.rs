//! Error types for every pipeline stage.
//!
//! Each component returns its own error enum. The orchestrator's worker
//! loops log and swallow all of them except [`OrchestratorError`], which is
//! only produced at startup.

use reqwest::StatusCode;
use thiserror::Error;

/// Lowercased fragments that mark a provider error message as a rate limit.
const RATE_LIMIT_MARKERS: [&str; 6] = [
    "rate limit",
    "rate_limit",
    "ratelimit",
    "429",
    "too many requests",
    "quota exceeded",
];

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: StatusCode },
}

#[derive(Error, Debug)]
pub enum FeedError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("feed {url} is neither RSS nor Atom: {reason}")]
    Malformed { url: String, reason: String },
}

#[derive(Error, Debug)]
pub enum ProviderError {
    /// Listing discovery was requested from a provider that only reads feeds.
    #[error("{provider} does not support listing-page discovery")]
    ListingUnsupported { provider: String },
}

#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("model {model} is rate limited: {message}")]
    RateLimited { model: String, message: String },

    #[error("model {model} returned status {status}: {body}")]
    Api {
        model: String,
        status: StatusCode,
        body: String,
    },

    #[error("completion transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("completion response had no content: {0}")]
    Malformed(String),

    #[error("no models configured")]
    NoModels,
}

impl CompletionError {
    /// True when this failure should make the pool move to the next model.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            CompletionError::RateLimited { .. } => true,
            CompletionError::Api { status, body, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || mentions_rate_limit(body)
            }
            CompletionError::Transport(e) => {
                e.status() == Some(StatusCode::TOO_MANY_REQUESTS)
                    || mentions_rate_limit(&e.to_string())
            }
            CompletionError::Malformed(msg) => mentions_rate_limit(msg),
            CompletionError::NoModels => false,
        }
    }
}

pub fn mentions_rate_limit(text: &str) -> bool {
    let lowered = text.to_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|m| lowered.contains(m))
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("store rejected {url} with status {status}")]
    Rejected { url: String, status: StatusCode },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid HTTP header {name}: {reason}")]
    Header { name: String, reason: String },

    #[error("no LLM API key; pass --api-key or set LLM_API_KEY / GROQ_API_KEY")]
    MissingApiKey,

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Failure to obtain the candidate list for one poll cycle.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error("listing page: {0}")]
    Listing(#[from] FetchError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("no providers registered")]
    NoProviders,

    #[error("provider {provider} is misconfigured: {reason}")]
    Misconfigured { provider: String, reason: String },
}
