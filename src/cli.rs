//! Command-line interface definitions for newswire_stream.
//!
//! Every option can also come from the environment, which is how the service
//! is usually deployed.

use crate::providers::ProviderKind;
use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments.
///
/// # Examples
///
/// ```sh
/// # All providers, defaults, key from the environment
/// GROQ_API_KEY=... newswire_stream
///
/// # Only Newsfile and ACCESS Newswire, custom config, one pass
/// newswire_stream -c pipeline.yaml -p newsfile -p access-newswire --once
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a YAML config file
    #[arg(short, long, env = "NEWSWIRE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Article store endpoint (overrides the config file)
    #[arg(long, env = "STORE_ENDPOINT")]
    pub store_endpoint: Option<String>,

    /// API key for the completion service
    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Only run these providers (repeatable)
    #[arg(short, long = "provider", value_enum)]
    pub providers: Vec<ProviderKind>,

    /// Poll each provider once and exit instead of looping
    #[arg(long)]
    pub once: bool,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// The explicit key, falling back to the Groq-specific variable.
    pub fn api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("GROQ_API_KEY").ok())
    }
}
