//! # newswire_stream
//!
//! Continuously ingests press releases from wire services and forwards the
//! ones about NYSE/NASDAQ-listed companies to an article store.
//!
//! ## Providers
//!
//! PR Newswire, GlobeNewswire, Business Wire, ACCESS Newswire and Newsfile.
//! Each is polled on its own cadence, either through its RSS feed or (for
//! the latter two) by scraping its newsroom listing page.
//!
//! ## Usage
//!
//! ```sh
//! GROQ_API_KEY=... newswire_stream -c pipeline.yaml
//! ```
//!
//! ## Architecture
//!
//! One tokio task per provider runs this loop forever:
//! 1. **Discover**: new feed items, or release links from the listing page
//! 2. **Fetch and parse**: download the release, extract body text and tickers
//! 3. **Materiality**: optional LLM check of whether the release is price relevant
//! 4. **Classify**: LLM title, bullets, summary and topic, with model rotation on rate limits
//! 5. **Store**: POST the flat article JSON to the store endpoint

use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod error;
mod feed;
mod fetcher;
mod llm;
mod materiality;
mod models;
mod orchestrator;
mod providers;
mod store;
mod transformer;
mod utils;

#[cfg(test)]
mod test_support;

use cli::Cli;
use config::{PipelineConfig, resolve_api_key};
use fetcher::Fetcher;
use llm::{ChatCompletionsClient, CompletionPool};
use orchestrator::{Orchestrator, Pipeline, PipelineSettings};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // Parse CLI
    let args = Cli::parse();

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "newswire_stream starting up");
    debug!(?args.config, ?args.providers, once = args.once, "Parsed CLI arguments");

    // --- Config ---
    let mut config = PipelineConfig::load(args.config.as_deref())?;
    if let Some(endpoint) = &args.store_endpoint {
        config.store_endpoint = endpoint.clone();
    }
    let api_key = resolve_api_key(args.api_key().as_deref(), config.api_key.as_deref())?;

    // --- Shared stages ---
    let fetcher = Arc::new(Fetcher::new(&config.http)?);
    let backend = Arc::new(ChatCompletionsClient::new(&config.llm, api_key)?);
    let pool = Arc::new(CompletionPool::new(backend, &config.llm)?);
    let pipeline = Pipeline::new(
        fetcher,
        pool,
        PipelineSettings {
            store_endpoint: config.store_endpoint.clone(),
            article_delay: config.article_delay(),
            materiality: config.materiality.clone(),
            transformer: config.transformer.clone(),
        },
    );
    info!(
        store = %config.store_endpoint,
        materiality = config.materiality.enabled,
        drop_immaterial = config.materiality.drop_immaterial,
        "Pipeline ready"
    );

    // --- Providers ---
    let mut orchestrator = Orchestrator::new(pipeline);
    for (kind, provider_config) in config.enabled_providers(&args.providers) {
        if let Err(e) = orchestrator.register_provider(kind.build(provider_config)) {
            error!(provider = %kind, error = %e, "Provider rejected");
            return Err(e.into());
        }
    }
    info!(count = orchestrator.provider_count(), "Providers registered");

    if args.once {
        for (provider, report) in orchestrator.run_once().await? {
            info!(%provider, ?report, "Single pass finished");
        }
        info!(processed = orchestrator.pipeline().processed().len(), "Done");
        return Ok(());
    }

    tokio::select! {
        result = orchestrator.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted; shutting down"),
    }
    Ok(())
}
