//! Scores a JSON file of leads in one batch and prints the emitted records.
//!
//! Usage: `score-batch <leads.json> [scoring-config.json]`

use anyhow::Context;
use std::env;
use std::sync::Arc;

use rust_lead_scoring::config::Config;
use rust_lead_scoring::core::models::{Lead, ScoringConfig};
use rust_lead_scoring::integrations::proxy_pool::ProxyPool;
use rust_lead_scoring::core::runner::BatchRunner;
use rust_lead_scoring::integrations::sink::MemorySink;

/// Main entry point for the batch scorer.
///
/// Reads configuration from the environment like the server does, runs the
/// leads through the same runner, and writes the sink records to stdout as
/// JSON. Progress goes to stderr through tracing.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_lead_scoring=info".into()),
        )
        .init();

    let mut args = env::args().skip(1);
    let leads_path = args
        .next()
        .context("usage: score-batch <leads.json> [scoring-config.json]")?;
    let config_path = args.next();

    let leads: Vec<Lead> = serde_json::from_str(
        &tokio::fs::read_to_string(&leads_path)
            .await
            .with_context(|| format!("reading {}", leads_path))?,
    )
    .with_context(|| format!("parsing leads from {}", leads_path))?;

    let scoring = match config_path {
        Some(path) => serde_json::from_str::<ScoringConfig>(
            &tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path))?,
        )
        .with_context(|| format!("parsing scoring config from {}", path))?,
        None => ScoringConfig::default(),
    };

    let config = Config::from_env()?;
    let pool = if config.proxy.enabled {
        let pool = Arc::new(ProxyPool::new(config.proxy.refresh_interval));
        pool.load_file(&config.proxy.file).await;
        Some(pool)
    } else {
        None
    };

    let sink = Arc::new(MemorySink::new());
    let runner = Arc::new(BatchRunner::from_config(&config, pool, sink.clone()));

    eprintln!("=== Scoring {} lead(s) ===", leads.len());
    let outcome = runner.run(leads, scoring).await?;

    if let Some(error) = &outcome.error {
        anyhow::bail!(
            "run {} failed after {} lead(s): {}",
            outcome.run_id,
            outcome.scored.len(),
            error
        );
    }

    println!("{}", serde_json::to_string_pretty(&outcome.emitted)?);

    eprintln!("✓ Scored: {}", outcome.scored.len());
    eprintln!("✓ Targets emitted: {}", outcome.emitted.len());
    eprintln!("✗ Lead errors: {}", outcome.lead_errors);

    Ok(())
}
