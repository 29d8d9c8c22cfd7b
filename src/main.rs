//! Binary reconciling one organization webhook against its `.env` description.
//!
//! ## Usage
//!
//! 1. Create a `.env` file with your configuration (see the library docs)
//! 2. Run: `cargo run`
//! 3. Set `GITHUB_WEBHOOK_ID` to the printed ID to update it in place on the
//!    next run
//!
//! Log verbosity follows `RUST_LOG` (default: `info`).

#![allow(clippy::print_stdout)] // Allow println! in the binary

use std::env;

use gh_reconciler::{
    GitHubClient, GitHubClientConfig, JsonFileStateStore, OrganizationWebhook, PollPolicy, ReadOutcome, Reconciler,
    ResourceIdentity, WebhookSpec,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration from environment
    let client_cfg = GitHubClientConfig::from_env()?;
    let spec = WebhookSpec::from_env()?;
    let reconciler = Reconciler::new(PollPolicy::from_env()?);
    let store = JsonFileStateStore::new(JsonFileStateStore::default_path());
    println!("Configuration loaded:");
    println!("  API: {}", client_cfg.base_url);
    println!("  Owner: {}", client_cfg.owner.as_deref().unwrap_or("<unset>"));
    println!("  Events: {:?}", spec.events);
    println!("  State file: {}", store.path().display());

    let hooks = OrganizationWebhook::new(GitHubClient::new(client_cfg)?);
    let desired = spec.to_desired();

    let known = env::var("GITHUB_WEBHOOK_ID")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(ResourceIdentity::new);

    let observed = match known {
        Some(identity) => match reconciler.read(&hooks, &store, &identity).await? {
            ReadOutcome::Gone => {
                println!("\nWebhook {identity} is gone, recreating...");
                reconciler.create(&hooks, &store, &desired).await?
            }
            ReadOutcome::Refreshed(_) | ReadOutcome::Unchanged(_) => {
                reconciler.update(&hooks, &store, &identity, &desired).await?
            }
        },
        None => reconciler.create(&hooks, &store, &desired).await?,
    };

    println!("\nWebhook reconciled!");
    println!("  ID: {}", observed.identity);
    println!("  URL: {}", observed.attr_str("url").unwrap_or_default());
    if let Some(events) = observed.attributes.get("events") {
        println!("  Events: {events}");
    }

    Ok(())
}
