use anyhow::{Context, Result};
use clap::Parser;
use palaver::api::{ForumClient, Scope};
use palaver::config::Config;
use palaver::sync::{FetchPlan, SessionEvent, ThreadsSession};
use secrecy::SecretString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Get the config directory path (~/.config/palaver/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("palaver"))
}

#[derive(Parser, Debug)]
#[command(name = "palaver", about = "Thread-list sync client for Misago-style forums")]
struct Args {
    /// Path to config file (default: ~/.config/palaver/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// GraphQL endpoint (overrides config file)
    #[arg(long, value_name = "URL")]
    endpoint: Option<String>,

    /// Category id to scope the listing to (default: all threads)
    #[arg(long, value_name = "ID")]
    category: Option<String>,

    /// Number of pages to fetch
    #[arg(long, default_value_t = 1)]
    pages: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => get_config_dir()?.join("config.toml"),
    };
    let config = Config::load(&config_path).context("Failed to load config")?;

    let endpoint = args.endpoint.as_deref().unwrap_or(&config.api_url);
    // Env var takes precedence over the config file for the token.
    let token = std::env::var("PALAVER_API_TOKEN")
        .ok()
        .or_else(|| config.api_token.clone())
        .map(SecretString::from);

    let client = ForumClient::with_timeout(
        endpoint,
        token,
        Duration::from_secs(config.request_timeout_secs),
    )
    .context("Failed to build API client")?;

    let scope = match args.category {
        Some(id) => Scope::Category(id),
        None => Scope::All,
    };

    let (events_tx, mut events_rx) = mpsc::channel::<SessionEvent>(32);
    let mut session = ThreadsSession::new(Arc::new(client), events_tx);

    tracing::info!(endpoint, scope = %scope, pages = args.pages, "Loading threads");
    session.activate(scope);

    let mut pages_loaded = 0u32;
    while pages_loaded < args.pages {
        let event = tokio::time::timeout(Duration::from_secs(90), events_rx.recv())
            .await
            .context("Timed out waiting for server response")?
            .context("Event channel closed")?;

        let was_loading = session.is_loading();
        session.handle_event(event);

        if was_loading && !session.is_loading() {
            if let Some(failure) = session.take_failure() {
                anyhow::bail!("{} failed: {}", failure.operation, failure.error);
            }
            pages_loaded += 1;

            if pages_loaded < args.pages {
                match session.fetch_more()? {
                    FetchPlan::Exhausted => break,
                    FetchPlan::Issue(_) | FetchPlan::Coalesced => {}
                }
            }
        }
    }

    for thread in session.threads() {
        let mut flags = String::new();
        if thread.is_pinned {
            flags.push_str(" [pinned]");
        }
        if thread.is_closed {
            flags.push_str(" [closed]");
        }
        let activity = thread
            .last_posted_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{}  {}  {}{}", thread.id, activity, thread.title, flags);
    }

    println!(
        "{} threads across {} page(s){}",
        session.threads().len(),
        pages_loaded,
        if session.has_more() {
            " (more available)"
        } else {
            ""
        }
    );

    Ok(())
}
