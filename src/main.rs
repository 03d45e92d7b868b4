//! Relaybot CLI entry point.

use anyhow::Context as _;
use clap::Parser;
use relaybot::backend::BackendAdapter;
use relaybot::config::Config;
use relaybot::router::{EventRouter, RelayContext};
use relaybot::search::SearchAugmentor;
use relaybot::slack::{SlackClient, SocketModeListener};
use relaybot::thread::{MentionThread, ThreadStore};
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::AtomicBool;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relaybot")]
#[command(about = "Slack bridge to a conversational-AI backend")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("starting relaybot");

    let config = Config::load().context("failed to load configuration from environment")?;

    let http = reqwest::Client::new();
    let slack = Arc::new(SlackClient::new(http.clone(), config.slack.bot_token.clone()));

    let identity = slack
        .auth_test()
        .await
        .context("failed to resolve bot identity")?;
    tracing::info!(bot_user_id = %identity.user_id, "slack bot user ID resolved");

    let backend =
        BackendAdapter::new(http.clone(), &config.backend).context("failed to build backend")?;
    tracing::info!(
        mode = %config.backend.default_mode,
        endpoint = %backend.active_endpoint(),
        "backend adapter ready"
    );

    let ctx = Arc::new(RelayContext {
        slack: slack.clone(),
        backend,
        threads: ThreadStore::new(slack.clone()),
        mention_thread: MentionThread::default(),
        search: SearchAugmentor::new(http, config.search.brave_key.clone()),
        mode: RwLock::new(config.backend.default_mode),
        internet: AtomicBool::new(config.search.default_enabled),
        reset_command: config.slack.reset_command.clone(),
    });

    let listener = SocketModeListener::new(
        slack,
        config.slack.app_token.clone(),
        identity.user_id.clone(),
    );
    let events = listener.start();
    let router = EventRouter::new(ctx);

    tracing::info!("relaybot running");

    tokio::select! {
        _ = router.run(events) => {
            tracing::info!("event stream ended");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    tracing::info!("relaybot stopped");
    Ok(())
}
