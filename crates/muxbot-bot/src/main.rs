//! muxbot — bridge Telegram forum topics to terminal multiplexer
//! windows running an AI coding assistant.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use teloxide::Bot;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use muxbot_core::MuxbotConfig;
use muxbot_monitor::SessionMonitor;
use muxbot_sessions::SessionStore;
use muxbot_telegram::dispatch::make_event_callback;
use muxbot_telegram::polling::spawn_status_poller;
use muxbot_telegram::{run_bot, Shared};

#[derive(Parser, Debug)]
#[command(name = "muxbot", about = "Chat-to-terminal bridge for AI coding sessions")]
struct Cli {
    /// Path to muxbot.toml (defaults to ~/.muxbot/muxbot.toml).
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("muxbot=debug,info")),
        )
        .init();

    let config = MuxbotConfig::load(cli.config.as_deref()).context("failed to load config")?;
    info!(
        backend = ?config.multiplexer.backend,
        session = %config.multiplexer.session_name,
        projects = %config.claude.projects_path.display(),
        "config loaded"
    );

    let mux = muxbot_mux::make_backend(&config.multiplexer, &config.claude.command);
    mux.ensure_session()
        .await
        .context("multiplexer session unavailable")?;
    info!(session = %config.multiplexer.session_name, "multiplexer session ready");

    let store = Arc::new(SessionStore::new(
        &config.state_file(),
        &config.session_map_file(),
        &config.multiplexer.session_name,
        &config.claude.projects_path,
    ));
    store.load_session_map().await;

    let bot = Bot::new(&config.telegram.bot_token);
    let shared = Shared::new(config.clone(), Arc::clone(&store), Arc::clone(&mux));

    // Transcript monitor: tails session files, feeds the delivery queues.
    let monitor_cancel = CancellationToken::new();
    let monitor = SessionMonitor::new(
        Arc::clone(&store),
        Arc::clone(&mux),
        &config.claude.projects_path,
        &config.monitor_state_file(),
        Duration::from_secs_f64(config.monitor.poll_interval_s),
        config.show_user_messages,
        make_event_callback(bot.clone(), Arc::clone(&shared)),
        monitor_cancel.clone(),
    );
    let monitor_task = tokio::spawn(monitor.run());

    // Pane poller: status lines, interactive UIs, stale-binding cleanup.
    let poller_cancel = spawn_status_poller(bot.clone(), Arc::clone(&shared));

    // Long-polling dispatcher; returns on ctrl-c.
    run_bot(bot, Arc::clone(&shared)).await;

    info!("shutting down");
    poller_cancel.cancel();
    monitor_cancel.cancel();
    let _ = monitor_task.await;
    shared.queues.shutdown();
    Ok(())
}
