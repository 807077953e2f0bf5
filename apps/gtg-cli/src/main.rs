//! # gtg
//!
//! Stream notifier daemon. Watches one Twitch channel through an external
//! EventSub bridge and tells every registered Telegram chat when it goes
//! live or offline.
//!
//! ## Usage
//!
//! ```text
//! TWITCH_TARGET_USER=12345 TELEGRAM_BOT_TOKEN=... gtg
//! gtg --config ~/.config/gtg/gtg.toml --verbose
//! ```
//!
//! Chats opt in by sending `/start` to the bot; groups also register on any
//! message. Stop with Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use gtg_delivery::{DesktopNotifier, NotifySend, NullNotifier, TelegramChannel};
use gtg_notifier::{
    BroadcastDispatcher, JsonLinesSource, NotificationStrategy, NotifierConfig, NotifierContext,
    SourceEvent, SubscriptionSupervisor,
};
use gtg_targets::{TargetRegistry, TargetStore};

/// GTG stream notifier.
#[derive(Parser)]
#[command(name = "gtg", version, about = "Notify Telegram chats when a stream goes live")]
struct Cli {
    /// Config file (defaults to $XDG_CONFIG_HOME/gtg/gtg.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("gtg={}", level).parse()?)
                .add_directive(format!("gtg_notifier={}", level).parse()?)
                .add_directive(format!("gtg_delivery={}", level).parse()?)
                .add_directive(format!("gtg_targets={}", level).parse()?),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => NotifierConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => NotifierConfig::load_default().context("loading default config")?,
    };
    config.apply_env();
    config.validate()?;

    let token = config.telegram.bot_token.clone().unwrap_or_default();
    let mut telegram = TelegramChannel::new(token, config.telegram.api_base.as_deref())
        .context("building Telegram client")?;
    match telegram.get_me().await {
        Ok(bot) => tracing::info!(
            bot = bot.username.as_deref().unwrap_or(&bot.first_name),
            "connected to Telegram"
        ),
        Err(e) => tracing::warn!("Telegram connection check failed: {}", e),
    }
    let telegram = Arc::new(telegram);

    let desktop: Arc<dyn DesktopNotifier> = if config.desktop.enabled {
        Arc::new(NotifySend::new(config.desktop.command.clone()))
    } else {
        Arc::new(NullNotifier)
    };

    let store = Arc::new(TargetStore::open(&config.store_path()));

    let ctx = NotifierContext {
        registry: Arc::new(TargetRegistry::new(store, config.policy())),
        channel: telegram.clone(),
        desktop,
        entity: config.entity(),
    };

    let strategy = config.strategy();
    if let NotificationStrategy::SingleTarget { target_id } = &strategy {
        tracing::info!(target_id = %target_id, "single-chat mode");
    }
    let dispatcher = BroadcastDispatcher::new(ctx.clone(), strategy)
        .with_offline_notifications(config.monitor.notify_offline);

    let (tx, rx) = mpsc::channel::<SourceEvent>(256);
    let source = JsonLinesSource::spawn(
        &config.source.command,
        &config.source.args,
        config.source.restart_delay(),
        tx.clone(),
    )
    .with_context(|| format!("starting event bridge `{}`", config.source.command))?;
    let poller = telegram.spawn_inbound_poller(config.telegram.poll_timeout_secs, tx);

    let supervisor =
        SubscriptionSupervisor::new(source, ctx, dispatcher, config.supervisor_config());
    supervisor
        .run(rx, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    poller.abort();
    tracing::info!("stream notifier stopped");
    Ok(())
}
