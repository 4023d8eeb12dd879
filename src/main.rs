use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod config;
mod dashboard;
mod live_scores;
mod models;
mod monitor;
mod notify;
mod store;
mod telegram;

use config::Config;
use dashboard::AppState;
use live_scores::{ApiFootball, SnapshotFetcher};
use monitor::ScoreMonitor;
use notify::{Dispatcher, LogSender, NotificationSender};
use store::{ScoreStore, SubscriptionRegistry};
use telegram::{run_update_loop, ChatHandler, TelegramClient};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    if config.dry_run {
        info!("🟡 DRY RUN mode – alerts are logged, not sent");
    }

    // Process-wide state, injected into the poll loop and the chat handler
    let store = ScoreStore::new();
    let registry = SubscriptionRegistry::new();

    let fetcher: Arc<dyn SnapshotFetcher> = Arc::new(ApiFootball::new(
        &config.api_football_key,
        &config.api_football_url,
    )?);

    let telegram_client = match config.telegram_bot_token.as_deref() {
        Some(token) if !token.trim().is_empty() => {
            Some(TelegramClient::new(&config.telegram_api_url, token)?)
        }
        _ => None,
    };

    let sender: Arc<dyn NotificationSender> = match (&telegram_client, config.dry_run) {
        (Some(client), false) => Arc::new(client.clone()),
        _ => Arc::new(LogSender),
    };

    let shutdown = CancellationToken::new();

    // Poll loop on its own task
    let monitor = ScoreMonitor::new(
        Arc::clone(&fetcher),
        store.clone(),
        Dispatcher::new(registry.clone(), sender)
            .with_concurrency(config.max_concurrent_sends),
        config.monitor_config(),
    );
    let monitor_handle = monitor.start(shutdown.clone());
    let stats = monitor_handle.stats();
    info!("Score monitor {:?}", monitor_handle.state());

    // Chat interface: follows, lookups
    let chat_task = telegram_client.map(|client| {
        let handler = ChatHandler::new(registry.clone(), Arc::clone(&fetcher));
        tokio::spawn(run_update_loop(client, handler, shutdown.clone()))
    });
    if chat_task.is_none() {
        info!("No Telegram token configured; chat interface disabled");
    }

    // Ctrl-C cancels everything
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            info!("Shutdown requested");
            shutdown.cancel();
        });
    }

    let app = dashboard::router(AppState {
        store,
        registry,
        stats,
        dry_run: config.dry_run,
    });
    let addr: SocketAddr = config.dashboard_addr.parse()?;
    info!("Status API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Run status server (blocks until shutdown)
    let server_shutdown = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await;

    shutdown.cancel();
    monitor_handle.stop().await;
    if let Some(task) = chat_task {
        if let Err(e) = task.await {
            error!("Telegram update loop ended abnormally: {}", e);
        }
    }

    served?;
    info!("Goodbye");
    Ok(())
}
