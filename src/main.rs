//! Triage bot - scripted chat screening with photo classification
//!
//! Walks Telegram users through a configured conversation graph, gates the
//! photo step behind a login, classifies submitted photos and records each
//! verdict in a per-user ledger.

mod auth;
mod classifier;
mod config;
mod ledger;
mod notifier;
mod runtime;
mod state_machine;
mod telegram;

use auth::CredentialTable;
use classifier::{GeminiClassifier, GeminiConfig, LoggingClassifier};
use config::BotConfig;
use ledger::DiagnosisLedger;
use notifier::RedisNotifier;
use runtime::{ChatRuntime, Collaborators, ProductionRuntime, UpdatePoller};
use state_machine::ConversationGraph;
use std::sync::Arc;
use telegram::{TelegramClient, TelegramConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "triage_bot=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = BotConfig::from_env()?;

    // Startup documents; any failure here is fatal
    let graph = Arc::new(ConversationGraph::load(&config.conversation_path)?);
    let credentials = Arc::new(
        CredentialTable::load(&config.auth_path)?
            .with_limits(config.auth_max_failures, config.auth_window),
    );
    let ledger = Arc::new(DiagnosisLedger::load(&config.diagnosis_path)?);

    let telegram = Arc::new(TelegramClient::new(TelegramConfig {
        token: config.telegram_token.clone(),
        api_base: config.telegram_api_base.clone(),
        poll_timeout: config.poll_timeout,
        assets_dir: config.assets_dir.clone(),
        max_download_bytes: config.max_download_bytes,
    })?);

    let gemini = GeminiClassifier::new(GeminiConfig {
        api_key: config.gemini_api_key.clone(),
        model: config.gemini_model.clone(),
        base_url: config.gemini_base_url.clone(),
    })?;
    let classifier = LoggingClassifier::new(Arc::new(gemini));

    let notifier = Arc::new(RedisNotifier::new(
        &config.redis_addr,
        &config.chat_event_queue,
        config.timeouts.notify,
    ));
    // Connect at startup; an unreachable queue is retried on each publish
    if !notifier.init().await {
        tracing::warn!(addr = %config.redis_addr, "Chat event queue not reachable yet");
    }

    let runtime: Arc<ProductionRuntime> = Arc::new(
        ChatRuntime::new(
            graph,
            credentials,
            ledger,
            Collaborators {
                replies: telegram.clone(),
                fetcher: telegram.clone(),
                classifier,
                notifier,
            },
        )
        .with_timeouts(config.timeouts)
        .with_max_download_bytes(config.max_download_bytes),
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                return;
            }
            tracing::info!("Shutdown requested");
            cancel.cancel();
        });
    }

    tracing::info!(
        assets = %config.assets_dir.display(),
        queue = %config.chat_event_queue,
        "Triage bot running"
    );

    let poller = UpdatePoller::new(telegram, runtime, config.timeouts.poll_retry);
    poller.run(cancel).await;

    Ok(())
}
