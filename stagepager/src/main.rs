//! `StagePager` binary: configuration, logging, token bootstrap, and a
//! JSON-lines chat adapter over stdin/stdout.
//!
//! Each stdin line is one inbound chat message
//! (`{"channel": ..., "text": ..., "ts": ...}`); the literal line
//! `status` prints a state snapshot instead. Each reaction leaves as
//! one JSON line on stdout. Logs go to stderr so stdout stays a clean
//! data plane. EOF on stdin ends the process.

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use stagepager::bridge::{Bridge, BridgeEvent};
use stagepager::chat::{ChatMessage, FeedbackError, FeedbackSink, Nonce, Reaction};
use stagepager::config::{
    CliArgs, DiscoveryStore, NullDiscoveryStore, Settings, TomlDiscoveryStore,
};
use stagepager::tokens;

/// Reference chat integration: reactions as JSON lines on stdout.
struct StdoutFeedback;

impl FeedbackSink for StdoutFeedback {
    async fn add_reaction(
        &self,
        channel: &str,
        nonce: &Nonce,
        reaction: Reaction,
    ) -> Result<(), FeedbackError> {
        let line = serde_json::json!({
            "channel": channel,
            "ts": nonce.as_str(),
            "reaction": reaction.as_str(),
        });
        println!("{line}");
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();

    let settings = match Settings::load(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let _log_guard = init_logging(&settings.log_level, settings.log_file.as_deref());

    tracing::info!(
        version = %settings.version,
        host = %settings.host,
        port = settings.port,
        "stagepager starting"
    );

    let settings = match tokens::ensure_tokens(settings).await {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(err = %e, "token bootstrap failed");
            eprintln!("Error fetching chat tokens: {e}");
            std::process::exit(1);
        }
    };

    let store: Arc<dyn DiscoveryStore> = match settings.source_path.clone() {
        Some(path) => Arc::new(TomlDiscoveryStore::new(path)),
        None => Arc::new(NullDiscoveryStore),
    };

    let (bridge, mut events) = Bridge::spawn(settings.to_bridge_config(), StdoutFeedback, store);

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut events_open = true;

    loop {
        tokio::select! {
            event = events.recv(), if events_open => {
                match event {
                    Some(event) => report(&event),
                    None => events_open = false,
                }
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => handle_line(&bridge, &line).await,
                    Ok(None) => {
                        tracing::info!("stdin closed, shutting down");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(err = %e, "stdin read failed, shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Surface a bridge condition to the operator via the log.
fn report(event: &BridgeEvent) {
    match event {
        BridgeEvent::AuthRejected(reason) => {
            tracing::error!(
                reason = %reason,
                "presentation endpoint rejected the password; fix the config and restart"
            );
        }
        BridgeEvent::DiscoveryFailed => {
            tracing::error!(
                "no usable message template found; add one in the presentation software"
            );
        }
    }
}

/// Route one stdin line: a status request or an inbound message.
async fn handle_line(bridge: &Bridge<StdoutFeedback>, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    if line == "status" {
        match serde_json::to_string(&bridge.status()) {
            Ok(snapshot) => println!("{snapshot}"),
            Err(e) => tracing::warn!(err = %e, "could not serialize the status snapshot"),
        }
        return;
    }

    match serde_json::from_str::<ChatMessage>(line) {
        Ok(message) => bridge.handle_message(&message).await,
        Err(e) => tracing::warn!(err = %e, "unparseable input line, skipping"),
    }
}

/// Initialize logging to stderr, optionally teeing into a file.
///
/// The returned guard must live as long as the process when file
/// logging is active; dropping it flushes the background writer.
fn init_logging(level: &str, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match log_file {
        Some(path) => {
            let dir = path.parent()?;
            let file_name = path.file_name()?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(non_blocking)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}
