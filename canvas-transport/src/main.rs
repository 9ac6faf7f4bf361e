//! # canvas-room
//!
//! Joins a collaboration room and follows it: reconciles incoming scene
//! updates, smooths remote cursors, and logs what changes. Runs until
//! Ctrl-C or until reconnect attempts run out.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use clap::Parser;
use tokio::sync::Notify;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use canvas_transport::{
    CollabSession, ConnectionState, JsonPayloadDecoder, SessionUpdate, TransportClient,
    TransportConfig, TransportEvent, WsConnector,
};

type Session = CollabSession<JsonPayloadDecoder>;

/// Default room server endpoint.
const DEFAULT_URL: &str = "ws://127.0.0.1:9473/ws";

/// Interval between cursor animation steps.
const FRAME: Duration = Duration::from_millis(16);

/// Interval between scene summaries in the log.
const SUMMARY_INTERVAL: Duration = Duration::from_secs(5);

/// Command-line arguments for canvas-room.
#[derive(Debug, Clone, Parser)]
#[command(name = "canvas-room")]
#[command(about = "Follow a Saorsa Canvas collaboration room")]
#[command(version)]
struct CliArgs {
    /// Room server WebSocket URL
    #[arg(long, env = "CANVAS_URL", default_value = DEFAULT_URL)]
    url: String,

    /// Room to join
    #[arg(long, env = "CANVAS_ROOM")]
    room: String,

    /// Delay before the first reconnect attempt, in milliseconds
    #[arg(long)]
    reconnect_base_ms: Option<u64>,

    /// Reconnect attempts before giving up
    #[arg(long)]
    max_attempts: Option<u32>,
}

/// Initialize structured tracing with optional JSON format.
///
/// Set `RUST_LOG` to control log levels (default: info,canvas_transport=debug).
/// Set `RUST_LOG_FORMAT=json` for JSON output.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,canvas_transport=debug,canvas_collab=info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = CliArgs::parse();

    let mut config = TransportConfig::from_env();
    if let Some(base) = args.reconnect_base_ms {
        config.reconnect.base_delay_ms = base;
    }
    if let Some(max) = args.max_attempts {
        config.reconnect.max_attempts = max;
    }
    tracing::debug!(?config, "Transport configuration");

    let session = Arc::new(Mutex::new(CollabSession::new(JsonPayloadDecoder)));
    let exhausted = Arc::new(Notify::new());

    let mut client = TransportClient::new(config, WsConnector::new(&config));
    {
        let session = Arc::clone(&session);
        let exhausted = Arc::clone(&exhausted);
        // This process never edits locally, so nothing is protected.
        let active = HashSet::new();
        let _listener = client.on(move |event| {
            if matches!(event, TransportEvent::ReconnectExhausted) {
                exhausted.notify_one();
            }
            let update = session
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .handle_event(event, &active, Instant::now());
            match update {
                SessionUpdate::Scene(report) if report.has_remote_changes() => {
                    tracing::info!(
                        applied = report.remote_applied,
                        discarded = report.remote_discarded,
                        "Scene updated"
                    );
                }
                SessionUpdate::Dropped => tracing::warn!("Remote update could not be read"),
                _ => tracing::debug!(event = event.name(), "Transport event"),
            }
        });
    }

    client
        .connect(&args.url, args.room.clone())
        .map_err(|e| anyhow::anyhow!("Failed to start connection: {e}"))?;
    tracing::info!(client_id = client.id(), room = %args.room, "canvas-room started");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Ctrl-C handler failed");
        }
    };
    follow_room(&mut client, &session, &exhausted, &args.url, shutdown).await
}

/// Animate cursors and log summaries until `shutdown` completes or
/// reconnecting gives up. Closes the client either way.
async fn follow_room(
    client: &mut TransportClient,
    session: &Mutex<Session>,
    exhausted: &Notify,
    url: &str,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    tokio::pin!(shutdown);
    let mut frames = tokio::time::interval(FRAME);
    let mut summaries = tokio::time::interval(SUMMARY_INTERVAL);
    loop {
        tokio::select! {
            () = &mut shutdown => {
                tracing::info!("Shutting down");
                break;
            }
            () = exhausted.notified() => {
                client.close().await;
                anyhow::bail!("Gave up reconnecting to {url}");
            }
            _ = frames.tick() => {
                session
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .tick(Instant::now());
            }
            _ = summaries.tick() => {
                let session = session.lock().unwrap_or_else(PoisonError::into_inner);
                let snapshot = session.snapshot();
                tracing::info!(
                    state = ?client.state(),
                    elements = snapshot.len(),
                    visible = snapshot.visible_elements().count(),
                    scene_version = snapshot.scene_version(),
                    cursors = session.cursors().len(),
                    "Room summary"
                );
            }
        }
    }

    client.close().await;
    Ok(())
}
