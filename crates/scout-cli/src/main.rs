//! # scout-listen
//!
//! Connects to the Scout event stream and logs every payload received for
//! the requested event types. Runs until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use scout_core::logging::{LogFormat, init_subscriber_with_format};
use scout_realtime::{
    ClientConfig, ConnectionSupervisor, CredentialProvider, EventStreamClient, HttpTransport,
    ReachabilityProbe, SessionStore, Subscription, Transport,
};
use scout_settings::{ScoutSettings, load_settings_with_env, settings_path};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long shutdown waits for background tasks.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Scout real-time event listener.
#[derive(Parser, Debug)]
#[command(name = "scout-listen", about = "Listen to the Scout real-time event stream")]
struct Cli {
    /// Stream endpoint (overrides settings).
    #[arg(long)]
    endpoint: Option<String>,

    /// Session token appended to the stream URL.
    #[arg(long, env = "SCOUT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Event type to log. Repeatable.
    #[arg(long = "event", value_name = "TYPE", default_value = "message")]
    events: Vec<String>,

    /// Settings file (defaults to `~/.scout/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level or filter directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Load settings (file, then `env` overrides) and apply the
    /// command-line overrides on top.
    fn resolve_settings(&self, env: &dyn Fn(&str) -> Option<String>) -> Result<ScoutSettings> {
        let path = self.settings.clone().unwrap_or_else(settings_path);
        let mut settings = load_settings_with_env(&path, env)
            .with_context(|| format!("failed to load settings from {}", path.display()))?;
        if let Some(ref endpoint) = self.endpoint {
            settings.stream.endpoint.clone_from(endpoint);
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
        settings
            .validate()
            .context("invalid settings after command-line overrides")?;
        Ok(settings)
    }
}

/// Subscribe a logging handler for each requested event type.
fn subscribe_loggers(client: &EventStreamClient, events: &[String]) -> Vec<Subscription> {
    let subscriber = client.subscriber();
    events
        .iter()
        .map(|event_type| {
            let label = event_type.clone();
            subscriber.subscribe(event_type.as_str(), move |payload| {
                info!(event_type = %label, %payload, "event received");
            })
        })
        .collect()
}

/// Spawn the reachability probe.
///
/// With probing disabled the sender is dropped right away; the supervisor
/// keeps the last value (reachable) in effect.
fn start_reachability(
    settings: &ScoutSettings,
    cancel: &CancellationToken,
) -> Result<(watch::Receiver<bool>, Option<JoinHandle<()>>)> {
    let (tx, rx) = watch::channel(true);
    if !settings.reachability.enabled {
        info!("reachability probe disabled");
        return Ok((rx, None));
    }
    let probe = ReachabilityProbe::for_endpoint(&settings.stream.endpoint, &settings.reachability)
        .context("cannot derive probe address from stream endpoint")?;
    let task = tokio::spawn(probe.run(tx, cancel.clone()));
    Ok((rx, Some(task)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.resolve_settings(&|name| std::env::var(name).ok())?;

    let format = if settings.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_subscriber_with_format(&settings.logging.level, format);

    let session = Arc::new(SessionStore::new());
    match cli.token {
        Some(ref token) if !token.is_empty() => session.set_token(token.as_str()),
        _ => warn!("no session token (--token or SCOUT_TOKEN), stream will stay disconnected"),
    }

    let transport = HttpTransport::new(Duration::from_millis(settings.stream.connect_timeout_ms))
        .context("failed to build HTTP client")?;
    let client = Arc::new(EventStreamClient::new(
        ClientConfig::from_settings(&settings.stream),
        Arc::new(transport) as Arc<dyn Transport>,
        Arc::clone(&session) as Arc<dyn CredentialProvider>,
    ));
    let subscriptions = subscribe_loggers(&client, &cli.events);
    info!(
        endpoint = %settings.stream.endpoint,
        events = ?cli.events,
        "listening"
    );

    let cancel = CancellationToken::new();
    let (reachability, probe_task) = start_reachability(&settings, &cancel)?;

    let mut supervisor = ConnectionSupervisor::new(Arc::clone(&client));
    let session_rx = session.watch();
    let supervisor_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { supervisor.run(session_rx, reachability, cancel).await }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutting down");
    cancel.cancel();

    let mut handles = vec![supervisor_task];
    handles.extend(probe_task);
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, futures::future::join_all(handles))
        .await
        .is_err()
    {
        warn!("shutdown timed out after {SHUTDOWN_TIMEOUT:?}");
    }

    for subscription in &subscriptions {
        subscription.unsubscribe();
    }
    Ok(())
}
