//! # ember
//!
//! Command-line client for the Ember realtime channel: checks the
//! subscription, listens for events or sends one.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ember_core::{ConnectionState, SessionError};
use ember_realtime::{
    AuthTokenStore, EnvTokenStore, FileTokenStore, HttpEntitlementService, LoggingNavigator,
    RealtimeConfig, RealtimeSessionManager, StaticTokenStore, WsTransportFactory,
};
use ember_settings::EmberSettings;
use ember_telemetry::TelemetryConfig;
use serde_json::Value;

/// Ember realtime client.
#[derive(Parser, Debug)]
#[command(name = "ember", version, about = "Ember realtime client")]
struct Cli {
    /// Settings file (defaults to `~/.ember/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Realtime endpoint (overrides settings).
    #[arg(long)]
    url: Option<String>,

    /// Bearer token. Falls back to `--token-file`, then `EMBER_AUTH_TOKEN`.
    #[arg(long, conflicts_with = "token_file")]
    token: Option<String>,

    /// File holding the bearer token.
    #[arg(long)]
    token_file: Option<PathBuf>,

    /// Print Prometheus metrics on exit.
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check whether the account has an active subscription.
    Check,
    /// Connect and print inbound events until Ctrl-C.
    Listen {
        /// Event names to subscribe to.
        #[arg(long = "event", required = true)]
        events: Vec<String>,
    },
    /// Connect, send one event and disconnect.
    Send {
        /// Event name.
        #[arg(long)]
        event: String,
        /// JSON payload.
        #[arg(long, default_value = "{}")]
        data: String,
    },
}

impl Cli {
    fn load_settings(&self) -> Result<EmberSettings> {
        let mut settings = match &self.settings {
            Some(path) => ember_settings::load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => ember_settings::load_settings().context("Failed to load settings")?,
        };
        if let Some(url) = &self.url {
            settings.realtime.url.clone_from(url);
        }
        Ok(settings)
    }

    fn token_store(&self) -> Arc<dyn AuthTokenStore> {
        if let Some(token) = &self.token {
            Arc::new(StaticTokenStore::new(token.as_str()))
        } else if let Some(path) = &self.token_file {
            Arc::new(FileTokenStore::new(path))
        } else {
            Arc::new(EnvTokenStore::default())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;

    let _telemetry = ember_telemetry::init_telemetry(TelemetryConfig::from(&settings.logging))
        .context("Failed to initialize logging")?;
    let metrics = if cli.metrics {
        Some(ember_telemetry::install_recorder().context("Failed to install metrics recorder")?)
    } else {
        None
    };

    let tokens = cli.token_store();
    let entitlement = HttpEntitlementService::new(&settings.api, Arc::clone(&tokens))
        .context("Failed to build HTTP client")?;
    tracing::debug!(url = entitlement.url(), "entitlement endpoint");

    let manager = RealtimeSessionManager::builder(
        Arc::new(entitlement),
        tokens,
        Arc::new(LoggingNavigator),
        Arc::new(WsTransportFactory),
    )
    .config(RealtimeConfig::from(&settings.realtime))
    .build();

    let result = run(&manager, cli.command).await;
    manager.disconnect();

    if let Some(handle) = metrics {
        print!("{}", ember_telemetry::render(&handle));
    }
    result
}

async fn run(manager: &RealtimeSessionManager, command: Command) -> Result<()> {
    match command {
        Command::Check => {
            let active = manager.check_entitlement().await?;
            println!("subscription: {}", if active { "active" } else { "inactive" });
            Ok(())
        }
        Command::Listen { events } => {
            for name in events {
                let label = name.clone();
                manager.on(name, move |payload: &Value| println!("{label} {payload}"));
            }
            connect(manager).await?;
            wait_until_ended(manager).await
        }
        Command::Send { event, data } => {
            let payload: Value =
                serde_json::from_str(&data).context("--data must be valid JSON")?;
            connect(manager).await?;
            if !manager.emit(&event, payload) {
                bail!("failed to send '{event}'");
            }
            tracing::info!(event = %event, "sent");
            Ok(())
        }
    }
}

async fn connect(manager: &RealtimeSessionManager) -> Result<()> {
    let outcome = manager.connect().await;
    if !outcome.is_connected() {
        match manager.last_error() {
            Some(err) => bail!("connect {}: {err}", outcome.as_str()),
            None => bail!("connect {}", outcome.as_str()),
        }
    }
    tracing::info!(socket_id = ?manager.socket_id(), "connected");
    Ok(())
}

/// Block until Ctrl-C or until the session ends for good.
async fn wait_until_ended(manager: &RealtimeSessionManager) -> Result<()> {
    let mut states = manager.subscribe_state();
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                tracing::info!("shutting down");
                return Ok(());
            }
            changed = states.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let state = *states.borrow_and_update();
                match state {
                    ConnectionState::Denied | ConnectionState::Failed | ConnectionState::Idle => {
                        let reason = manager
                            .last_error()
                            .map_or_else(|| state.to_string(), |e| e.to_string());
                        bail!("session ended: {reason}");
                    }
                    ConnectionState::Disconnected
                        if matches!(
                            manager.last_error(),
                            Some(SessionError::ReconnectExhausted(_))
                        ) =>
                    {
                        bail!("session lost: reconnect attempts exhausted");
                    }
                    _ => {}
                }
            }
        }
    }
}
