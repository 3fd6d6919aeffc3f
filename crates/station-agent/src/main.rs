//! Station Agent - persistent station link CLI
//!
//! This binary keeps a self-healing link to a station relay open, tunnels
//! inbound HTTP requests to a local server, and logs connection state
//! transitions as they happen.

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use station_link::{
    BearerSigner, GeoPoint, HttpForwarder, LinkCollaborators, LinkConfig, LinkEvent, StationLink,
};
use station_transport_ws::WsTransportFactory;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Station agent - maintains a persistent link to a station relay
#[derive(Parser, Debug)]
#[command(name = "station-agent")]
#[command(about = "Station agent - maintains a persistent link to a station relay")]
#[command(version)]
#[command(long_about = r#"
The station agent connects to a station relay over a single WebSocket,
authenticates with a signed identity assertion, and keeps the link alive
through heartbeats and automatic reconnection. Inbound HTTP requests
tunneled by the station are forwarded to a local server.

EXAMPLES:
  # Connect with flags
  station-agent --station wss://station.example.org/link \
    --token $STATION_TOKEN \
    --address-id addr-1a2b \
    --forward http://localhost:3000

  # Connect using a config file
  station-agent --config agent.yaml

ENVIRONMENT VARIABLES:
  STATION_URL        Station relay URL
  STATION_TOKEN      Authentication token
  STATION_ADDRESS_ID Address identifier of this device
  STATION_FORWARD    Local base URL tunneled requests are forwarded to
"#)]
struct Args {
    /// Station relay URL (e.g. wss://station.example.org/link)
    #[arg(long, env = "STATION_URL")]
    station: Option<String>,

    /// Authentication token
    #[arg(long, env = "STATION_TOKEN")]
    token: Option<String>,

    /// Address identifier of this device
    #[arg(long, env = "STATION_ADDRESS_ID")]
    address_id: Option<String>,

    /// Display label advertised to the station (defaults to the hostname)
    #[arg(long)]
    label: Option<String>,

    /// Local base URL tunneled HTTP requests are forwarded to
    #[arg(long, env = "STATION_FORWARD")]
    forward: Option<String>,

    /// Approximate location as "lat,lon" (rounded before sending)
    #[arg(long)]
    location: Option<String>,

    /// Configuration file (YAML)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Where to write the link health snapshot
    #[arg(long)]
    diagnostics: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Configuration file format
#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    /// Station relay configuration
    station: StationFileConfig,

    /// Node identity
    #[serde(default)]
    node: NodeFileConfig,

    /// Local base URL tunneled requests are forwarded to
    #[serde(skip_serializing_if = "Option::is_none")]
    forward: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StationFileConfig {
    /// Station relay URL
    url: String,

    /// Environment variable name holding the auth token
    #[serde(skip_serializing_if = "Option::is_none")]
    token_env: Option<String>,

    /// Direct auth token (prefer token_env)
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct NodeFileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    address_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<String>,
}

/// Handler used when no local forward target is configured: every path is
/// unroutable, so tunneled requests still get their 404 response frame.
struct NoLocalServer;

#[async_trait::async_trait]
impl station_link::LocalHttpHandler for NoLocalServer {
    async fn handle(
        &self,
        _method: &str,
        path: &str,
        _headers: &std::collections::BTreeMap<String, String>,
        _body: Option<&[u8]>,
    ) -> Result<station_link::LocalResponse, station_link::HandlerError> {
        Err(station_link::HandlerError::NotFound(path.to_string()))
    }
}

/// Setup logging with the specified log level
fn setup_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("Invalid log level: {}", log_level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration from YAML file
fn load_config_file(path: &PathBuf) -> Result<ConfigFile> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: ConfigFile = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

fn parse_location(raw: &str) -> Result<GeoPoint> {
    let (lat, lon) = raw
        .split_once(',')
        .with_context(|| format!("Invalid location '{}' (expected 'lat,lon')", raw))?;
    Ok(GeoPoint {
        lat: lat.trim().parse().context("Invalid latitude")?,
        lon: lon.trim().parse().context("Invalid longitude")?,
    })
}

/// Merge CLI args with config file, giving precedence to CLI args
fn build_settings(args: &Args) -> Result<(LinkConfig, String, Option<String>)> {
    let (file_url, file_token, file_address_id, file_label, file_forward) =
        if let Some(config_path) = &args.config {
            info!("Loading configuration from: {}", config_path.display());
            let config_file = load_config_file(config_path)?;

            let token = if let Some(env_var) = &config_file.station.token_env {
                Some(
                    std::env::var(env_var)
                        .with_context(|| format!("Environment variable {} not set", env_var))?,
                )
            } else {
                config_file.station.token
            };

            (
                Some(config_file.station.url),
                token,
                config_file.node.address_id,
                config_file.node.label,
                config_file.forward,
            )
        } else {
            (None, None, None, None, None)
        };

    // CLI args override config file
    let station_url = args
        .station
        .clone()
        .or(file_url)
        .filter(|url| !url.is_empty())
        .context("Station URL is required (use --station or config file)")?;
    let token = args
        .token
        .clone()
        .or(file_token)
        .filter(|token| !token.is_empty())
        .context("Auth token is required (use --token, environment variable, or config file)")?;
    let address_id = args
        .address_id
        .clone()
        .or(file_address_id)
        .context("Address id is required (use --address-id or config file)")?;
    let forward = args.forward.clone().or(file_forward);

    let mut builder = LinkConfig::builder()
        .station_url(station_url)
        .address_id(address_id);
    if let Some(label) = args.label.clone().or(file_label) {
        builder = builder.label(label);
    }
    if let Some(raw) = &args.location {
        builder = builder.location(parse_location(raw)?);
    }
    if let Some(path) = &args.diagnostics {
        builder = builder.diagnostics_path(path.clone());
    }

    let config = builder
        .build()
        .map_err(|e| anyhow::anyhow!("Invalid link configuration: {e}"))?;

    Ok((config, token, forward))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args.log_level)?;

    info!("Station agent starting...");

    let (config, token, forward) =
        build_settings(&args).context("Failed to build agent configuration")?;

    info!("Station: {}", config.station_url);
    info!("Address id: {}", config.node.address_id);
    match &forward {
        Some(base_url) => info!("Forwarding tunneled requests to {}", base_url),
        None => warn!("No --forward target; tunneled requests will fail with 404"),
    }

    let http: Arc<dyn station_link::LocalHttpHandler> = match forward {
        Some(base_url) => Arc::new(HttpForwarder::new(base_url)),
        None => Arc::new(NoLocalServer),
    };

    let link = StationLink::spawn(
        config,
        LinkCollaborators {
            transport: Arc::new(WsTransportFactory::new()),
            signer: Arc::new(BearerSigner::new(token)),
            http,
            keepalive: None,
        },
    );

    let mut events = link.subscribe();
    let event_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(LinkEvent::Connected { station_id }) => {
                    info!(station_id = %station_id, "Connected to station");
                }
                Ok(LinkEvent::Disconnected) => {
                    warn!("Disconnected from station");
                }
                Ok(LinkEvent::UpdateNotice { fields }) => {
                    info!(notice = ?fields, "Station update notice");
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    if !link.connect().await.context("Connect failed")? {
        warn!("Initial connect attempt failed; the link will keep retrying");
    }

    // Wait for Ctrl+C
    tokio::signal::ctrl_c().await.context("Signal handler failed")?;
    info!("Received Ctrl+C, shutting down...");

    if let Err(e) = link.disconnect().await {
        error!(error = %e, "Disconnect failed");
    }
    event_task.abort();

    info!("Station agent stopped");
    Ok(())
}
