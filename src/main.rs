//! cbs-handshake
//!
//! Inspects how a connection would be set up, without touching the network.
//!
//! ## Usage
//!
//! ```bash
//! # Plan from a settings file
//! cbs-handshake plan --config hub.toml
//!
//! # Plan from flags / environment
//! IOTHUB_HOST_NAME=my-hub.azure-devices.net cbs-handshake plan \
//!     --protocol amqps_ws --proxy-host proxy.local --proxy-port 8888
//!
//! # Machine-readable output
//! cbs-handshake plan --config hub.toml --json
//! ```

use anyhow::Context;
use cbs_handshake::handshake::{plan_layers, select_endpoint, Endpoint, LayerPlan};
use cbs_handshake::{Protocol, ProxyOptions, Settings};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cbs-handshake")]
#[command(about = "Inspect AMQP/CBS connection setup for a hub")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show endpoint, transport layers and TLS resolution
    Plan(PlanArgs),
}

#[derive(Parser, Debug)]
struct PlanArgs {
    /// Path to settings file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Hub host name
    #[arg(long, env = "IOTHUB_HOST_NAME")]
    host_name: Option<String>,

    /// amqps or amqps_ws
    #[arg(long, env = "IOTHUB_PROTOCOL")]
    protocol: Option<Protocol>,

    /// SAS user name
    #[arg(long, env = "IOTHUB_USER_NAME")]
    user_name: Option<String>,

    /// Pre-computed SAS token
    #[arg(long, env = "IOTHUB_SAS_TOKEN", hide_env_values = true)]
    sas_token: Option<String>,

    /// Proxy host (keeps the file's port and credentials)
    #[arg(long, env = "IOTHUB_PROXY_HOST")]
    proxy_host: Option<String>,

    /// Proxy port (required when the file has no proxy)
    #[arg(long, env = "IOTHUB_PROXY_PORT")]
    proxy_port: Option<u16>,

    /// PEM bundle trusted in addition to the default roots
    #[arg(long)]
    ca_bundle: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct PlanReport {
    host_name: String,
    protocol: Protocol,
    endpoint: Endpoint,
    layers: LayerPlan,
    websocket_upgrade: Option<Vec<String>>,
    proxy_connect: Option<String>,
    tls: Result<&'static str, String>,
    timeout_secs: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("cbs_handshake=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Plan(plan) => run_plan(plan),
    }
}

/// Override only the proxy fields given on the command line.
fn apply_proxy_overrides(
    settings: &mut Settings,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    if let Some(proxy) = settings.proxy.as_mut() {
        if let Some(host) = host {
            proxy.host = host;
        }
        if let Some(port) = port {
            proxy.port = port;
        }
        return Ok(());
    }

    match (host, port) {
        (None, None) => {}
        (Some(host), Some(port)) => settings.proxy = Some(ProxyOptions::new(host, port)),
        (Some(_), None) => {
            anyhow::bail!("--proxy-port is required when the settings have no proxy")
        }
        (None, Some(_)) => {
            anyhow::bail!("--proxy-host is required when the settings have no proxy")
        }
    }
    Ok(())
}

fn run_plan(args: PlanArgs) -> anyhow::Result<()> {
    let mut settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    // Apply CLI overrides
    if let Some(host) = args.host_name {
        settings.host_name = host;
    }
    if let Some(protocol) = args.protocol {
        settings.protocol = protocol;
    }
    if let Some(user) = args.user_name {
        settings.user_name = Some(user);
    }
    if let Some(token) = args.sas_token {
        settings.sas_token = Some(token);
    }
    apply_proxy_overrides(&mut settings, args.proxy_host, args.proxy_port)?;
    if let Some(path) = args.ca_bundle {
        settings.ca_bundle = Some(path);
    }

    // A plan does not need real credentials.
    if settings.user_name.is_none() && settings.sas_token.is_none() {
        debug!("No SAS credentials given, using placeholders for planning");
        settings.user_name = Some("planner".into());
        settings.sas_token = Some("SharedAccessSignature sr=placeholder".into());
    }

    let config = settings
        .to_connection_config()
        .context("Invalid connection settings")?;

    let endpoint = select_endpoint(&config);
    let layers = plan_layers(&config).context("Invalid transport layers")?;

    let websocket_upgrade = match &layers.websocket {
        Some(ws) => {
            let request = ws.upgrade_request()?;
            let mut lines = vec![format!("GET {} HTTP/1.1", request.uri())];
            for (name, value) in request.headers() {
                lines.push(format!("{}: {}", name, value.to_str().unwrap_or("<binary>")));
            }
            Some(lines)
        }
        None => None,
    };
    let proxy_connect = layers.proxy.as_ref().map(|p| p.connect_request());
    let tls = config.tls.resolve().map(|_| "ok");

    let report = PlanReport {
        host_name: config.host_name.clone(),
        protocol: config.protocol,
        endpoint,
        layers,
        websocket_upgrade,
        proxy_connect,
        tls,
        timeout_secs: settings.timeout_secs,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    info!(host = %report.host_name, "Connection plan ready");
    println!("host:      {}", report.host_name);
    println!("protocol:  {:?}", report.protocol);
    println!("endpoint:  {}", report.endpoint);
    println!("sasl:      {}", report.layers.sasl_mechanism);
    if let Some(lines) = &report.websocket_upgrade {
        println!("websocket:");
        for line in lines {
            println!("  {}", line);
        }
    }
    if let Some(connect) = &report.proxy_connect {
        println!("proxy:");
        for line in connect.lines().filter(|l| !l.is_empty()) {
            println!("  {}", line);
        }
    }
    match &report.tls {
        Ok(_) => println!("tls:       context resolved"),
        Err(e) => println!("tls:       FAILED ({})", e),
    }
    println!("timeout:   {}s", report.timeout_secs);

    Ok(())
}
