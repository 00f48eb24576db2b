//! Transport Layer Selection
//!
//! Single responsibility: decide where the reactor connects and which layers
//! wrap the raw transport before AMQP framing starts.
//! No knowledge of the engine, sessions or authentication.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Serialize;
use tokio_tungstenite::tungstenite::{
    handshake::client::generate_key,
    http::{uri::Authority, Request, Uri},
};
use tracing::debug;

use crate::config::{
    ConnectionConfig, Protocol, ProxyOptions, AMQPS_PORT, AMQPS_WS_PORT, WEBSOCKET_PATH,
    WEBSOCKET_SUB_PROTOCOL,
};
use crate::error::FailureCause;

/// SASL mechanism forced on the transport. Real authentication happens
/// later over CBS.
pub const SASL_MECHANISM: &str = "ANONYMOUS";

/// Host and port the reactor connects to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Pick the reactor target.
///
/// WebSocket connections go to the proxy when one is configured, otherwise
/// to the hub on 443. Plain AMQP always goes to the hub on 5671.
pub fn select_endpoint(config: &ConnectionConfig) -> Endpoint {
    match (config.protocol, &config.proxy) {
        (Protocol::AmqpsWs, Some(proxy)) => Endpoint {
            host: proxy.host.clone(),
            port: proxy.port,
        },
        (Protocol::AmqpsWs, None) => Endpoint {
            host: config.host_name.clone(),
            port: AMQPS_WS_PORT,
        },
        (Protocol::Amqps, _) => Endpoint {
            host: config.host_name.clone(),
            port: AMQPS_PORT,
        },
    }
}

/// WebSocket framing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebSocketLayer {
    pub host: String,
    pub path: &'static str,
    pub port: u16,
    pub sub_protocol: &'static str,
}

impl WebSocketLayer {
    /// Layer for the hub's WebSocket endpoint.
    pub fn for_host(host: &str) -> Result<Self, FailureCause> {
        let layer = Self {
            host: host.to_string(),
            path: WEBSOCKET_PATH,
            port: AMQPS_WS_PORT,
            sub_protocol: WEBSOCKET_SUB_PROTOCOL,
        };
        layer.uri()?;
        Ok(layer)
    }

    pub fn uri(&self) -> Result<Uri, FailureCause> {
        format!("wss://{}:{}{}", self.host, self.port, self.path)
            .parse::<Uri>()
            .map_err(|e| FailureCause::WebSocket(format!("Invalid WebSocket URI: {}", e)))
    }

    /// The HTTP upgrade request the framing layer sends first.
    pub fn upgrade_request(&self) -> Result<Request<()>, FailureCause> {
        Request::builder()
            .uri(self.uri()?)
            .header("Host", format!("{}:{}", self.host, self.port))
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", generate_key())
            .header("Sec-WebSocket-Protocol", self.sub_protocol)
            .body(())
            .map_err(|e| FailureCause::WebSocket(format!("Failed to build request: {}", e)))
    }
}

/// HTTP CONNECT tunnel configuration.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct ProxyLayer {
    /// The true destination, `host:443`
    pub destination: String,
    #[serde(skip)]
    credentials: Option<(String, String)>,
}

impl std::fmt::Debug for ProxyLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyLayer")
            .field("destination", &self.destination)
            .field("authenticated", &self.credentials.is_some())
            .finish()
    }
}

impl ProxyLayer {
    /// Tunnel to the hub's WebSocket port through `proxy`.
    pub fn new(host: &str, proxy: &ProxyOptions) -> Result<Self, FailureCause> {
        let destination = format!("{}:{}", host, AMQPS_WS_PORT);
        destination
            .parse::<Authority>()
            .map_err(|e| FailureCause::Proxy(format!("Invalid tunnel destination: {}", e)))?;

        let credentials = match (&proxy.username, &proxy.password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            (Some(user), None) => Some((user.clone(), String::new())),
            _ => None,
        };

        Ok(Self {
            destination,
            credentials,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.is_some()
    }

    /// The CONNECT request sent to the proxy.
    pub fn connect_request(&self) -> String {
        let mut request = format!(
            "CONNECT {dest} HTTP/1.1\r\nHost: {dest}\r\n",
            dest = self.destination
        );
        if let Some((user, pass)) = &self.credentials {
            let encoded = BASE64.encode(format!("{}:{}", user, pass));
            request.push_str(&format!("Proxy-Authorization: Basic {}\r\n", encoded));
        }
        request.push_str("\r\n");
        request
    }
}

/// A layer inserted into the bound transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportLayer {
    WebSocket(WebSocketLayer),
    Proxy(ProxyLayer),
}

/// Everything the controller installs on a bound transport, in order:
/// WebSocket framing, SASL restriction, TLS (built separately), proxy tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerPlan {
    pub websocket: Option<WebSocketLayer>,
    pub sasl_mechanism: &'static str,
    pub proxy: Option<ProxyLayer>,
}

/// Decide the layer stack for a configuration.
pub fn plan_layers(config: &ConnectionConfig) -> Result<LayerPlan, FailureCause> {
    let websocket = if config.protocol.is_websocket() {
        Some(WebSocketLayer::for_host(&config.host_name)?)
    } else {
        None
    };

    // Inserted for both protocols. Only the reactor endpoint differs.
    let proxy = match &config.proxy {
        Some(proxy) => {
            if !config.protocol.is_websocket() {
                debug!(
                    proxy_host = %proxy.host,
                    "Proxy layer added for plain AMQP, reactor still targets the hub"
                );
            }
            Some(ProxyLayer::new(&config.host_name, proxy)?)
        }
        None => None,
    };

    Ok(LayerPlan {
        websocket,
        sasl_mechanism: SASL_MECHANISM,
        proxy,
    })
}
