//! Configuration for cbs-handshake
//!
//! `ConnectionConfig` is the immutable per-connection input of the handshake.
//! `Settings` is its file form (TOML), used by the binary and by callers that
//! keep connection details on disk.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::credential::{CbsAuthorizationType, TokenProvider};
use crate::error::{HandshakeError, Result};
use crate::handshake::engine::{LinkRole, LinkSpec};
use crate::tls::{TlsContext, TlsSource};

/// Upgrade path of the hub's WebSocket endpoint
pub const WEBSOCKET_PATH: &str = "/$iothub/websocket";
/// Sub-protocol token negotiated during the WebSocket upgrade
pub const WEBSOCKET_SUB_PROTOCOL: &str = "AMQPWSB10";
/// Plain AMQP over TLS
pub const AMQPS_PORT: u16 = 5671;
/// AMQP over WebSocket, also the tunnel destination port behind a proxy
pub const AMQPS_WS_PORT: u16 = 443;

/// Which transport variant carries AMQP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    Amqps,
    AmqpsWs,
}

impl Protocol {
    pub fn is_websocket(&self) -> bool {
        matches!(self, Self::AmqpsWs)
    }
}

impl std::str::FromStr for Protocol {
    type Err = HandshakeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "amqps" => Ok(Self::Amqps),
            "amqps_ws" | "amqps-ws" | "websocket" => Ok(Self::AmqpsWs),
            other => Err(HandshakeError::InvalidArgument(format!(
                "Unknown protocol '{other}' (expected amqps or amqps_ws)"
            ))),
        }
    }
}

/// HTTP proxy the WebSocket variant tunnels through.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyOptions {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ProxyOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

impl fmt::Debug for ProxyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// The two mutually exclusive ways of authenticating over CBS.
#[derive(Clone)]
pub enum Credentials {
    /// Pre-computed shared access signature.
    SharedAccessSignature { user_name: String, sas_token: String },
    /// Tokens fetched from a provider when the CBS links come up.
    TokenCredential {
        provider: Arc<dyn TokenProvider>,
        authorization_type: CbsAuthorizationType,
    },
}

impl Credentials {
    /// The claims flavor these credentials are presented as.
    pub fn authorization_type(&self) -> CbsAuthorizationType {
        match self {
            Self::SharedAccessSignature { .. } => CbsAuthorizationType::SharedAccessSignature,
            Self::TokenCredential {
                authorization_type, ..
            } => *authorization_type,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SharedAccessSignature { user_name, .. } => f
                .debug_struct("SharedAccessSignature")
                .field("user_name", user_name)
                .field("sas_token", &"<redacted>")
                .finish(),
            Self::TokenCredential {
                authorization_type, ..
            } => f
                .debug_struct("TokenCredential")
                .field("authorization_type", authorization_type)
                .finish_non_exhaustive(),
        }
    }
}

/// Application link opened once the connection is authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceLink {
    /// Sender for cloud-to-device messages
    CloudToDeviceMessages,
    /// Receiver for delivery feedback
    Feedback,
    /// Receiver for file upload notifications
    FileNotifications,
    /// Any other link
    Custom(LinkSpec),
}

impl ServiceLink {
    pub fn link_spec(&self) -> LinkSpec {
        match self {
            Self::CloudToDeviceMessages => LinkSpec::new(
                "cloud-to-device-sender",
                "/messages/devicebound",
                LinkRole::Sender,
            ),
            Self::Feedback => LinkSpec::new(
                "feedback-receiver",
                "/messages/serviceBound/feedback",
                LinkRole::Receiver,
            ),
            Self::FileNotifications => LinkSpec::new(
                "file-notification-receiver",
                "/messages/serviceBound/filenotifications",
                LinkRole::Receiver,
            ),
            Self::Custom(spec) => spec.clone(),
        }
    }
}

/// Per-connection configuration, owned by the handshake controller.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host_name: String,
    pub protocol: Protocol,
    pub proxy: Option<ProxyOptions>,
    pub tls: TlsSource,
    pub credentials: Credentials,
    pub service_link: Option<ServiceLink>,
}

impl ConnectionConfig {
    /// Shared-access-signature mode. Fails fast on empty fields.
    pub fn shared_access_signature(
        host_name: impl Into<String>,
        user_name: impl Into<String>,
        sas_token: impl Into<String>,
        protocol: Protocol,
    ) -> Result<Self> {
        let config = Self {
            host_name: host_name.into(),
            protocol,
            proxy: None,
            tls: TlsSource::Default,
            credentials: Credentials::SharedAccessSignature {
                user_name: user_name.into(),
                sas_token: sas_token.into(),
            },
            service_link: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Token-credential mode. Fails fast on an empty host.
    pub fn token_credential(
        host_name: impl Into<String>,
        provider: Arc<dyn TokenProvider>,
        authorization_type: CbsAuthorizationType,
        protocol: Protocol,
    ) -> Result<Self> {
        let config = Self {
            host_name: host_name.into(),
            protocol,
            proxy: None,
            tls: TlsSource::Default,
            credentials: Credentials::TokenCredential {
                provider,
                authorization_type,
            },
            service_link: None,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_proxy(mut self, proxy: ProxyOptions) -> Result<Self> {
        self.proxy = Some(proxy);
        self.validate()?;
        Ok(self)
    }

    pub fn with_tls_context(mut self, context: TlsContext) -> Self {
        self.tls = TlsSource::Supplied(context);
        self
    }

    pub fn with_ca_bundle(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls = TlsSource::CaBundle(path.into());
        self
    }

    pub fn with_service_link(mut self, link: ServiceLink) -> Self {
        self.service_link = Some(link);
        self
    }

    /// Check the invariants the controller relies on.
    pub fn validate(&self) -> Result<()> {
        if self.host_name.trim().is_empty() {
            return Err(HandshakeError::empty("hostName"));
        }

        if let Credentials::SharedAccessSignature {
            user_name,
            sas_token,
        } = &self.credentials
        {
            if user_name.is_empty() {
                return Err(HandshakeError::empty("userName"));
            }
            if sas_token.is_empty() {
                return Err(HandshakeError::empty("sasToken"));
            }
        }

        if let Some(proxy) = &self.proxy {
            if proxy.host.trim().is_empty() {
                return Err(HandshakeError::empty("proxy host"));
            }
            if proxy.port == 0 {
                return Err(HandshakeError::InvalidArgument(
                    "proxy port must be non-zero".into(),
                ));
            }
        }

        Ok(())
    }
}

fn default_timeout_secs() -> u64 {
    60
}

/// File form of a connection (SAS mode only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Hub host name, e.g. "my-hub.azure-devices.net"
    #[serde(default)]
    pub host_name: String,

    #[serde(default)]
    pub protocol: Protocol,

    #[serde(default)]
    pub user_name: Option<String>,

    #[serde(default)]
    pub sas_token: Option<String>,

    #[serde(default)]
    pub proxy: Option<ProxyOptions>,

    /// Extra PEM roots trusted on top of the default set
    #[serde(default)]
    pub ca_bundle: Option<PathBuf>,

    #[serde(default)]
    pub service_link: Option<ServiceLink>,

    /// How long a caller waits for the handshake to settle
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host_name: String::new(),
            protocol: Protocol::default(),
            user_name: None,
            sas_token: None,
            proxy: None,
            ca_bundle: None,
            service_link: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| HandshakeError::Config(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| HandshakeError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Save settings to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| HandshakeError::Config(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| HandshakeError::Config(e.to_string()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Build the validated connection configuration.
    pub fn to_connection_config(&self) -> Result<ConnectionConfig> {
        let mut config = ConnectionConfig::shared_access_signature(
            self.host_name.clone(),
            self.user_name.clone().unwrap_or_default(),
            self.sas_token.clone().unwrap_or_default(),
            self.protocol,
        )?;

        if let Some(proxy) = &self.proxy {
            config = config.with_proxy(proxy.clone())?;
        }
        if let Some(path) = &self.ca_bundle {
            config = config.with_ca_bundle(path.clone());
        }
        if let Some(link) = &self.service_link {
            config = config.with_service_link(link.clone());
        }

        Ok(config)
    }
}
