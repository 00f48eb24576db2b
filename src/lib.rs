//! cbs-handshake - AMQP connection setup with claims-based security
//!
//! Drives the connection phase of an AMQP service client: transport
//! bootstrapping (TLS, optional WebSocket framing, optional HTTP proxy
//! tunnel), a dedicated CBS side session that puts the authentication token,
//! and a single verdict once the peer has confirmed connection, session and
//! link.
//!
//! ## What Lives Elsewhere
//!
//! | Concern                              | Owner                        |
//! |--------------------------------------|------------------------------|
//! | Sockets, framing, SASL, reactor loop | the engine (`handshake::Engine`) |
//! | Token issuance                       | a `credential::TokenProvider` |
//! | Retry / reconnect policy             | the caller                   |
//!
//! ## Ports and Paths
//!
//! - `amqps`: hub host, port 5671
//! - `amqps_ws`: hub host (or proxy), port 443, upgrade path
//!   `/$iothub/websocket`, sub-protocol `AMQPWSB10`

pub mod config;
pub mod credential;
pub mod error;
pub mod handshake;
pub mod tls;

// Re-exports
pub use config::{ConnectionConfig, Credentials, Protocol, ProxyOptions, ServiceLink, Settings};
pub use credential::{AccessToken, CbsAuthorizationType, StaticTokenProvider, TokenProvider};
pub use error::{AuthError, ErrorCondition, FailureCause, HandshakeError, Stage};
pub use handshake::{establish, event_queue, Controller, Engine, EngineEvent, HandshakeReport};
pub use tls::{TlsContext, TlsSource};
