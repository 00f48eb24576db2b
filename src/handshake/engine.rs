//! Transport Engine Surface
//!
//! Single responsibility: describe what the handshake needs from the external
//! AMQP engine, and what the engine tells the handshake.
//!
//! The engine owns sockets, framing, SASL and the reactor loop. It calls back
//! into the handshake by pushing [`EngineEvent`]s onto the event queue; the
//! handshake reacts by calling [`Engine`] methods. Nothing here blocks.

use serde::{Deserialize, Serialize};

use super::cbs::CbsClaim;
use super::transport::TransportLayer;
use crate::error::ErrorCondition;
use crate::tls::TlsDomain;

/// Engine-assigned handle of a protocol session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u32);

/// Engine-assigned handle of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkRole {
    Sender,
    Receiver,
}

/// What to open: a named link to a node address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSpec {
    pub name: String,
    pub address: String,
    pub role: LinkRole,
}

impl LinkSpec {
    pub fn new(name: impl Into<String>, address: impl Into<String>, role: LinkRole) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            role,
        }
    }
}

/// Requests the handshake issues to the engine.
///
/// Every method returns immediately; confirmations arrive later as events.
pub trait Engine {
    /// Start connecting the reactor to `host:port`.
    fn connect_to_host(&mut self, host: &str, port: u16);

    /// Append a layer to the bound transport. Later layers sit closer to the
    /// socket.
    fn add_transport_layer(&mut self, layer: TransportLayer);

    /// Restrict the SASL mechanisms offered on the bound transport.
    fn set_sasl_mechanisms(&mut self, mechanisms: &[&str]);

    /// Install TLS on the bound transport.
    fn set_tls(&mut self, domain: TlsDomain);

    /// Hostname advertised in the AMQP open frame.
    fn set_hostname(&mut self, hostname: &str);

    /// Send the AMQP open frame.
    fn open_connection(&mut self, container_id: &str);

    /// Begin a new session on the open connection.
    fn open_session(&mut self) -> SessionId;

    /// Attach a link on a session.
    fn open_link(&mut self, session: SessionId, spec: &LinkSpec) -> LinkId;

    /// Encode and send a CBS claim on a sender link.
    fn send_claim(&mut self, link: LinkId, claim: &CbsClaim) -> Result<(), String>;
}

/// Lifecycle notifications delivered by the engine, one at a time.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The reactor is starting; pick the target endpoint.
    ReactorInit,
    /// The raw transport is bound; no bytes exchanged yet.
    ConnectionBound,
    /// The local connection object exists and can be opened.
    ConnectionInit,
    /// The peer answered the open frame.
    ConnectionRemoteOpen,
    SessionRemoteOpen(SessionId),
    LinkRemoteOpen(LinkId),
    /// A disposition/response arrived on a CBS receiver link.
    CbsResponse {
        link: LinkId,
        status: u16,
        description: Option<String>,
    },
    /// Engine diagnostics channel: transport-level protocol error.
    TransportError(ErrorCondition),
    ConnectionRemoteClose(Option<ErrorCondition>),
    SessionRemoteClose(SessionId, Option<ErrorCondition>),
    LinkRemoteClose(LinkId, Option<ErrorCondition>),
}
