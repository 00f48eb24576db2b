//! AMQP Connection Handshake Module
//!
//! Establishes and authenticates one AMQP connection to a hub, on top of an
//! external protocol engine.
//!
//! # Architecture
//!
//! | Module       | Responsibility                                          |
//! |--------------|---------------------------------------------------------|
//! | `transport`  | Endpoint and transport layer selection                  |
//! | `engine`     | What the handshake asks of the engine, and its events   |
//! | `callback`   | Authentication outcome contract                         |
//! | `cbs`        | Claims exchange on the `$cbs` side session              |
//! | `controller` | State machine deciding the verdict                      |
//! | `driver`     | Event queue and deadline-aware wait                     |
//!
//! # Usage
//!
//! ```ignore
//! use cbs_handshake::{establish, event_queue, ConnectionConfig, Protocol};
//!
//! let config = ConnectionConfig::shared_access_signature(
//!     "my-hub.azure-devices.net",
//!     "iothubowner@sas.root.my-hub",
//!     sas_token,
//!     Protocol::AmqpsWs,
//! )?;
//!
//! let (sink, mut queue) = event_queue();
//! let mut engine = MyEngine::new(sink); // pushes EngineEvents into `sink`
//!
//! let report = establish(config, &mut engine, &mut queue, Duration::from_secs(60)).await?;
//! ```
//!
//! # Verdict
//!
//! Every failure is held until the end and reported once, in this order:
//! engine protocol error, first saved failure (TLS/proxy setup or
//! authentication), missing remote confirmation (timeout). Otherwise the
//! handshake succeeded.

pub mod callback;
pub mod cbs;
pub mod controller;
pub mod driver;
pub mod engine;
pub mod transport;

pub use callback::{AuthOutcome, AuthenticationListener, OutcomeSlot};
pub use cbs::{CbsClaim, CbsSession};
pub use controller::{Controller, HandshakeState, Phase};
pub use driver::{establish, event_queue, EventQueue, EventSink, HandshakeReport};
pub use engine::{Engine, EngineEvent, LinkId, LinkRole, LinkSpec, SessionId};
pub use transport::{plan_layers, select_endpoint, Endpoint, LayerPlan, ProxyLayer, TransportLayer, WebSocketLayer};
