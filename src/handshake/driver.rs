//! Handshake Driver
//!
//! Single responsibility: feed engine events to one controller and wait, with
//! a deadline, for the attempt to settle.
//!
//! The engine gets an [`EventSink`] and pushes lifecycle events from its own
//! thread or task. `establish()` drains the matching [`EventQueue`] one event
//! at a time, so the controller is only ever touched from the caller's task.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use super::controller::Controller;
use super::engine::{Engine, EngineEvent};
use super::transport::Endpoint;
use crate::config::ConnectionConfig;
use crate::error::Result;

/// Engine-side handle of the event queue.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EventSink {
    /// Push an event. Returns false once the handshake side is gone.
    pub fn emit(&self, event: EngineEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Handshake-side end of the event queue.
#[derive(Debug)]
pub struct EventQueue {
    rx: mpsc::UnboundedReceiver<EngineEvent>,
}

impl EventQueue {
    pub async fn next(&mut self) -> Option<EngineEvent> {
        self.rx.recv().await
    }
}

/// Create a connected sink/queue pair.
pub fn event_queue() -> (EventSink, EventQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, EventQueue { rx })
}

/// Summary of a successful handshake.
#[derive(Debug, Clone)]
pub struct HandshakeReport {
    pub endpoint: Option<Endpoint>,
    pub container_id: String,
    pub authenticated: bool,
    pub elapsed: Duration,
}

/// Run one connection attempt to a verdict.
///
/// Returns when the attempt settles, the deadline passes, or the engine drops
/// its sink, whichever comes first. A timeout too large to add to the current
/// instant means no deadline.
///
/// # Errors
/// - Invalid configuration (before any engine call)
/// - Transport protocol error reported by the engine
/// - TLS/proxy/WebSocket setup or authentication failure
/// - Timeout
pub async fn establish<E: Engine + ?Sized>(
    config: ConnectionConfig,
    engine: &mut E,
    queue: &mut EventQueue,
    timeout: Duration,
) -> Result<HandshakeReport> {
    let mut controller = Controller::new(config)?;
    let started = Instant::now();
    // None when the timeout is too large to represent: wait without a deadline.
    let deadline = started.checked_add(timeout);

    info!(
        host = %controller.config().host_name,
        protocol = ?controller.config().protocol,
        container_id = %controller.container_id(),
        timeout_ms = timeout.as_millis() as u64,
        "Establishing AMQP connection"
    );

    while !controller.is_settled() {
        let next = match deadline {
            Some(deadline) => timeout_at(deadline, queue.next()).await,
            None => Ok(queue.next().await),
        };
        match next {
            Ok(Some(event)) => controller.handle(engine, event),
            Ok(None) => {
                warn!("Engine event queue closed before handshake settled");
                break;
            }
            Err(_) => {
                debug!("Handshake deadline elapsed");
                break;
            }
        }
    }

    controller.verify_handshake_completed()?;

    let report = HandshakeReport {
        endpoint: controller.endpoint().cloned(),
        container_id: controller.container_id().to_string(),
        authenticated: controller.is_authenticated(),
        elapsed: started.elapsed(),
    };
    info!(
        container_id = %report.container_id,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "AMQP connection established"
    );
    Ok(report)
}
