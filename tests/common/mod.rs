//! Scripted engine shared by the integration tests.
//!
//! Records every request the handshake makes and, depending on its script,
//! answers them the way a cooperative hub would by pushing events back onto
//! the queue.

#![allow(dead_code)]

use cbs_handshake::handshake::{
    CbsClaim, Engine, EngineEvent, EventSink, LinkId, LinkRole, LinkSpec, SessionId,
    TransportLayer,
};
use cbs_handshake::tls::TlsDomain;

/// One request made by the handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect { host: String, port: u16 },
    AddLayer(TransportLayer),
    Sasl(Vec<String>),
    Tls { has_context: bool },
    Hostname(String),
    OpenConnection(String),
    OpenSession(SessionId),
    OpenLink(SessionId, LinkSpec, LinkId),
    SendClaim(LinkId, CbsClaim),
}

/// How the simulated hub answers.
#[derive(Debug, Clone)]
pub struct Script {
    /// Bind the transport and init the connection after connect
    pub bind: bool,
    /// Answer the open frame
    pub open_connection: bool,
    /// Confirm sessions as they open
    pub open_sessions: bool,
    /// Confirm CBS links
    pub open_cbs_links: bool,
    /// Confirm application links
    pub open_service_links: bool,
    /// Status returned for the put-token claim, None for silence
    pub cbs_status: Option<u16>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            bind: true,
            open_connection: true,
            open_sessions: true,
            open_cbs_links: true,
            open_service_links: true,
            cbs_status: Some(200),
        }
    }
}

pub struct ScriptedEngine {
    pub calls: Vec<Call>,
    pub script: Script,
    sink: Option<EventSink>,
    next_id: u32,
    cbs_receiver: Option<LinkId>,
}

impl ScriptedEngine {
    /// An engine that answers by pushing into `sink`.
    pub fn new(sink: EventSink, script: Script) -> Self {
        Self {
            calls: Vec::new(),
            script,
            sink: Some(sink),
            next_id: 0,
            cbs_receiver: None,
        }
    }

    /// An engine that only records; the test drives every event itself.
    pub fn silent() -> Self {
        Self {
            calls: Vec::new(),
            script: Script::default(),
            sink: None,
            next_id: 0,
            cbs_receiver: None,
        }
    }

    pub fn cbs_receiver(&self) -> Option<LinkId> {
        self.cbs_receiver
    }

    pub fn claims(&self) -> Vec<&CbsClaim> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::SendClaim(_, claim) => Some(claim),
                _ => None,
            })
            .collect()
    }

    pub fn layers(&self) -> Vec<&TransportLayer> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::AddLayer(layer) => Some(layer),
                _ => None,
            })
            .collect()
    }

    pub fn position(&self, pred: impl Fn(&Call) -> bool) -> Option<usize> {
        self.calls.iter().position(pred)
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(sink) = &self.sink {
            sink.emit(event);
        }
    }

    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

impl Engine for ScriptedEngine {
    fn connect_to_host(&mut self, host: &str, port: u16) {
        self.calls.push(Call::Connect {
            host: host.to_string(),
            port,
        });
        if self.script.bind {
            self.emit(EngineEvent::ConnectionBound);
            self.emit(EngineEvent::ConnectionInit);
        }
    }

    fn add_transport_layer(&mut self, layer: TransportLayer) {
        self.calls.push(Call::AddLayer(layer));
    }

    fn set_sasl_mechanisms(&mut self, mechanisms: &[&str]) {
        self.calls
            .push(Call::Sasl(mechanisms.iter().map(|m| m.to_string()).collect()));
    }

    fn set_tls(&mut self, domain: TlsDomain) {
        self.calls.push(Call::Tls {
            has_context: domain.context.is_some(),
        });
    }

    fn set_hostname(&mut self, hostname: &str) {
        self.calls.push(Call::Hostname(hostname.to_string()));
    }

    fn open_connection(&mut self, container_id: &str) {
        self.calls.push(Call::OpenConnection(container_id.to_string()));
        if self.script.open_connection {
            self.emit(EngineEvent::ConnectionRemoteOpen);
        }
    }

    fn open_session(&mut self) -> SessionId {
        let id = SessionId(self.next());
        self.calls.push(Call::OpenSession(id));
        if self.script.open_sessions {
            self.emit(EngineEvent::SessionRemoteOpen(id));
        }
        id
    }

    fn open_link(&mut self, session: SessionId, spec: &LinkSpec) -> LinkId {
        let id = LinkId(self.next());
        self.calls.push(Call::OpenLink(session, spec.clone(), id));

        let is_cbs = spec.address == "$cbs";
        if is_cbs && spec.role == LinkRole::Receiver {
            self.cbs_receiver = Some(id);
        }

        let confirm = if is_cbs {
            self.script.open_cbs_links
        } else {
            self.script.open_service_links
        };
        if confirm {
            self.emit(EngineEvent::LinkRemoteOpen(id));
        }
        id
    }

    fn send_claim(&mut self, link: LinkId, claim: &CbsClaim) -> Result<(), String> {
        self.calls.push(Call::SendClaim(link, claim.clone()));
        if let (Some(status), Some(receiver)) = (self.script.cbs_status, self.cbs_receiver) {
            let description = if status == 200 {
                None
            } else {
                Some("unauthorized".to_string())
            };
            self.emit(EngineEvent::CbsResponse {
                link: receiver,
                status,
                description,
            });
        }
        Ok(())
    }
}
