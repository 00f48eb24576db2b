//! Connection Handshake Controller
//!
//! Single responsibility: drive one connection attempt from reactor start to
//! a single verdict.
//!
//! # Event Handling
//!
//! ```text
//! ReactorInit           -> pick endpoint, connect
//! ConnectionBound       -> WebSocket layer, SASL ANONYMOUS, TLS, proxy layer
//! ConnectionInit        -> advertise hostname, open
//! ConnectionRemoteOpen  -> flag, open side session, start CBS
//! SessionRemoteOpen     -> flag (application session)
//! LinkRemoteOpen        -> flag (application link) or CBS link
//! CbsResponse           -> CBS outcome
//! TransportError/Close  -> engine-observed protocol error
//! ```
//!
//! Handlers never return errors. Failures are captured in the state and only
//! surface through `verify_handshake_completed()`.

use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::callback::{AuthOutcome, AuthenticationListener};
use super::cbs::CbsSession;
use super::engine::{Engine, EngineEvent, LinkId, SessionId};
use super::transport::{plan_layers, select_endpoint, Endpoint, TransportLayer};
use crate::config::ConnectionConfig;
use crate::error::{AuthError, ErrorCondition, FailureCause, HandshakeError, Result};
use crate::tls::TlsDomain;

/// Where the attempt currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initial,
    TransportBound,
    ConnectionOpen,
    Authenticating,
    Succeeded,
    Failed,
    TimedOut,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }
}

/// Remote confirmations and the first failure of one attempt.
///
/// Every field moves at most once, from "not yet" to set.
#[derive(Debug, Clone, Default)]
pub struct HandshakeState {
    pub connection_opened_remotely: bool,
    pub session_opened_remotely: bool,
    pub link_opened_remotely: bool,
    pub saved_failure: Option<FailureCause>,
}

impl HandshakeState {
    pub fn all_opened(&self) -> bool {
        self.connection_opened_remotely && self.session_opened_remotely && self.link_opened_remotely
    }

    /// Keep the first failure, drop later ones.
    fn save_failure(&mut self, cause: FailureCause) {
        match &self.saved_failure {
            Some(first) => {
                debug!(first = %first, ignored = %cause, "Failure already saved");
            }
            None => {
                warn!(cause = %cause, "Saving handshake failure");
                self.saved_failure = Some(cause);
            }
        }
    }
}

/// Single-use state machine for one physical connection attempt.
pub struct Controller {
    config: ConnectionConfig,
    container_id: String,
    state: HandshakeState,
    phase: Phase,
    endpoint: Option<Endpoint>,
    protocol_error: Option<ErrorCondition>,
    cbs: Option<CbsSession>,
    authenticated: bool,
    service_session: Option<SessionId>,
    service_link: Option<LinkId>,
    verdict: Option<Result<()>>,
}

impl Controller {
    /// Validate the configuration and prepare a fresh attempt.
    ///
    /// No engine call happens here.
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            container_id: Uuid::new_v4().to_string(),
            state: HandshakeState::default(),
            phase: Phase::Initial,
            endpoint: None,
            protocol_error: None,
            cbs: None,
            authenticated: false,
            service_session: None,
            service_link: None,
            verdict: None,
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The endpoint chosen at reactor start, if it happened.
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// True once waiting longer cannot change the verdict.
    pub fn is_settled(&self) -> bool {
        self.verdict.is_some()
            || self.protocol_error.is_some()
            || self.state.saved_failure.is_some()
            || (self.state.all_opened() && self.authenticated)
    }

    /// Dispatch one engine event.
    pub fn handle<E: Engine + ?Sized>(&mut self, engine: &mut E, event: EngineEvent) {
        if self.verdict.is_some() {
            debug!(event = ?event, "Handshake already verified, ignoring event");
            return;
        }

        match event {
            EngineEvent::ReactorInit => self.on_reactor_init(engine),
            EngineEvent::ConnectionBound => self.on_connection_bound(engine),
            EngineEvent::ConnectionInit => self.on_connection_init(engine),
            EngineEvent::ConnectionRemoteOpen => self.on_connection_remote_open(engine),
            EngineEvent::SessionRemoteOpen(session) => self.on_session_remote_open(engine, session),
            EngineEvent::LinkRemoteOpen(link) => self.on_link_remote_open(engine, link),
            EngineEvent::CbsResponse {
                link,
                status,
                description,
            } => self.on_cbs_response(engine, link, status, description),
            EngineEvent::TransportError(condition) => self.on_transport_error(condition),
            EngineEvent::ConnectionRemoteClose(condition) => {
                if let Some(condition) = condition {
                    self.on_transport_error(condition);
                } else {
                    debug!("Connection closed remotely without error");
                }
            }
            EngineEvent::SessionRemoteClose(session, condition) => {
                self.on_session_remote_close(engine, session, condition)
            }
            EngineEvent::LinkRemoteClose(link, condition) => {
                self.on_link_remote_close(engine, link, condition)
            }
        }
    }

    /// Pick the target endpoint and start connecting.
    pub fn on_reactor_init<E: Engine + ?Sized>(&mut self, engine: &mut E) {
        if self.endpoint.is_some() {
            warn!("Reactor init delivered twice, ignoring");
            return;
        }

        let endpoint = select_endpoint(&self.config);
        debug!(host = %endpoint.host, port = endpoint.port, "Connecting to host");
        engine.connect_to_host(&endpoint.host, endpoint.port);
        self.endpoint = Some(endpoint);
    }

    /// Install the transport layers before any bytes flow.
    pub fn on_connection_bound<E: Engine + ?Sized>(&mut self, engine: &mut E) {
        let plan = match plan_layers(&self.config) {
            Ok(plan) => plan,
            Err(cause) => {
                self.fail(cause);
                return;
            }
        };

        if let Some(websocket) = plan.websocket {
            debug!(
                path = websocket.path,
                sub_protocol = websocket.sub_protocol,
                "Adding WebSocket layer"
            );
            engine.add_transport_layer(TransportLayer::WebSocket(websocket));
        }

        // Authentication happens over CBS after the connection opens.
        engine.set_sasl_mechanisms(&[plan.sasl_mechanism]);

        let context = match self.config.tls.resolve() {
            Ok(context) => Some(context),
            Err(e) => {
                self.fail(FailureCause::Tls(e));
                None
            }
        };
        engine.set_tls(TlsDomain::client(context));

        if let Some(proxy) = plan.proxy {
            trace!(destination = %proxy.destination, "Adding proxy layer");
            engine.add_transport_layer(TransportLayer::Proxy(proxy));
        }

        if self.phase == Phase::Initial {
            self.phase = Phase::TransportBound;
        }
    }

    /// Advertise the hub hostname and open the connection.
    pub fn on_connection_init<E: Engine + ?Sized>(&mut self, engine: &mut E) {
        engine.set_hostname(&self.config.host_name);
        debug!(container_id = %self.container_id, "Opening AMQP connection");
        engine.open_connection(&self.container_id);
    }

    /// The peer opened the connection: start authenticating.
    pub fn on_connection_remote_open<E: Engine + ?Sized>(&mut self, engine: &mut E) {
        if self.state.connection_opened_remotely {
            warn!("Connection remote open delivered twice, ignoring");
            return;
        }
        self.state.connection_opened_remotely = true;
        self.advance(Phase::ConnectionOpen);

        let side_session = engine.open_session();
        info!(session = side_session.0, "Connection opened remotely, starting CBS");
        self.cbs = Some(CbsSession::start(
            engine,
            side_session,
            self.config.credentials.clone(),
            self.config.host_name.clone(),
        ));
        self.advance(Phase::Authenticating);
    }

    pub fn on_session_remote_open<E: Engine + ?Sized>(&mut self, _engine: &mut E, session: SessionId) {
        if self.is_cbs_session(session) {
            trace!(session = session.0, "CBS session opened remotely");
            return;
        }
        debug!(session = session.0, "Session opened remotely");
        self.state.session_opened_remotely = true;
    }

    pub fn on_link_remote_open<E: Engine + ?Sized>(&mut self, engine: &mut E, link: LinkId) {
        if let Some(cbs) = self.cbs.as_mut().filter(|cbs| cbs.owns_link(link)) {
            if let Some(outcome) = cbs.on_link_remote_open(engine, link) {
                self.accept_outcome(engine, outcome);
            }
            return;
        }
        debug!(link = link.0, "Link opened remotely");
        self.state.link_opened_remotely = true;
    }

    fn on_cbs_response<E: Engine + ?Sized>(
        &mut self,
        engine: &mut E,
        link: LinkId,
        status: u16,
        description: Option<String>,
    ) {
        let outcome = match self.cbs.as_mut() {
            Some(cbs) => cbs.on_response(link, status, description),
            None => {
                warn!(link = link.0, status, "CBS response without a CBS session");
                None
            }
        };
        if let Some(outcome) = outcome {
            self.accept_outcome(engine, outcome);
        }
    }

    /// Record an error reported by the engine's diagnostics channel.
    pub fn on_transport_error(&mut self, condition: ErrorCondition) {
        match &self.protocol_error {
            Some(_) => debug!(condition = %condition, "Protocol error already recorded"),
            None => {
                warn!(condition = %condition, "Transport protocol error");
                self.protocol_error = Some(condition);
                self.phase = Phase::Failed;
            }
        }
    }

    fn on_session_remote_close<E: Engine + ?Sized>(
        &mut self,
        engine: &mut E,
        session: SessionId,
        condition: Option<ErrorCondition>,
    ) {
        if self.is_cbs_session(session) {
            let outcome = self.cbs.as_mut().and_then(|cbs| cbs.on_closed(condition));
            if let Some(outcome) = outcome {
                self.accept_outcome(engine, outcome);
            }
            return;
        }
        match condition {
            Some(condition) => self.on_transport_error(condition),
            None => debug!(session = session.0, "Session closed remotely without error"),
        }
    }

    fn on_link_remote_close<E: Engine + ?Sized>(
        &mut self,
        engine: &mut E,
        link: LinkId,
        condition: Option<ErrorCondition>,
    ) {
        if let Some(cbs) = self.cbs.as_mut().filter(|cbs| cbs.owns_link(link)) {
            if let Some(outcome) = cbs.on_closed(condition) {
                self.accept_outcome(engine, outcome);
            }
            return;
        }
        match condition {
            Some(condition) => self.on_transport_error(condition),
            None => debug!(link = link.0, "Link closed remotely without error"),
        }
    }

    /// Decide the attempt. The first call fixes the verdict; later calls
    /// return the same result.
    pub fn verify_handshake_completed(&mut self) -> Result<()> {
        if let Some(verdict) = &self.verdict {
            return verdict.clone();
        }

        let verdict = if let Some(condition) = &self.protocol_error {
            Err(HandshakeError::TransportProtocol(condition.clone()))
        } else if let Some(cause) = &self.state.saved_failure {
            Err(HandshakeError::ConnectionFailed(cause.clone()))
        } else if !self.state.all_opened() {
            Err(HandshakeError::Timeout)
        } else {
            Ok(())
        };

        self.phase = match &verdict {
            Ok(()) => Phase::Succeeded,
            Err(HandshakeError::Timeout) => Phase::TimedOut,
            Err(_) => Phase::Failed,
        };
        info!(phase = ?self.phase, "Handshake verified");

        self.verdict = Some(verdict.clone());
        verdict
    }

    fn accept_outcome<E: Engine + ?Sized>(&mut self, engine: &mut E, outcome: AuthOutcome) {
        let succeeded = outcome == AuthOutcome::Succeeded;
        outcome.deliver_to(self);

        if succeeded {
            self.open_service_link(engine);
        }
    }

    /// Open the configured application session and link, if any.
    fn open_service_link<E: Engine + ?Sized>(&mut self, engine: &mut E) {
        let Some(link) = self.config.service_link.as_ref() else {
            return;
        };
        if self.service_link.is_some() {
            return;
        }

        let spec = link.link_spec();
        let session = engine.open_session();
        let link_id = engine.open_link(session, &spec);
        debug!(
            session = session.0,
            link = link_id.0,
            address = %spec.address,
            "Opening service link"
        );
        self.service_session = Some(session);
        self.service_link = Some(link_id);
    }

    fn is_cbs_session(&self, session: SessionId) -> bool {
        self.cbs.as_ref().is_some_and(|cbs| cbs.session() == session)
    }

    fn fail(&mut self, cause: FailureCause) {
        self.state.save_failure(cause);
        self.phase = Phase::Failed;
    }

    fn advance(&mut self, phase: Phase) {
        if self.phase != Phase::Failed {
            self.phase = phase;
        }
    }
}

impl AuthenticationListener for Controller {
    fn on_authentication_succeeded(&mut self) {
        self.authenticated = true;
    }

    fn on_authentication_failed(&mut self, error: AuthError) {
        self.fail(FailureCause::Authentication(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Protocol, ServiceLink};
    use crate::handshake::cbs::CbsClaim;
    use crate::handshake::engine::LinkSpec;

    #[derive(Default)]
    struct NullEngine {
        next: u32,
        hostname: Option<String>,
        claims: usize,
        links: Vec<LinkSpec>,
    }

    impl Engine for NullEngine {
        fn connect_to_host(&mut self, _host: &str, _port: u16) {}
        fn add_transport_layer(&mut self, _layer: TransportLayer) {}
        fn set_sasl_mechanisms(&mut self, _mechanisms: &[&str]) {}
        fn set_tls(&mut self, _domain: TlsDomain) {}
        fn set_hostname(&mut self, hostname: &str) {
            self.hostname = Some(hostname.to_string());
        }
        fn open_connection(&mut self, _container_id: &str) {}
        fn open_session(&mut self) -> SessionId {
            self.next += 1;
            SessionId(self.next)
        }
        fn open_link(&mut self, _session: SessionId, spec: &LinkSpec) -> LinkId {
            self.next += 1;
            self.links.push(spec.clone());
            LinkId(self.next)
        }
        fn send_claim(&mut self, _link: LinkId, _claim: &CbsClaim) -> std::result::Result<(), String> {
            self.claims += 1;
            Ok(())
        }
    }

    fn controller() -> Controller {
        let config = ConnectionConfig::shared_access_signature(
            "hub.example.net",
            "owner",
            "SharedAccessSignature sr=...",
            Protocol::Amqps,
        )
        .unwrap();
        Controller::new(config).unwrap()
    }

    #[test]
    fn test_initial_state() {
        let controller = controller();
        let state = controller.state();
        assert!(!state.connection_opened_remotely);
        assert!(!state.session_opened_remotely);
        assert!(!state.link_opened_remotely);
        assert!(state.saved_failure.is_none());
        assert_eq!(controller.phase(), Phase::Initial);
        assert!(!controller.is_settled());
    }

    #[test]
    fn test_new_revalidates_config() {
        let mut config = controller().config().clone();
        config.host_name = String::new();
        assert_eq!(
            Controller::new(config).err(),
            Some(HandshakeError::empty("hostName"))
        );
    }

    #[test]
    fn test_saved_failure_is_sticky() {
        let mut controller = controller();
        controller.on_authentication_failed(AuthError::Credential("first".into()));
        controller.on_authentication_failed(AuthError::Credential("second".into()));

        assert_eq!(
            controller.state().saved_failure,
            Some(FailureCause::Authentication(AuthError::Credential("first".into())))
        );
    }

    #[test]
    fn test_verdict_priority_protocol_error_first() {
        let mut controller = controller();
        controller.on_authentication_failed(AuthError::Send("x".into()));
        controller.on_transport_error(ErrorCondition::new("amqp:internal-error", None));

        assert!(matches!(
            controller.verify_handshake_completed(),
            Err(HandshakeError::TransportProtocol(_))
        ));
        assert_eq!(controller.phase(), Phase::Failed);
    }

    #[test]
    fn test_timeout_when_nothing_opened() {
        let mut controller = controller();
        assert_eq!(
            controller.verify_handshake_completed(),
            Err(HandshakeError::Timeout)
        );
        assert_eq!(controller.phase(), Phase::TimedOut);
    }

    #[test]
    fn test_verdict_is_stable() {
        let mut engine = NullEngine::default();
        let mut controller = controller();
        assert_eq!(
            controller.verify_handshake_completed(),
            Err(HandshakeError::Timeout)
        );

        // Late confirmations do not change a fixed verdict.
        controller.handle(&mut engine, EngineEvent::ConnectionRemoteOpen);
        assert_eq!(
            controller.verify_handshake_completed(),
            Err(HandshakeError::Timeout)
        );
        assert!(!controller.state().connection_opened_remotely);
    }

    #[test]
    fn test_connection_init_sets_hostname() {
        let mut engine = NullEngine::default();
        let mut controller = controller();
        controller.handle(&mut engine, EngineEvent::ConnectionInit);
        assert_eq!(engine.hostname.as_deref(), Some("hub.example.net"));
    }

    #[test]
    fn test_cbs_events_do_not_set_application_flags() {
        let mut engine = NullEngine::default();
        let mut controller = controller();
        controller.handle(&mut engine, EngineEvent::ConnectionRemoteOpen);
        assert_eq!(controller.phase(), Phase::Authenticating);

        // Side session is 1, CBS links are 2 and 3.
        controller.handle(&mut engine, EngineEvent::SessionRemoteOpen(SessionId(1)));
        controller.handle(&mut engine, EngineEvent::LinkRemoteOpen(LinkId(2)));
        controller.handle(&mut engine, EngineEvent::LinkRemoteOpen(LinkId(3)));

        assert!(!controller.state().session_opened_remotely);
        assert!(!controller.state().link_opened_remotely);
        assert_eq!(engine.claims, 1);
    }

    #[test]
    fn test_service_link_opened_after_authentication() {
        let mut engine = NullEngine::default();
        let config = controller()
            .config()
            .clone()
            .with_service_link(ServiceLink::Feedback);
        let mut controller = Controller::new(config).unwrap();

        controller.handle(&mut engine, EngineEvent::ConnectionRemoteOpen);
        controller.handle(&mut engine, EngineEvent::LinkRemoteOpen(LinkId(2)));
        controller.handle(&mut engine, EngineEvent::LinkRemoteOpen(LinkId(3)));
        assert_eq!(engine.links.len(), 2);

        controller.handle(
            &mut engine,
            EngineEvent::CbsResponse {
                link: LinkId(3),
                status: 200,
                description: None,
            },
        );
        assert!(controller.is_authenticated());
        assert_eq!(engine.links.len(), 3);
        assert_eq!(engine.links[2].address, "/messages/serviceBound/feedback");
    }

    #[test]
    fn test_remote_close_with_error_is_protocol_error() {
        let mut engine = NullEngine::default();
        let mut controller = controller();
        controller.handle(
            &mut engine,
            EngineEvent::ConnectionRemoteClose(Some(ErrorCondition::new(
                "amqp:unauthorized-access",
                Some("bad token".into()),
            ))),
        );
        assert!(controller.is_settled());
        assert_eq!(
            controller.verify_handshake_completed(),
            Err(HandshakeError::TransportProtocol(ErrorCondition::new(
                "amqp:unauthorized-access",
                Some("bad token".into())
            )))
        );
    }
}
