//! CBS Authentication Session
//!
//! Single responsibility: authenticate an open connection by putting a token
//! on the `$cbs` node over a dedicated side session.
//!
//! # Flow
//!
//! 1. `start()` attaches a sender and a receiver link to `$cbs` on the side
//!    session handed in by the controller
//! 2. Once both links are remotely open, a token is taken from the
//!    credentials (static SAS, or fetched from the provider) and sent as a
//!    `put-token` claim
//! 3. The peer's status on the receiver link decides the outcome
//!
//! The outcome comes back as a return value, exactly once. Anything that
//! arrives after that is ignored.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::callback::{AuthOutcome, OutcomeSlot};
use super::engine::{Engine, LinkId, LinkRole, LinkSpec, SessionId};
use crate::config::Credentials;
use crate::credential::{sas_expiry, IOTHUB_PUBLIC_SCOPE};
use crate::error::{AuthError, ErrorCondition};

/// Address of the claims-based-security node
pub const CBS_NODE: &str = "$cbs";
pub const CBS_SENDER_LINK: &str = "cbs-sender";
pub const CBS_RECEIVER_LINK: &str = "cbs-receiver";
/// Reply-to address carried by claims
pub const CBS_REPLY_TO: &str = "cbs";
pub const PUT_TOKEN_OPERATION: &str = "put-token";

/// One `put-token` request. Message encoding belongs to the engine.
#[derive(Clone, PartialEq, Eq)]
pub struct CbsClaim {
    pub message_id: Uuid,
    pub operation: &'static str,
    pub token_type: &'static str,
    /// Resource the token is presented for
    pub audience: String,
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub reply_to: &'static str,
}

impl std::fmt::Debug for CbsClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CbsClaim")
            .field("message_id", &self.message_id)
            .field("operation", &self.operation)
            .field("token_type", &self.token_type)
            .field("audience", &self.audience)
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CbsState {
    OpeningLinks,
    AwaitingResponse,
    Done,
}

/// The authentication side channel of one connection attempt.
pub struct CbsSession {
    session: SessionId,
    sender: LinkId,
    receiver: LinkId,
    sender_open: bool,
    receiver_open: bool,
    credentials: Credentials,
    audience: String,
    state: CbsState,
    slot: OutcomeSlot,
}

impl CbsSession {
    /// Attach the CBS links on `session` and begin the exchange.
    pub fn start<E: Engine + ?Sized>(
        engine: &mut E,
        session: SessionId,
        credentials: Credentials,
        audience: impl Into<String>,
    ) -> Self {
        let sender = engine.open_link(
            session,
            &LinkSpec::new(CBS_SENDER_LINK, CBS_NODE, LinkRole::Sender),
        );
        let receiver = engine.open_link(
            session,
            &LinkSpec::new(CBS_RECEIVER_LINK, CBS_NODE, LinkRole::Receiver),
        );

        debug!(
            session = session.0,
            sender = sender.0,
            receiver = receiver.0,
            "Opening CBS links"
        );

        Self {
            session,
            sender,
            receiver,
            sender_open: false,
            receiver_open: false,
            credentials,
            audience: audience.into(),
            state: CbsState::OpeningLinks,
            slot: OutcomeSlot::new(),
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn owns_link(&self, link: LinkId) -> bool {
        link == self.sender || link == self.receiver
    }

    pub fn is_settled(&self) -> bool {
        self.slot.is_settled()
    }

    /// A CBS link confirmed open. Sends the claim once both are up.
    pub fn on_link_remote_open<E: Engine + ?Sized>(
        &mut self,
        engine: &mut E,
        link: LinkId,
    ) -> Option<AuthOutcome> {
        if link == self.sender {
            self.sender_open = true;
        } else if link == self.receiver {
            self.receiver_open = true;
        } else {
            return None;
        }

        if self.state != CbsState::OpeningLinks || !(self.sender_open && self.receiver_open) {
            return None;
        }

        let claim = match self.build_claim() {
            Ok(claim) => claim,
            Err(e) => return self.finish(AuthOutcome::Failed(e)),
        };

        debug!(
            message_id = %claim.message_id,
            token_type = claim.token_type,
            audience = %claim.audience,
            "Sending CBS put-token"
        );

        match engine.send_claim(self.sender, &claim) {
            Ok(()) => {
                self.state = CbsState::AwaitingResponse;
                None
            }
            Err(e) => self.finish(AuthOutcome::Failed(AuthError::Send(e))),
        }
    }

    /// The peer answered the claim.
    pub fn on_response(
        &mut self,
        link: LinkId,
        status: u16,
        description: Option<String>,
    ) -> Option<AuthOutcome> {
        if link != self.receiver {
            return None;
        }
        if self.state != CbsState::AwaitingResponse {
            warn!(status, state = ?self.state, "Ignoring unexpected CBS response");
            return None;
        }

        match status {
            200 | 202 => {
                info!(status, "CBS authentication succeeded");
                self.finish(AuthOutcome::Succeeded)
            }
            _ => {
                let description = description.unwrap_or_else(|| "no description".into());
                warn!(status, description = %description, "CBS authentication rejected");
                self.finish(AuthOutcome::Failed(AuthError::Rejected {
                    status,
                    description,
                }))
            }
        }
    }

    /// The peer closed a CBS link (or the whole side session).
    pub fn on_closed(&mut self, condition: Option<ErrorCondition>) -> Option<AuthOutcome> {
        if self.state == CbsState::Done {
            return None;
        }
        let condition = condition.unwrap_or_else(|| {
            ErrorCondition::new("amqp:link:detach-forced", Some("closed before response".into()))
        });
        self.finish(AuthOutcome::Failed(AuthError::LinkClosed(condition)))
    }

    fn build_claim(&self) -> Result<CbsClaim, AuthError> {
        let authorization_type = self.credentials.authorization_type();
        let (token, expires_at) = match &self.credentials {
            Credentials::SharedAccessSignature { sas_token, .. } => {
                (sas_token.clone(), sas_expiry(sas_token))
            }
            Credentials::TokenCredential { provider, .. } => {
                let access = provider
                    .get_token(&[IOTHUB_PUBLIC_SCOPE])
                    .map_err(|e| AuthError::Credential(e.to_string()))?;
                (access.token, Some(access.expires_at))
            }
        };

        Ok(CbsClaim {
            message_id: Uuid::new_v4(),
            operation: PUT_TOKEN_OPERATION,
            token_type: authorization_type.token_type(),
            audience: self.audience.clone(),
            token,
            expires_at,
            reply_to: CBS_REPLY_TO,
        })
    }

    fn finish(&mut self, outcome: AuthOutcome) -> Option<AuthOutcome> {
        self.state = CbsState::Done;
        self.slot.settle(outcome)
    }
}
