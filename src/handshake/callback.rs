//! Authentication Outcome Contract
//!
//! The CBS session reports its result as an [`AuthOutcome`] value instead of
//! calling back into the controller. The controller consumes it through
//! [`AuthenticationListener`], so either side can be swapped or tested alone.

use crate::error::AuthError;

/// Terminal result of one claims exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Succeeded,
    Failed(AuthError),
}

impl AuthOutcome {
    /// Hand the outcome to its consumer.
    pub fn deliver_to<L: AuthenticationListener + ?Sized>(self, listener: &mut L) {
        match self {
            Self::Succeeded => listener.on_authentication_succeeded(),
            Self::Failed(error) => listener.on_authentication_failed(error),
        }
    }
}

/// Receiver of authentication outcomes. Each method fires at most once per
/// CBS session.
pub trait AuthenticationListener {
    fn on_authentication_succeeded(&mut self);
    fn on_authentication_failed(&mut self, error: AuthError);
}

/// Single-assignment slot guarding the "report exactly once" rule.
#[derive(Debug, Default)]
pub struct OutcomeSlot {
    settled: bool,
}

impl OutcomeSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the outcome the first time, None afterwards.
    pub fn settle(&mut self, outcome: AuthOutcome) -> Option<AuthOutcome> {
        if self.settled {
            None
        } else {
            self.settled = true;
            Some(outcome)
        }
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }
}
