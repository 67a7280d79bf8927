use std::net::SocketAddr;

use crate::config::CommandRule;
use crate::events::EventLog;
use crate::registry::{ResponseRegistry, StreakPolicy, TriggerTracker};
use crate::responder::Responder;
use crate::session::{Session, SessionError, TransportParams};

/// Connect/disconnect toggle around at most one live session.
///
/// Rules may be replaced at any time; a running session keeps the registry it
/// was started with and the new rules apply from the next connect. Every
/// connect starts with fresh counters.
pub struct Simulator {
    rules: Vec<CommandRule>,
    policy: StreakPolicy,
    events: EventLog,
    session: Option<Session>,
}

impl Simulator {
    pub fn new(rules: Vec<CommandRule>, policy: StreakPolicy, events: EventLog) -> Self {
        Self {
            rules,
            policy,
            events,
            session: None,
        }
    }

    pub fn rules(&self) -> &[CommandRule] {
        &self.rules
    }

    pub fn set_rules(&mut self, rules: Vec<CommandRule>) {
        self.rules = rules;
    }

    /// False once the read loop has ended, even before `disconnect`.
    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_open)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.session.as_ref().and_then(Session::local_addr)
    }

    pub fn connect(&mut self, params: &TransportParams) -> Result<(), SessionError> {
        if self.is_connected() {
            return Err(SessionError::AlreadyOpen);
        }
        // a session whose read loop died on an I/O error is released first
        self.disconnect();
        let responder = Responder::new(
            ResponseRegistry::new(self.rules.iter().cloned()),
            TriggerTracker::new(self.policy),
            self.events.clone(),
        );
        match Session::connect(params, Box::new(responder), self.events.clone()) {
            Ok(session) => {
                self.events.info(format!(
                    "connected: {params} ({} commands)",
                    self.rules.len()
                ));
                self.session = Some(session);
                Ok(())
            }
            Err(e) => {
                self.events.error(format!("connection failed: {e}"));
                Err(e)
            }
        }
    }

    /// No-op when nothing is connected.
    pub fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.disconnect();
            self.events
                .info(format!("disconnected: {}", session.params()));
        }
    }

    /// Disconnect if connected, otherwise connect. Returns the new state.
    pub fn toggle(&mut self, params: &TransportParams) -> Result<bool, SessionError> {
        if self.is_connected() {
            self.disconnect();
            Ok(false)
        } else {
            self.connect(params).map(|_| true)
        }
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.disconnect();
    }
}
