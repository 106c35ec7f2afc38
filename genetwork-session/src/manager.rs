//! Per-request session bookkeeping.

use genetwork_core::Identity;
use tracing::debug;

use crate::{SessionEvent, SessionHooks, SessionToken};

/// Issues identities and fires create/connect events at request start.
#[derive(Debug, Clone)]
pub struct SessionManager {
    hooks: SessionHooks,
}

impl SessionManager {
    pub fn new(hooks: SessionHooks) -> Self {
        Self { hooks }
    }

    pub fn hooks(&self) -> &SessionHooks {
        &self.hooks
    }

    /// Called before a request is handled.
    ///
    /// A token without an identity gets a fresh one and fires `Create`;
    /// otherwise `Connect` is fired for the identity it carries.
    pub fn begin_request(&self, token: &mut SessionToken) -> Identity {
        match token.identity() {
            Some(identity) => {
                let identity = identity.clone();
                self.hooks.trigger(SessionEvent::Connect, &identity);
                identity
            }
            None => {
                let identity = Identity::generate();
                token.set_identity(identity.clone());
                debug!(%identity, "Issued session identity");
                self.hooks.trigger(SessionEvent::Create, &identity);
                identity
            }
        }
    }
}
