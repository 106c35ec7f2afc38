//! Session lifecycle events and their handler registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use genetwork_core::{GenetworkResult, Identity};
use tracing::{debug, warn};

/// Lifecycle events fired by the session manager and the reaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    /// First request of a client without an identity.
    Create,
    /// Any later request carrying an identity.
    Connect,
    /// The identity was idle too long and is being torn down.
    Delete,
}

/// Handler invoked with the identity an event concerns.
pub type SessionHandler = Arc<dyn Fn(&Identity) -> GenetworkResult<()> + Send + Sync>;

/// Explicit registry of lifecycle handlers.
///
/// Built once at startup and handed to everything that needs to react to
/// session changes. Cloning is cheap and shares the same handlers.
#[derive(Clone, Default)]
pub struct SessionHooks {
    handlers: Arc<RwLock<HashMap<SessionEvent, Vec<SessionHandler>>>>,
}

impl SessionHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event.
    pub fn on<F>(&self, event: SessionEvent, handler: F)
    where
        F: Fn(&Identity) -> GenetworkResult<()> + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.entry(event).or_default().push(Arc::new(handler));
        debug!(?event, "Registered session handler");
    }

    pub fn on_create<F>(&self, handler: F)
    where
        F: Fn(&Identity) -> GenetworkResult<()> + Send + Sync + 'static,
    {
        self.on(SessionEvent::Create, handler);
    }

    pub fn on_connect<F>(&self, handler: F)
    where
        F: Fn(&Identity) -> GenetworkResult<()> + Send + Sync + 'static,
    {
        self.on(SessionEvent::Connect, handler);
    }

    pub fn on_delete<F>(&self, handler: F)
    where
        F: Fn(&Identity) -> GenetworkResult<()> + Send + Sync + 'static,
    {
        self.on(SessionEvent::Delete, handler);
    }

    /// Number of handlers registered for an event.
    pub fn handler_count(&self, event: SessionEvent) -> usize {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.get(&event).map_or(0, Vec::len)
    }

    /// Run every handler registered for `event`.
    ///
    /// A failing handler is logged and does not stop the others. Returns the
    /// number of handlers that failed.
    pub fn trigger(&self, event: SessionEvent, identity: &Identity) -> usize {
        // Handlers may register further handlers; never call them under the lock.
        let handlers: Vec<SessionHandler> = {
            let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            handlers.get(&event).cloned().unwrap_or_default()
        };

        let mut failures = 0;
        for handler in handlers {
            if let Err(e) = handler(identity) {
                failures += 1;
                warn!(?event, %identity, error = %e, "Session handler failed");
            }
        }
        failures
    }
}

impl std::fmt::Debug for SessionHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHooks")
            .field("create", &self.handler_count(SessionEvent::Create))
            .field("connect", &self.handler_count(SessionEvent::Connect))
            .field("delete", &self.handler_count(SessionEvent::Delete))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genetwork_core::StorageError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_trigger_runs_only_matching_handlers() {
        let hooks = SessionHooks::new();
        let deletes = Arc::new(AtomicUsize::new(0));
        let creates = Arc::new(AtomicUsize::new(0));

        let counter = deletes.clone();
        hooks.on_delete(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let counter = creates.clone();
        hooks.on_create(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let identity = Identity::generate();
        assert_eq!(hooks.trigger(SessionEvent::Delete, &identity), 0);
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
        assert_eq!(creates.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failing_handler_does_not_stop_others() {
        let hooks = SessionHooks::new();
        let ran = Arc::new(AtomicUsize::new(0));

        hooks.on_delete(|_| Err(StorageError::LockPoisoned.into()));
        let counter = ran.clone();
        hooks.on_delete(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let failures = hooks.trigger(SessionEvent::Delete, &Identity::generate());
        assert_eq!(failures, 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_register_handlers() {
        let hooks = SessionHooks::new();
        let inner = hooks.clone();
        hooks.on_connect(move |_| {
            inner.on_connect(|_| Ok(()));
            Ok(())
        });

        hooks.trigger(SessionEvent::Connect, &Identity::generate());
        assert_eq!(hooks.handler_count(SessionEvent::Connect), 2);
    }

    #[test]
    fn test_trigger_without_handlers() {
        let hooks = SessionHooks::new();
        assert_eq!(hooks.trigger(SessionEvent::Create, &Identity::generate()), 0);
    }
}
