//! Genetwork Session - Identity and Lifecycle
//!
//! Everything the caches need to know about the current client:
//!
//! - `SessionToken`: the client-held container (identity plus cache partitions)
//! - `IdentityProvider` / `ClientSession`: the seams the caches depend on
//! - `SessionHooks`: explicit registry for create/connect/delete handlers
//! - `SessionManager`: issues identities at request start
//! - `SessionReaper`: background sweep that deletes idle sessions
//!
//! # Lifecycle
//!
//! ```text
//! request ──► begin_request ──► Create (no identity) / Connect
//!                                   │
//!                                   ▼
//!                            reaper.record(identity)
//!                                   │  idle > session_duration
//!                                   ▼
//!                                Delete ──► caches drop identity data
//! ```

mod hooks;
mod manager;
mod reaper;
mod token;

pub use hooks::{SessionEvent, SessionHandler, SessionHooks};
pub use manager::SessionManager;
pub use reaper::{ReaperMetrics, ReaperSnapshot, SessionReaper};
pub use token::{ClientSession, IdentityProvider, SessionToken};
