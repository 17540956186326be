//! Per-channel streaming sessions.
//!
//! A session moves Idle → Starting → Active → Cleaning → Idle. Every teardown
//! trigger (stop, forced clean, router or producer closing, a dead pipeline
//! process, a failed or cancelled start) goes through the same guarded cleanup,
//! which runs at most once per session.

mod manager;
mod registry;
mod state;

pub use manager::{SessionManager, StopOutcome};
pub use registry::{SessionRegistry, WeakRegistry};
pub use state::{Phase, Session};
