//! Resident session runtime for asamblea backends.
//!
//! Responsibilities:
//! - the contract with the external backend (rows, RPCs, change feed)
//! - keeping a fresh assembly snapshot with push + fallback polling
//! - driving the redirect policy, quorum refresh, and countdown ticks
//! - relaying admin broadcast directives to in-process subscribers
//!
//! The state-mutating logic itself (vote tallying, quorum guarantees,
//! cronometro transitions) lives server-side behind the RPCs; this crate
//! only calls it and reacts to the published state.

pub mod backend;
pub mod config;
pub mod controller;
pub mod directives;
pub mod http;
pub mod memory;
pub mod watcher;

pub use backend::{AssemblyBackend, ChangeEvent, ChangeOp, CheckIn, Table};
pub use config::ClientConfig;
pub use controller::{Session, SessionCommand, SessionConfig, SessionEvent};
pub use directives::{decode_directive, DirectivePublisher, DirectiveSubscriber};
pub use http::HttpBackend;
pub use memory::InMemoryBackend;
pub use watcher::{StateWatcher, WatcherConfig};
