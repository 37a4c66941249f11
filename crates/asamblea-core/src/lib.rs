//! Pure domain logic for asamblea clients.
//!
//! Responsibilities:
//! - the assembly/attendance/proposal model as observed from the backend
//! - the quorum calculator shared by every screen
//! - the local tick projector for entry and debate countdowns
//! - the deduplicating redirect-policy state machine
//!
//! Everything in this crate is synchronous and I/O-free. The
//! `asamblea-client` crate wires these pieces to the remote backend.

pub mod countdown;
pub mod error;
pub mod model;
pub mod quorum;
pub mod redirect;

pub use countdown::{entry_window, format_mmss, project_clock, ClockProjection, EntryWindow};
pub use error::{BackendError, BackendResult};
pub use model::{
    AssemblyPhase, AssemblySnapshot, Attendance, DebateClock, Directive, Proposal, ProposalStatus,
    ProxyGrant, ProxyStatus, VoteChoice, VoteTally,
};
pub use quorum::{compute as compute_quorum, represented_households, Quorum};
pub use redirect::{Redirect, RedirectPolicy, View};
