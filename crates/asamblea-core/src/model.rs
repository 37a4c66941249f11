use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Assembly row as observed by an attendee device.
///
/// Mutated only by admin actions through the backend RPCs; residents treat
/// it as read-only input to the redirect policy and the tick projector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblySnapshot {
    pub id: Uuid,
    pub phase: AssemblyPhase,
    /// Latest moment at which check-in still counts for quorum.
    pub entry_cutoff: Option<DateTime<Utc>>,
    /// Proposal currently open for voting, if any.
    pub active_proposal: Option<Uuid>,
    /// Proposal whose results were published to residents, if any.
    pub published_results: Option<Uuid>,
    pub clock: DebateClock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyPhase {
    Open,
    Closed,
}

/// Debate cronometro fields as stored on the assembly row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebateClock {
    pub active: bool,
    pub paused: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_seconds: u64,
    /// Seconds consumed before the last pause; authoritative while paused.
    pub paused_elapsed_seconds: u64,
}

impl DebateClock {
    pub fn idle() -> Self {
        Self {
            active: false,
            paused: false,
            started_at: None,
            duration_seconds: 0,
            paused_elapsed_seconds: 0,
        }
    }
}

impl Default for DebateClock {
    fn default() -> Self {
        Self::idle()
    }
}

/// One check-in row. Created by the resident, later mutated by the admin
/// (proxy approval) or by the resident (exit form).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendance {
    pub id: Uuid,
    pub household: Uuid,
    pub attendee_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyGrant>,
    pub exit_form_completed: bool,
    pub exit_authorized: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyGrant {
    pub represented_household: Uuid,
    pub status: ProxyStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Uuid,
    pub assembly: Uuid,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Presentation order within the assembly agenda.
    pub position: u32,
    pub status: ProposalStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Draft,
    Open,
    Closed,
}

/// Ballot options accepted by `registrar_voto`. Wire values stay Spanish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteChoice {
    Si,
    No,
}

/// Result statistics for one proposal as computed by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub proposal: Uuid,
    pub si: u64,
    pub no: u64,
    /// Households entitled to vote when the proposal closed.
    pub total: u64,
    pub abstentions: u64,
}

/// Admin-to-residents broadcast payloads carried over the signal bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Directive {
    /// Send the attendee (or, with `attendance: None`, everyone) to the
    /// exit form.
    ShowExitForm { attendance: Option<Uuid> },
    /// The admin authorized this attendee's exit request.
    ExitAuthorized { attendance: Uuid },
}
