use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use asamblea_core::{AssemblySnapshot, Attendance, BackendResult, Proposal, VoteChoice, VoteTally};

/// Tables the change feed reports on. Wire names are the backend's Spanish
/// table names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Table {
    #[serde(rename = "asambleas")]
    Assemblies,
    #[serde(rename = "asistencias")]
    Attendances,
    #[serde(rename = "propuestas")]
    Proposals,
    #[serde(rename = "votos")]
    Votes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// Row-level change notification, already filtered by assembly id at the
/// source. Carries no payload: consumers re-fetch what they care about, so
/// duplicate or out-of-order deliveries are harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub op: ChangeOp,
}

/// Check-in payload. `proxy_for` requests representation of another
/// household; approval stays an admin action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckIn {
    pub household: Uuid,
    pub attendee_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_for: Option<Uuid>,
}

/// Contract with the external backend.
///
/// All state-mutating logic (vote uniqueness, quorum guarantees, cronometro
/// transitions) lives behind these calls as stored procedures; this client
/// is a caller of an opaque, already-correct service and never re-derives
/// those invariants.
#[async_trait]
pub trait AssemblyBackend: Send + Sync {
    async fn fetch_assembly(&self, assembly: Uuid) -> BackendResult<Option<AssemblySnapshot>>;
    async fn fetch_attendances(&self, assembly: Uuid) -> BackendResult<Vec<Attendance>>;
    async fn fetch_proposals(&self, assembly: Uuid) -> BackendResult<Vec<Proposal>>;
    /// Registered household ids.
    async fn fetch_households(&self) -> BackendResult<Vec<Uuid>>;
    /// Authoritative household count for quorum arithmetic. Defaults to the
    /// registered-household list; backends can override with a server-side
    /// count.
    async fn total_households(&self) -> BackendResult<usize> {
        Ok(self.fetch_households().await?.len())
    }

    async fn check_in(&self, assembly: Uuid, request: CheckIn) -> BackendResult<Attendance>;
    async fn complete_exit_form(&self, attendance: Uuid) -> BackendResult<()>;
    async fn remove_attendance(&self, attendance: Uuid) -> BackendResult<()>;

    /// `registrar_voto`. One vote per household and proposal is enforced
    /// server-side; a duplicate surfaces as [`BackendError::AlreadyVoted`].
    ///
    /// [`BackendError::AlreadyVoted`]: asamblea_core::BackendError::AlreadyVoted
    async fn cast_vote(
        &self,
        proposal: Uuid,
        household: Uuid,
        choice: VoteChoice,
    ) -> BackendResult<()>;
    /// `abrir_votacion`
    async fn open_voting(&self, proposal: Uuid) -> BackendResult<()>;
    /// `cerrar_votacion`
    async fn close_voting(&self, proposal: Uuid) -> BackendResult<()>;
    /// `mostrar_resultados`
    async fn publish_results(&self, proposal: Uuid) -> BackendResult<()>;
    /// `estadisticas_votacion`
    async fn results_tally(&self, proposal: Uuid) -> BackendResult<VoteTally>;

    /// `iniciar_cronometro_debate`
    async fn start_debate_clock(&self, assembly: Uuid, duration_seconds: u64) -> BackendResult<()>;
    /// `pausar_cronometro_debate`
    async fn pause_debate_clock(&self, assembly: Uuid) -> BackendResult<()>;
    /// `reanudar_cronometro_debate`
    async fn resume_debate_clock(&self, assembly: Uuid) -> BackendResult<()>;
    /// `detener_cronometro_debate`
    async fn stop_debate_clock(&self, assembly: Uuid) -> BackendResult<()>;

    /// Row-level change notifications filtered by assembly id. The stream
    /// is best-effort; callers pair it with fallback polling.
    async fn changes(&self, assembly: Uuid) -> BackendResult<BoxStream<'static, ChangeEvent>>;
}
