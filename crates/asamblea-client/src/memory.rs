//! In-process backend for tests, the stress harness, and local wiring.
//!
//! Enforces the server-held invariants the client relies on (one vote per
//! household and proposal, a single active proposal, results only for a
//! closed proposal) and emits a change event on every mutation, so the
//! watcher and controller can be exercised end to end without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use asamblea_core::{
    AssemblyPhase, AssemblySnapshot, Attendance, BackendError, BackendResult, DebateClock,
    Proposal, ProposalStatus, ProxyGrant, ProxyStatus, VoteChoice, VoteTally,
};

use crate::backend::{AssemblyBackend, ChangeEvent, ChangeOp, CheckIn, Table};

struct MemoryState {
    assembly: AssemblySnapshot,
    attendances: Vec<Attendance>,
    proposals: Vec<Proposal>,
    votes: HashMap<(Uuid, Uuid), VoteChoice>,
}

pub struct InMemoryBackend {
    households: Vec<Uuid>,
    state: Mutex<MemoryState>,
    events: broadcast::Sender<ChangeEvent>,
    feed_enabled: AtomicBool,
    stop_calls: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new(assembly: Uuid, household_count: usize) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            households: (0..household_count).map(|_| Uuid::new_v4()).collect(),
            state: Mutex::new(MemoryState {
                assembly: AssemblySnapshot {
                    id: assembly,
                    phase: AssemblyPhase::Open,
                    entry_cutoff: None,
                    active_proposal: None,
                    published_results: None,
                    clock: DebateClock::idle(),
                },
                attendances: Vec::new(),
                proposals: Vec::new(),
                votes: HashMap::new(),
            }),
            events,
            feed_enabled: AtomicBool::new(true),
            stop_calls: AtomicUsize::new(0),
        }
    }

    pub fn households(&self) -> &[Uuid] {
        &self.households
    }

    /// Simulates an environment without push delivery: `changes()` fails
    /// and consumers must fall back to polling.
    pub fn disable_feed(&self) {
        self.feed_enabled.store(false, Ordering::Relaxed);
    }

    /// Number of `detener_cronometro_debate` calls received.
    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::Relaxed)
    }

    pub async fn set_entry_cutoff(&self, cutoff: chrono::DateTime<Utc>) {
        let mut state = self.state.lock().await;
        state.assembly.entry_cutoff = Some(cutoff);
        drop(state);
        self.emit(Table::Assemblies, ChangeOp::Update);
    }

    /// Admin setup helper: registers a draft proposal on the agenda.
    pub async fn add_proposal(&self, title: &str) -> Uuid {
        let mut state = self.state.lock().await;
        let id = Uuid::new_v4();
        let position = state.proposals.len() as u32 + 1;
        let assembly = state.assembly.id;
        state.proposals.push(Proposal {
            id,
            assembly,
            title: title.to_string(),
            description: None,
            position,
            status: ProposalStatus::Draft,
        });
        drop(state);
        self.emit(Table::Proposals, ChangeOp::Insert);
        id
    }

    /// Admin action: approves a pending proxy on an attendance row.
    pub async fn approve_proxy(&self, attendance: Uuid) -> BackendResult<()> {
        let mut state = self.state.lock().await;
        let row = state
            .attendances
            .iter_mut()
            .find(|row| row.id == attendance)
            .ok_or_else(|| BackendError::Rejected("asistencia no encontrada".into()))?;
        match row.proxy.as_mut() {
            Some(proxy) => proxy.status = ProxyStatus::Approved,
            None => return Err(BackendError::Rejected("asistencia sin poder".into())),
        }
        drop(state);
        self.emit(Table::Attendances, ChangeOp::Update);
        Ok(())
    }

    fn emit(&self, table: Table, op: ChangeOp) {
        // No live feed subscribers is fine.
        let _ = self.events.send(ChangeEvent { table, op });
    }

    async fn assembly_id(&self) -> Uuid {
        self.state.lock().await.assembly.id
    }
}

#[async_trait]
impl AssemblyBackend for InMemoryBackend {
    async fn fetch_assembly(&self, assembly: Uuid) -> BackendResult<Option<AssemblySnapshot>> {
        let state = self.state.lock().await;
        if state.assembly.id != assembly {
            return Ok(None);
        }
        Ok(Some(state.assembly.clone()))
    }

    async fn fetch_attendances(&self, assembly: Uuid) -> BackendResult<Vec<Attendance>> {
        let state = self.state.lock().await;
        if state.assembly.id != assembly {
            return Ok(Vec::new());
        }
        Ok(state.attendances.clone())
    }

    async fn fetch_proposals(&self, assembly: Uuid) -> BackendResult<Vec<Proposal>> {
        let state = self.state.lock().await;
        Ok(state
            .proposals
            .iter()
            .filter(|proposal| proposal.assembly == assembly)
            .cloned()
            .collect())
    }

    async fn fetch_households(&self) -> BackendResult<Vec<Uuid>> {
        Ok(self.households.clone())
    }

    async fn check_in(&self, assembly: Uuid, request: CheckIn) -> BackendResult<Attendance> {
        if request.attendee_name.trim().is_empty() {
            return Err(BackendError::Validation("nombre requerido".into()));
        }
        if !self.households.contains(&request.household) {
            return Err(BackendError::Validation("vivienda desconocida".into()));
        }
        let mut state = self.state.lock().await;
        if state.assembly.id != assembly {
            return Err(BackendError::Rejected("asamblea no encontrada".into()));
        }
        if let Some(cutoff) = state.assembly.entry_cutoff {
            if Utc::now() > cutoff {
                return Err(BackendError::Rejected("ingreso cerrado".into()));
            }
        }
        let row = Attendance {
            id: Uuid::new_v4(),
            household: request.household,
            attendee_name: request.attendee_name,
            proxy: request.proxy_for.map(|represented_household| ProxyGrant {
                represented_household,
                status: ProxyStatus::Pending,
            }),
            exit_form_completed: false,
            exit_authorized: false,
        };
        state.attendances.push(row.clone());
        drop(state);
        self.emit(Table::Attendances, ChangeOp::Insert);
        Ok(row)
    }

    async fn complete_exit_form(&self, attendance: Uuid) -> BackendResult<()> {
        let mut state = self.state.lock().await;
        let row = state
            .attendances
            .iter_mut()
            .find(|row| row.id == attendance)
            .ok_or_else(|| BackendError::Rejected("asistencia no encontrada".into()))?;
        row.exit_form_completed = true;
        drop(state);
        self.emit(Table::Attendances, ChangeOp::Update);
        Ok(())
    }

    async fn remove_attendance(&self, attendance: Uuid) -> BackendResult<()> {
        let mut state = self.state.lock().await;
        let before = state.attendances.len();
        state.attendances.retain(|row| row.id != attendance);
        let removed = state.attendances.len() < before;
        drop(state);
        if removed {
            self.emit(Table::Attendances, ChangeOp::Delete);
        }
        Ok(())
    }

    async fn cast_vote(
        &self,
        proposal: Uuid,
        household: Uuid,
        choice: VoteChoice,
    ) -> BackendResult<()> {
        let mut state = self.state.lock().await;
        let status = state
            .proposals
            .iter()
            .find(|row| row.id == proposal)
            .map(|row| row.status)
            .ok_or_else(|| BackendError::Rejected("propuesta no encontrada".into()))?;
        if status != ProposalStatus::Open {
            return Err(BackendError::Rejected("votacion no abierta".into()));
        }
        if state.votes.contains_key(&(proposal, household)) {
            return Err(BackendError::AlreadyVoted);
        }
        state.votes.insert((proposal, household), choice);
        drop(state);
        self.emit(Table::Votes, ChangeOp::Insert);
        Ok(())
    }

    async fn open_voting(&self, proposal: Uuid) -> BackendResult<()> {
        let mut state = self.state.lock().await;
        if state.assembly.active_proposal.is_some() {
            return Err(BackendError::Rejected("ya hay una propuesta activa".into()));
        }
        let row = state
            .proposals
            .iter_mut()
            .find(|row| row.id == proposal)
            .ok_or_else(|| BackendError::Rejected("propuesta no encontrada".into()))?;
        row.status = ProposalStatus::Open;
        state.assembly.active_proposal = Some(proposal);
        drop(state);
        self.emit(Table::Proposals, ChangeOp::Update);
        self.emit(Table::Assemblies, ChangeOp::Update);
        Ok(())
    }

    async fn close_voting(&self, proposal: Uuid) -> BackendResult<()> {
        let mut state = self.state.lock().await;
        let row = state
            .proposals
            .iter_mut()
            .find(|row| row.id == proposal)
            .ok_or_else(|| BackendError::Rejected("propuesta no encontrada".into()))?;
        row.status = ProposalStatus::Closed;
        if state.assembly.active_proposal == Some(proposal) {
            state.assembly.active_proposal = None;
        }
        drop(state);
        self.emit(Table::Proposals, ChangeOp::Update);
        self.emit(Table::Assemblies, ChangeOp::Update);
        Ok(())
    }

    async fn publish_results(&self, proposal: Uuid) -> BackendResult<()> {
        let mut state = self.state.lock().await;
        let status = state
            .proposals
            .iter()
            .find(|row| row.id == proposal)
            .map(|row| row.status)
            .ok_or_else(|| BackendError::Rejected("propuesta no encontrada".into()))?;
        if status != ProposalStatus::Closed {
            return Err(BackendError::Rejected("la votacion sigue abierta".into()));
        }
        state.assembly.published_results = Some(proposal);
        drop(state);
        self.emit(Table::Assemblies, ChangeOp::Update);
        Ok(())
    }

    async fn results_tally(&self, proposal: Uuid) -> BackendResult<VoteTally> {
        let state = self.state.lock().await;
        let mut si = 0u64;
        let mut no = 0u64;
        for ((voted_proposal, _), choice) in &state.votes {
            if *voted_proposal != proposal {
                continue;
            }
            match choice {
                VoteChoice::Si => si += 1,
                VoteChoice::No => no += 1,
            }
        }
        let total = self.households.len() as u64;
        Ok(VoteTally {
            proposal,
            si,
            no,
            total,
            abstentions: total.saturating_sub(si + no),
        })
    }

    async fn start_debate_clock(&self, assembly: Uuid, duration_seconds: u64) -> BackendResult<()> {
        let mut state = self.state.lock().await;
        if state.assembly.id != assembly {
            return Err(BackendError::Rejected("asamblea no encontrada".into()));
        }
        state.assembly.clock = DebateClock {
            active: true,
            paused: false,
            started_at: Some(Utc::now()),
            duration_seconds,
            paused_elapsed_seconds: 0,
        };
        drop(state);
        self.emit(Table::Assemblies, ChangeOp::Update);
        Ok(())
    }

    async fn pause_debate_clock(&self, assembly: Uuid) -> BackendResult<()> {
        let mut state = self.state.lock().await;
        if state.assembly.id != assembly {
            return Err(BackendError::Rejected("asamblea no encontrada".into()));
        }
        let clock = &mut state.assembly.clock;
        if !clock.active || clock.paused {
            return Err(BackendError::Rejected("cronometro no corriendo".into()));
        }
        let elapsed = clock
            .started_at
            .map(|started| (Utc::now() - started).num_seconds().max(0) as u64)
            .unwrap_or(0);
        clock.paused = true;
        clock.paused_elapsed_seconds = elapsed.min(clock.duration_seconds);
        drop(state);
        self.emit(Table::Assemblies, ChangeOp::Update);
        Ok(())
    }

    async fn resume_debate_clock(&self, assembly: Uuid) -> BackendResult<()> {
        let mut state = self.state.lock().await;
        if state.assembly.id != assembly {
            return Err(BackendError::Rejected("asamblea no encontrada".into()));
        }
        let clock = &mut state.assembly.clock;
        if !clock.active || !clock.paused {
            return Err(BackendError::Rejected("cronometro no pausado".into()));
        }
        clock.paused = false;
        // Shift the start so running arithmetic continues from the pause.
        clock.started_at = Some(Utc::now() - Duration::seconds(clock.paused_elapsed_seconds as i64));
        drop(state);
        self.emit(Table::Assemblies, ChangeOp::Update);
        Ok(())
    }

    async fn stop_debate_clock(&self, assembly: Uuid) -> BackendResult<()> {
        self.stop_calls.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().await;
        if state.assembly.id != assembly {
            return Err(BackendError::Rejected("asamblea no encontrada".into()));
        }
        state.assembly.clock = DebateClock::idle();
        drop(state);
        self.emit(Table::Assemblies, ChangeOp::Update);
        Ok(())
    }

    async fn changes(&self, assembly: Uuid) -> BackendResult<BoxStream<'static, ChangeEvent>> {
        if !self.feed_enabled.load(Ordering::Relaxed) {
            return Err(BackendError::Transient("change feed disabled".into()));
        }
        if self.assembly_id().await != assembly {
            return Ok(futures::stream::empty().boxed());
        }
        let stream = BroadcastStream::new(self.events.subscribe())
            .filter_map(|event| async move { event.ok() });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> InMemoryBackend {
        InMemoryBackend::new(Uuid::new_v4(), 15)
    }

    #[tokio::test]
    async fn check_in_validates_input() {
        let backend = backend();
        let assembly = backend.assembly_id().await;

        let err = backend
            .check_in(
                assembly,
                CheckIn {
                    household: backend.households()[0],
                    attendee_name: "  ".into(),
                    proxy_for: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Validation(_)));

        let err = backend
            .check_in(
                assembly,
                CheckIn {
                    household: Uuid::new_v4(),
                    attendee_name: "Ana Torres".into(),
                    proxy_for: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Validation(_)));
    }

    #[tokio::test]
    async fn second_vote_is_already_voted() {
        let backend = backend();
        let proposal = backend.add_proposal("Pintura de fachada").await;
        backend.open_voting(proposal).await.unwrap();

        let household = backend.households()[0];
        backend
            .cast_vote(proposal, household, VoteChoice::Si)
            .await
            .unwrap();
        let err = backend
            .cast_vote(proposal, household, VoteChoice::No)
            .await
            .unwrap_err();
        assert!(err.is_already_voted());

        let tally = backend.results_tally(proposal).await.unwrap();
        assert_eq!(tally.si, 1);
        assert_eq!(tally.no, 0);
        assert_eq!(tally.abstentions, 14);
    }

    #[tokio::test]
    async fn single_active_proposal_is_enforced() {
        let backend = backend();
        let first = backend.add_proposal("Primera").await;
        let second = backend.add_proposal("Segunda").await;

        backend.open_voting(first).await.unwrap();
        let err = backend.open_voting(second).await.unwrap_err();
        assert!(matches!(err, BackendError::Rejected(_)));

        backend.close_voting(first).await.unwrap();
        backend.open_voting(second).await.unwrap();
    }

    #[tokio::test]
    async fn results_require_closed_voting() {
        let backend = backend();
        let proposal = backend.add_proposal("Cuotas").await;
        backend.open_voting(proposal).await.unwrap();

        let err = backend.publish_results(proposal).await.unwrap_err();
        assert!(matches!(err, BackendError::Rejected(_)));

        backend.close_voting(proposal).await.unwrap();
        backend.publish_results(proposal).await.unwrap();

        let assembly = backend.assembly_id().await;
        let snapshot = backend.fetch_assembly(assembly).await.unwrap().unwrap();
        assert_eq!(snapshot.published_results, Some(proposal));
        assert_eq!(snapshot.active_proposal, None);
    }

    #[tokio::test]
    async fn mutations_emit_change_events() {
        let backend = backend();
        let assembly = backend.assembly_id().await;
        let mut feed = backend.changes(assembly).await.unwrap();

        backend
            .check_in(
                assembly,
                CheckIn {
                    household: backend.households()[0],
                    attendee_name: "Ana Torres".into(),
                    proxy_for: None,
                },
            )
            .await
            .unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(1), feed.next())
            .await
            .expect("event timeout")
            .expect("event");
        assert_eq!(
            event,
            ChangeEvent {
                table: Table::Attendances,
                op: ChangeOp::Insert
            }
        );
    }

    #[tokio::test]
    async fn pause_and_resume_keep_elapsed_time() {
        let backend = backend();
        let assembly = backend.assembly_id().await;
        backend.start_debate_clock(assembly, 600).await.unwrap();
        backend.pause_debate_clock(assembly).await.unwrap();

        let snapshot = backend.fetch_assembly(assembly).await.unwrap().unwrap();
        assert!(snapshot.clock.paused);
        assert!(snapshot.clock.paused_elapsed_seconds <= 1);

        backend.resume_debate_clock(assembly).await.unwrap();
        let snapshot = backend.fetch_assembly(assembly).await.unwrap().unwrap();
        assert!(!snapshot.clock.paused);
        assert!(snapshot.clock.started_at.is_some());

        backend.stop_debate_clock(assembly).await.unwrap();
        assert_eq!(backend.stop_calls(), 1);
        let snapshot = backend.fetch_assembly(assembly).await.unwrap().unwrap();
        assert!(!snapshot.clock.active);
    }

    #[tokio::test]
    async fn disabled_feed_reports_transient() {
        let backend = backend();
        backend.disable_feed();
        let assembly = backend.assembly_id().await;
        let err = match backend.changes(assembly).await {
            Ok(_) => panic!("called `Result::unwrap_err()` on an `Ok` value"),
            Err(e) => e,
        };
        assert!(err.is_transient());
    }
}
