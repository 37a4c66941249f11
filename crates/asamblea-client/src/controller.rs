//! Resident session controller.
//!
//! One cooperative event loop per attendee device. It folds the snapshot
//! watch channel, the change-event fan-out, the admin directive channel,
//! explicit user navigation, and a per-second local tick into a single
//! stream of [`SessionEvent`]s. Redirect events are delivered reliably;
//! per-second projections may be dropped under consumer backpressure.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use asamblea_core::{
    compute_quorum, entry_window, project_clock, AssemblySnapshot, ClockProjection, Directive,
    EntryWindow, Quorum, Redirect, RedirectPolicy,
};
use signal_bus::{SignalMessage, Signals};

use crate::backend::{AssemblyBackend, ChangeEvent, Table};
use crate::directives::{decode_directive, DirectiveSubscriber};
use crate::watcher::{StateWatcher, WatcherConfig};

const EVENT_QUEUE_DEPTH: usize = 64;
const COMMAND_QUEUE_DEPTH: usize = 8;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub assembly: Uuid,
    pub attendance: Uuid,
    pub household: Uuid,
    pub tick_interval: Duration,
    pub poll_interval: Duration,
}

impl SessionConfig {
    pub fn new(assembly: Uuid, attendance: Uuid, household: Uuid) -> Self {
        Self {
            assembly,
            attendance,
            household,
            tick_interval: Duration::from_secs(1),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Everything the view layer reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Redirect(Redirect),
    Entry(EntryWindow),
    Clock(ClockProjection),
    Quorum(Quorum),
    /// The admin authorized this attendee's exit request.
    ExitAuthorized,
}

/// Explicit user navigation the redirect policy must know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    LeftVoting,
    LeftResults,
}

/// Handle for one running session. Construct on screen enter, `close` on
/// exit; dropping without closing leaves the background tasks running.
pub struct Session {
    events: mpsc::Receiver<SessionEvent>,
    commands: mpsc::Sender<SessionCommand>,
    watcher: StateWatcher,
    task: JoinHandle<()>,
}

impl Session {
    pub fn spawn<S: Signals + 'static>(
        backend: Arc<dyn AssemblyBackend>,
        signals: Arc<S>,
        config: SessionConfig,
    ) -> Self {
        let watcher = StateWatcher::spawn(
            backend.clone(),
            config.assembly,
            WatcherConfig {
                poll_interval: config.poll_interval,
            },
        );
        let snapshots = watcher.snapshots();
        let changes = watcher.events();
        let directives = DirectiveSubscriber::new(signals, config.assembly).subscribe();
        let (event_tx, events) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let task = tokio::spawn(run(
            backend, config, snapshots, changes, directives, command_rx, event_tx,
        ));
        Self {
            events,
            commands,
            watcher,
            task,
        }
    }

    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    pub fn commands(&self) -> mpsc::Sender<SessionCommand> {
        self.commands.clone()
    }

    /// Releases every subscription and background task.
    pub fn close(self) {
        self.task.abort();
        self.watcher.shutdown();
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    backend: Arc<dyn AssemblyBackend>,
    config: SessionConfig,
    mut snapshots: watch::Receiver<Option<AssemblySnapshot>>,
    mut changes: broadcast::Receiver<ChangeEvent>,
    mut directives: broadcast::Receiver<SignalMessage>,
    mut commands: mpsc::Receiver<SessionCommand>,
    events: mpsc::Sender<SessionEvent>,
) {
    let mut policy = RedirectPolicy::new();
    let mut tick = tokio::time::interval(config.tick_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // One stop call per clock start; retried only for a distinct start.
    let mut stop_sent_for: Option<DateTime<Utc>> = None;
    let mut last_quorum: Option<Quorum> = None;
    let mut directives_open = true;

    refresh_quorum(backend.as_ref(), &config, &events, &mut last_quorum).await;

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if let Some(snapshot) = snapshot {
                    if let Some(redirect) = policy.on_snapshot(&snapshot) {
                        if events.send(SessionEvent::Redirect(redirect)).await.is_err() {
                            break;
                        }
                    }
                }
            }
            change = changes.recv() => {
                match change {
                    Ok(event @ ChangeEvent { table: Table::Attendances, .. }) => {
                        debug!(target = "asamblea.session", op = ?event.op, "attendance change");
                        refresh_quorum(backend.as_ref(), &config, &events, &mut last_quorum).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!(target = "asamblea.session", missed, "change events lagged; refreshing quorum");
                        refresh_quorum(backend.as_ref(), &config, &events, &mut last_quorum).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            signal = directives.recv(), if directives_open => {
                match signal {
                    Ok(message) => {
                        if let Some(directive) = decode_directive(&message) {
                            if let Some(redirect) = policy.on_directive(&directive, config.attendance) {
                                if events.send(SessionEvent::Redirect(redirect)).await.is_err() {
                                    break;
                                }
                            }
                            if let Directive::ExitAuthorized { attendance } = directive {
                                if attendance == config.attendance
                                    && events.send(SessionEvent::ExitAuthorized).await.is_err()
                                {
                                    break;
                                }
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(target = "asamblea.session", missed, "directives lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!(target = "asamblea.session", "directive channel closed");
                        directives_open = false;
                    }
                }
            }
            command = commands.recv() => {
                match command {
                    Some(SessionCommand::LeftVoting) => policy.user_left_voting(),
                    Some(SessionCommand::LeftResults) => policy.user_left_results(),
                    // Session handle gone.
                    None => break,
                }
                // Back in the waiting room the pending snapshot may already
                // warrant the next redirect; the watch channel will not
                // re-deliver an unchanged value.
                let snapshot = snapshots.borrow().clone();
                if let Some(snapshot) = snapshot {
                    if let Some(redirect) = policy.on_snapshot(&snapshot) {
                        if events.send(SessionEvent::Redirect(redirect)).await.is_err() {
                            break;
                        }
                    }
                }
            }
            _ = tick.tick() => {
                let snapshot = snapshots.borrow().clone();
                let Some(snapshot) = snapshot else { continue };
                let now = Utc::now();

                if let Some(entry) = entry_window(snapshot.entry_cutoff, now) {
                    if events.try_send(SessionEvent::Entry(entry)).is_err() {
                        debug!(target = "asamblea.session", "dropped entry tick");
                    }
                }

                let projection = project_clock(&snapshot.clock, now);
                if projection.is_expired() && stop_sent_for != snapshot.clock.started_at {
                    stop_sent_for = snapshot.clock.started_at;
                    if let Err(err) = backend.stop_debate_clock(config.assembly).await {
                        warn!(
                            target = "asamblea.session",
                            error = %err,
                            "debate clock stop failed"
                        );
                    }
                }
                if events.try_send(SessionEvent::Clock(projection)).is_err() {
                    debug!(target = "asamblea.session", "dropped clock tick");
                }
            }
        }
    }
}

async fn refresh_quorum(
    backend: &dyn AssemblyBackend,
    config: &SessionConfig,
    events: &mpsc::Sender<SessionEvent>,
    last: &mut Option<Quorum>,
) {
    let rows = match backend.fetch_attendances(config.assembly).await {
        Ok(rows) => rows,
        Err(err) => {
            warn!(
                target = "asamblea.session",
                error = %err,
                "attendance refresh failed; keeping last quorum"
            );
            return;
        }
    };
    let total = match backend.total_households().await {
        Ok(total) => total,
        Err(err) => {
            warn!(
                target = "asamblea.session",
                error = %err,
                "household count failed; keeping last quorum"
            );
            return;
        }
    };
    let quorum = compute_quorum(&rows, total);
    if last.as_ref() == Some(&quorum) {
        return;
    }
    *last = Some(quorum);
    if events.send(SessionEvent::Quorum(quorum)).await.is_err() {
        debug!(target = "asamblea.session", "session consumer gone");
    }
}
