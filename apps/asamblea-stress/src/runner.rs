//! Simulated attendee flows: ramped check-in, snapshot polling until a
//! proposal opens, one vote, optional cleanup of the created rows.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use asamblea_client::{AssemblyBackend, CheckIn, HttpBackend};
use asamblea_core::{BackendError, VoteChoice};

use crate::report::{Outcome, Recorder};

const SNAPSHOT_POLL: Duration = Duration::from_millis(500);
const RESULT_QUEUE_DEPTH: usize = 1024;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub users: usize,
    pub ramp: Duration,
    pub cleanup: bool,
    pub vote_ratio_si: f64,
    pub assembly: Uuid,
    /// How long each attendee waits for a proposal to open before the
    /// voting ops are skipped (the run still reports check-in latencies).
    pub vote_wait: Duration,
}

fn choose(ratio_si: f64, roll: f64) -> VoteChoice {
    if roll < ratio_si {
        VoteChoice::Si
    } else {
        VoteChoice::No
    }
}

pub async fn run(backend: Arc<HttpBackend>, options: RunOptions) -> anyhow::Result<Recorder> {
    anyhow::ensure!(options.users > 0, "at least one simulated user required");

    let households = backend.fetch_households().await?;
    anyhow::ensure!(
        !households.is_empty(),
        "backend reports no registered households"
    );

    let (tx, mut rx) = mpsc::channel(RESULT_QUEUE_DEPTH);
    let ramp_step = options.ramp / options.users as u32;
    let handles: Vec<JoinHandle<()>> = (0..options.users)
        .map(|index| {
            let backend = backend.clone();
            let options = options.clone();
            let household = households[index % households.len()];
            let results = tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(ramp_step * index as u32).await;
                simulate_user(backend, options, index, household, results).await;
            })
        })
        .collect();
    drop(tx);

    let mut recorder = Recorder::new();
    while let Some(outcome) = rx.recv().await {
        recorder.record(outcome);
    }
    for handle in handles {
        let _ = handle.await;
    }
    Ok(recorder)
}

async fn simulate_user(
    backend: Arc<HttpBackend>,
    options: RunOptions,
    index: usize,
    household: Uuid,
    results: mpsc::Sender<Outcome>,
) {
    let attendance = {
        let started = Instant::now();
        match backend
            .check_in(
                options.assembly,
                CheckIn {
                    household,
                    attendee_name: format!("Usuario Prueba {index}"),
                    proxy_for: None,
                },
            )
            .await
        {
            Ok(attendance) => {
                send(
                    &results,
                    Outcome::Success {
                        op: "check_in",
                        elapsed: started.elapsed(),
                    },
                )
                .await;
                Some(attendance)
            }
            Err(err) => {
                warn!(target = "asamblea.stress", index, error = %err, "check-in failed");
                send(&results, Outcome::Failure { op: "check_in" }).await;
                None
            }
        }
    };

    if let Some(proposal) = wait_for_proposal(&backend, &options, &results).await {
        let roll = rand::thread_rng().gen::<f64>();
        let choice = choose(options.vote_ratio_si, roll);
        let started = Instant::now();
        match backend.cast_vote(proposal, household, choice).await {
            Ok(()) => {
                send(
                    &results,
                    Outcome::Success {
                        op: "cast_vote",
                        elapsed: started.elapsed(),
                    },
                )
                .await
            }
            Err(BackendError::AlreadyVoted) => {
                send(&results, Outcome::AlreadyDone { op: "cast_vote" }).await
            }
            Err(err) => {
                warn!(target = "asamblea.stress", index, error = %err, "vote failed");
                send(&results, Outcome::Failure { op: "cast_vote" }).await;
            }
        }
    } else {
        debug!(target = "asamblea.stress", index, "no proposal opened; voting skipped");
    }

    if options.cleanup {
        if let Some(attendance) = attendance {
            let started = Instant::now();
            match backend.remove_attendance(attendance.id).await {
                Ok(()) => {
                    send(
                        &results,
                        Outcome::Success {
                            op: "cleanup",
                            elapsed: started.elapsed(),
                        },
                    )
                    .await
                }
                Err(err) => {
                    warn!(target = "asamblea.stress", index, error = %err, "cleanup failed");
                    send(&results, Outcome::Failure { op: "cleanup" }).await;
                }
            }
        }
    }
}

async fn wait_for_proposal(
    backend: &HttpBackend,
    options: &RunOptions,
    results: &mpsc::Sender<Outcome>,
) -> Option<Uuid> {
    let deadline = Instant::now() + options.vote_wait;
    loop {
        let started = Instant::now();
        match backend.fetch_assembly(options.assembly).await {
            Ok(Some(snapshot)) => {
                send(
                    results,
                    Outcome::Success {
                        op: "fetch_snapshot",
                        elapsed: started.elapsed(),
                    },
                )
                .await;
                if let Some(proposal) = snapshot.active_proposal {
                    return Some(proposal);
                }
            }
            Ok(None) => {
                send(results, Outcome::Failure { op: "fetch_snapshot" }).await;
            }
            Err(err) => {
                debug!(target = "asamblea.stress", error = %err, "snapshot poll failed");
                send(results, Outcome::Failure { op: "fetch_snapshot" }).await;
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(SNAPSHOT_POLL).await;
    }
}

async fn send(results: &mpsc::Sender<Outcome>, outcome: Outcome) {
    if results.send(outcome).await.is_err() {
        debug!(target = "asamblea.stress", "result collector gone");
    }
}
