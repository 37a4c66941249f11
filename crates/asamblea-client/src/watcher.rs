//! Remote state watcher.
//!
//! Keeps a fresh copy of the assembly snapshot and notifies dependents on
//! every relevant change. The change-feed subscription is best-effort; a
//! fallback interval re-fetch covers environments where push delivery is
//! unreliable. A failed fetch keeps the last known snapshot in place and
//! retries on the next tick or feed event.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use asamblea_core::AssemblySnapshot;

use crate::backend::{AssemblyBackend, ChangeEvent, Table};

const EVENT_FANOUT_DEPTH: usize = 64;

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
        }
    }
}

pub struct StateWatcher {
    snapshots: watch::Receiver<Option<AssemblySnapshot>>,
    events: broadcast::Sender<ChangeEvent>,
    task: JoinHandle<()>,
}

impl StateWatcher {
    pub fn spawn(
        backend: Arc<dyn AssemblyBackend>,
        assembly: Uuid,
        config: WatcherConfig,
    ) -> Self {
        let (snapshot_tx, snapshots) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_FANOUT_DEPTH);
        let event_tx = events.clone();
        let task = tokio::spawn(async move {
            run(backend, assembly, config, snapshot_tx, event_tx).await;
        });
        Self {
            snapshots,
            events,
            task,
        }
    }

    /// Last known snapshot; `None` until the first successful fetch.
    pub fn snapshots(&self) -> watch::Receiver<Option<AssemblySnapshot>> {
        self.snapshots.clone()
    }

    /// Re-broadcast of raw change events (attendance changes drive quorum
    /// refresh downstream).
    pub fn events(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    /// Releases the background task. Required on screen teardown; the
    /// watcher is construct-on-enter, release-on-exit.
    pub fn shutdown(self) {
        self.task.abort();
    }
}

async fn run(
    backend: Arc<dyn AssemblyBackend>,
    assembly: Uuid,
    config: WatcherConfig,
    snapshot_tx: watch::Sender<Option<AssemblySnapshot>>,
    event_tx: broadcast::Sender<ChangeEvent>,
) {
    let mut feed = match backend.changes(assembly).await {
        Ok(stream) => Some(stream),
        Err(err) => {
            warn!(
                target = "asamblea.watcher",
                error = %err,
                "change feed unavailable; relying on fallback polling"
            );
            None
        }
    };

    let mut interval = tokio::time::interval(config.poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        let event = tokio::select! {
            _ = interval.tick() => None,
            next = next_event(&mut feed) => match next {
                Some(event) => Some(event),
                None => {
                    warn!(
                        target = "asamblea.watcher",
                        "change feed ended; relying on fallback polling"
                    );
                    feed = None;
                    continue;
                }
            },
        };

        if let Some(event) = event {
            let _ = event_tx.send(event);
            if event.table != Table::Assemblies {
                continue;
            }
        }
        refresh(backend.as_ref(), assembly, &snapshot_tx).await;
    }
}

async fn next_event(feed: &mut Option<BoxStream<'static, ChangeEvent>>) -> Option<ChangeEvent> {
    match feed {
        Some(stream) => stream.next().await,
        // No feed: park this branch and leave the interval in charge.
        None => std::future::pending().await,
    }
}

async fn refresh(
    backend: &dyn AssemblyBackend,
    assembly: Uuid,
    snapshot_tx: &watch::Sender<Option<AssemblySnapshot>>,
) {
    match backend.fetch_assembly(assembly).await {
        Ok(Some(snapshot)) => {
            snapshot_tx.send_if_modified(move |current| {
                if current.as_ref() == Some(&snapshot) {
                    return false;
                }
                *current = Some(snapshot);
                true
            });
        }
        Ok(None) => {
            debug!(target = "asamblea.watcher", %assembly, "assembly row not found")
        }
        Err(err) => {
            warn!(
                target = "asamblea.watcher",
                error = %err,
                "snapshot refresh failed; keeping last snapshot"
            );
        }
    }
}
