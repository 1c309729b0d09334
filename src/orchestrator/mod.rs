//! Orchestrator - Desired-State Reconciliation
//!
//! ## Responsibilities
//!
//! - Periodically compare desired stream state against running workers
//! - Spawn a worker task per stream that should be running
//! - Reap finished worker tasks; never cancel a running one
//!
//! Workers observe their own desired status and exit on their own; the
//! orchestrator only ever adds to the set or garbage-collects entries whose
//! task has already finished. A worker that terminated in the error state
//! is not respawned until an operator re-activates the stream.

use crate::alert_dedup::AlertDeduplicator;
use crate::detection_log::DetectionSink;
use crate::detector::Detector;
use crate::frame_cache::LiveFrameCache;
use crate::frame_source::SourceOpener;
use crate::stream_store::StreamStore;
use crate::stream_worker::{StreamWorker, WorkerExit, WorkerPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::interval;
use uuid::Uuid;

/// Everything a worker needs, cloned into each spawn
#[derive(Clone)]
pub struct WorkerDeps {
    pub store: Arc<dyn StreamStore>,
    pub sink: Arc<dyn DetectionSink>,
    pub detector: Arc<dyn Detector>,
    pub cache: Arc<LiveFrameCache>,
    pub dedup: Arc<AlertDeduplicator>,
    pub opener: Arc<dyn SourceOpener>,
    pub policy: WorkerPolicy,
}

type WorkerMap = Arc<RwLock<HashMap<Uuid, JoinHandle<WorkerExit>>>>;

/// Orchestrator instance
pub struct Orchestrator {
    deps: WorkerDeps,
    tick: Duration,
    workers: WorkerMap,
    running: Arc<RwLock<bool>>,
}

impl Orchestrator {
    pub fn new(deps: WorkerDeps) -> Self {
        Self::with_tick(deps, Duration::from_secs(5))
    }

    pub fn with_tick(deps: WorkerDeps, tick: Duration) -> Self {
        Self {
            deps,
            tick,
            workers: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Start the reconciliation loop
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Orchestrator already running");
                return;
            }
            *running = true;
        }

        tracing::info!(tick_secs = self.tick.as_secs(), "Starting orchestrator");

        let deps = self.deps.clone();
        let workers = self.workers.clone();
        let running = self.running.clone();
        let tick = self.tick;

        tokio::spawn(async move {
            let mut interval = interval(tick);

            loop {
                interval.tick().await;

                {
                    let is_running = running.read().await;
                    if !*is_running {
                        break;
                    }
                }

                Self::reconcile(&deps, &workers).await;
            }

            tracing::info!("Orchestrator stopped");
        });
    }

    /// Stop the reconciliation loop. Already-running workers keep going
    /// until they observe their own stop condition.
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        tracing::info!("Stopping orchestrator");
    }

    /// Number of workers currently tracked (finished tasks included until
    /// the next reap)
    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }

    /// One reconciliation pass: reap finished tasks, then spawn workers for
    /// desired-active streams that have none
    pub async fn reconcile(deps: &WorkerDeps, workers: &WorkerMap) {
        Self::reap_finished(workers).await;

        // Fail open: a store outage must not touch running workers
        let active = match deps.store.list_active().await {
            Ok(streams) => streams,
            Err(e) => {
                tracing::warn!(error = %e, "Could not list active streams, skipping cycle");
                return;
            }
        };

        let mut map = workers.write().await;
        for stream in active {
            if map.contains_key(&stream.id) {
                continue;
            }

            tracing::info!(
                stream_id = %stream.id,
                name = %stream.name,
                "Spawning stream worker"
            );

            let worker = StreamWorker::new(
                stream.clone(),
                deps.store.clone(),
                deps.sink.clone(),
                deps.detector.clone(),
                deps.cache.clone(),
                deps.dedup.clone(),
                deps.opener.clone(),
                deps.policy.clone(),
            );
            map.insert(stream.id, tokio::spawn(worker.run()));
        }
    }

    /// Drop map entries whose task has run to completion
    async fn reap_finished(workers: &WorkerMap) {
        let mut map = workers.write().await;
        let finished: Vec<Uuid> = map
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(id, _)| *id)
            .collect();

        for id in finished {
            if let Some(handle) = map.remove(&id) {
                match handle.await {
                    Ok(exit) => {
                        tracing::info!(stream_id = %id, exit = ?exit, "Worker reaped")
                    }
                    Err(e) => {
                        // A panicking worker is a bug, but it must not take
                        // the orchestrator down with it
                        tracing::error!(stream_id = %id, error = %e, "Worker task panicked")
                    }
                }
            }
        }
    }
}
