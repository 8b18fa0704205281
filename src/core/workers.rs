use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;

/// One kind of background operation. At most one worker per kind runs at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkerKind {
    UpdatesCheck,
    /// Keyed by resource type, so different resources download side by side.
    RequestResource(String),
    /// Revision fetch and revision sync share this slot.
    Revisions,
    ProjectClone,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerKind::UpdatesCheck => write!(f, "updates-check"),
            WorkerKind::RequestResource(id) => write!(f, "resource-request:{id}"),
            WorkerKind::Revisions => write!(f, "revisions"),
            WorkerKind::ProjectClone => write!(f, "project-clone"),
        }
    }
}

impl WorkerKind {
    /// OS thread name. Leaves out the resource type, which comes from the server.
    fn thread_name(&self) -> &'static str {
        match self {
            WorkerKind::UpdatesCheck => "tracksync-updates-check",
            WorkerKind::RequestResource(_) => "tracksync-resource-request",
            WorkerKind::Revisions => "tracksync-revisions",
            WorkerKind::ProjectClone => "tracksync-project-clone",
        }
    }
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Cooperative cancellation. The worker polls it; nobody is interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

const SLEEP_SLICE: Duration = Duration::from_millis(25);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn should_exit(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Sleeps up to `duration`. Returns false if cancelled before it elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < duration {
            if self.should_exit() {
                return false;
            }
            let remaining = duration.saturating_sub(start.elapsed());
            thread::sleep(remaining.min(SLEEP_SLICE));
        }
        !self.should_exit()
    }

    /// `Err(Cancelled)` once signalled, for use with `?` between steps.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.should_exit() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

struct WorkerHandle {
    cancel: CancelFlag,
    handle: JoinHandle<()>,
    started_at: Instant,
}

impl WorkerHandle {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInfo {
    pub kind: String,
    pub running_for_ms: u64,
    pub cancel_requested: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub running: Vec<WorkerInfo>,
    pub started_total: u64,
    pub rejected_total: u64,
}

#[derive(Default)]
struct RegistryState {
    workers: HashMap<WorkerKind, WorkerHandle>,
    started_total: u64,
    rejected_total: u64,
    closed: bool,
}

/// Map from operation kind to the in-flight worker, if any.
#[derive(Default)]
pub struct WorkerRegistry {
    state: Mutex<RegistryState>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Starts `job` on its own thread unless a worker of `kind` is still running
    /// or the registry was shut down. Returns `Ok(false)` (and changes nothing)
    /// in that case.
    pub fn try_spawn<F>(&self, kind: WorkerKind, job: F) -> Result<bool>
    where
        F: FnOnce(CancelFlag) + Send + 'static,
    {
        let mut st = self.lock();
        if st.closed {
            return Ok(false);
        }
        if st.workers.get(&kind).is_some_and(|w| w.is_running()) {
            st.rejected_total += 1;
            return Ok(false);
        }

        // Reap the finished one before replacing it.
        if let Some(done) = st.workers.remove(&kind) {
            let _ = done.handle.join();
        }

        let cancel = CancelFlag::new();
        let flag = cancel.clone();
        let handle = thread::Builder::new()
            .name(kind.thread_name().to_string())
            .spawn(move || job(flag))
            .with_context(|| format!("spawn {kind} worker"))?;

        st.workers.insert(
            kind,
            WorkerHandle {
                cancel,
                handle,
                started_at: Instant::now(),
            },
        );
        st.started_total += 1;
        Ok(true)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn is_running(&self, kind: &WorkerKind) -> bool {
        self.lock()
            .workers
            .get(kind)
            .is_some_and(|w| w.is_running())
    }

    /// Asks the running worker of `kind` to exit. Returns whether one was running.
    pub fn signal(&self, kind: &WorkerKind) -> bool {
        let st = self.lock();
        match st.workers.get(kind) {
            Some(w) if w.is_running() => {
                w.cancel.signal();
                true
            }
            _ => false,
        }
    }

    pub fn running_kinds(&self) -> Vec<WorkerKind> {
        let mut out: Vec<WorkerKind> = self
            .lock()
            .workers
            .iter()
            .filter(|(_, w)| w.is_running())
            .map(|(k, _)| k.clone())
            .collect();
        out.sort();
        out
    }

    pub fn stats(&self) -> WorkerStats {
        let st = self.lock();
        let mut running: Vec<WorkerInfo> = st
            .workers
            .iter()
            .filter(|(_, w)| w.is_running())
            .map(|(k, w)| WorkerInfo {
                kind: k.to_string(),
                running_for_ms: w.started_at.elapsed().as_millis() as u64,
                cancel_requested: w.cancel.should_exit(),
            })
            .collect();
        running.sort_by(|a, b| a.kind.cmp(&b.kind));
        WorkerStats {
            running,
            started_total: st.started_total,
            rejected_total: st.rejected_total,
        }
    }

    /// Polls until nothing runs. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if self.running_kinds().is_empty() {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            thread::sleep(SLEEP_SLICE);
        }
    }

    /// Signals every worker and joins them. Nothing can be spawned afterwards.
    /// Workers that ignore the signal keep the caller waiting.
    pub fn shutdown(&self) {
        // Take the handles out so we don't hold the lock while joining.
        let workers: Vec<(WorkerKind, WorkerHandle)> = {
            let mut st = self.lock();
            st.closed = true;
            st.workers.drain().collect()
        };
        for (_, w) in &workers {
            w.cancel.signal();
        }
        for (kind, w) in workers {
            if w.handle.join().is_err() {
                tracing::warn!(%kind, "worker panicked");
            }
        }
    }
}
