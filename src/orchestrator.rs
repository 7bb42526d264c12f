//! Single-flight scan orchestration.
//!
//! `start_scan` does the check-and-set on the status under one lock and hands
//! a [`ScanJob`] to a dispatcher task. The dispatcher runs each job on its own
//! worker task, and applies the worker's [`Outcome`] back onto the status.
//! Every start bumps an epoch; an outcome whose epoch is no longer the live
//! one (after a stop, or a later start) leaves the status untouched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::args;
use crate::engine::ScanEngine;
use crate::error::{Error, Result};
use crate::report::{self, ReportMeta};
use crate::store::ReportStore;
use crate::types::{ReportId, ScanRequest, ScanStatus};

pub const STOPPED_MESSAGE: &str = "stopped by user";

/// Returned by an accepted [`ScanOrchestrator::start_scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub epoch: u64,
    pub arguments: Vec<String>,
}

#[derive(Debug)]
struct ScanJob {
    epoch: u64,
    request: ScanRequest,
    arguments: Vec<String>,
}

/// What a worker reports back to the dispatcher.
#[derive(Debug)]
enum Outcome {
    Completed { id: ReportId, name: String },
    Failed(String),
}

#[derive(Debug, Default)]
struct RunState {
    status: ScanStatus,
    epoch: u64,
}

impl RunState {
    /// True while `epoch` is the run the status currently describes.
    fn is_live(&self, epoch: u64) -> bool {
        self.status.running && self.epoch == epoch
    }
}

#[derive(Debug, Clone, Default)]
struct SharedState(Arc<Mutex<RunState>>);

impl SharedState {
    fn lock(&self) -> MutexGuard<'_, RunState> {
        // A panic while holding this lock only ever interrupts a field update.
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the in-flight slot, the live status and the report store handle.
///
/// Cloning yields another handle to the same orchestrator. Must be created
/// inside a tokio runtime.
#[derive(Clone)]
pub struct ScanOrchestrator {
    state: SharedState,
    store: Arc<dyn ReportStore>,
    jobs: mpsc::UnboundedSender<ScanJob>,
}

impl ScanOrchestrator {
    pub fn new(engine: Arc<dyn ScanEngine>, store: Arc<dyn ReportStore>) -> Self {
        let state = SharedState::default();
        let (jobs, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch(rx, engine, store.clone(), state.clone()));
        Self { state, store, jobs }
    }

    pub fn store(&self) -> &Arc<dyn ReportStore> {
        &self.store
    }

    /// Snapshot of the live status.
    pub fn status(&self) -> ScanStatus {
        self.state.lock().status.clone()
    }

    /// Accept a scan and return immediately. The scan itself runs in the
    /// background; poll [`status`](Self::status) for the outcome.
    pub fn start_scan(&self, request: ScanRequest) -> Result<Accepted> {
        if request.host.trim().is_empty() {
            return Err(Error::invalid("host must not be empty"));
        }
        let arguments = args::build(
            request.profile,
            &request.port_spec,
            &request.script_selection,
            request.extra_args.as_ref(),
        );

        let mut st = self.state.lock();
        if st.status.running {
            return Err(Error::AlreadyRunning);
        }
        st.epoch += 1;
        let epoch = st.epoch;
        let message = format!("Starting scan of {}:{}...", request.host, request.port_spec);
        let host = request.host.clone();
        let job = ScanJob {
            epoch,
            request,
            arguments: arguments.clone(),
        };
        if self.jobs.send(job).is_err() {
            return Err(Error::WorkerUnavailable);
        }
        st.status.running = true;
        st.status.message = message;
        drop(st);

        info!(epoch, %host, args = ?arguments, "scan accepted");
        Ok(Accepted { epoch, arguments })
    }

    /// Mark the current run as stopped.
    ///
    /// The engine call already dispatched keeps going; its eventual outcome is
    /// discarded for status purposes.
    pub fn request_stop(&self) -> Result<()> {
        let mut st = self.state.lock();
        if !st.status.running {
            return Err(Error::NotRunning);
        }
        st.status.running = false;
        st.status.message = STOPPED_MESSAGE.to_string();
        info!(epoch = st.epoch, "scan stopped by user");
        Ok(())
    }
}

async fn dispatch(
    mut jobs: mpsc::UnboundedReceiver<ScanJob>,
    engine: Arc<dyn ScanEngine>,
    store: Arc<dyn ReportStore>,
    state: SharedState,
) {
    let mut workers: JoinSet<Outcome> = JoinSet::new();
    let mut epochs: HashMap<tokio::task::Id, u64> = HashMap::new();

    loop {
        tokio::select! {
            job = jobs.recv() => {
                let Some(job) = job else { break };
                let epoch = job.epoch;
                {
                    let mut st = state.lock();
                    if st.is_live(epoch) {
                        st.status.message = format!("Running scan of {}...", job.request.host);
                    }
                }
                let handle = workers.spawn(execute(job, engine.clone(), store.clone()));
                epochs.insert(handle.id(), epoch);
            }
            Some(joined) = workers.join_next_with_id(), if !workers.is_empty() => {
                let (id, outcome) = match joined {
                    Ok((id, outcome)) => (id, outcome),
                    Err(e) => {
                        error!(error = %e, "scan worker aborted");
                        (e.id(), Outcome::Failed(format!("scan worker aborted: {e}")))
                    }
                };
                if let Some(epoch) = epochs.remove(&id) {
                    finish(&state, epoch, outcome);
                }
            }
        }
    }
}

/// Worker body: engine call, then report build and persist. Runs outside
/// every lock.
async fn execute(job: ScanJob, engine: Arc<dyn ScanEngine>, store: Arc<dyn ReportStore>) -> Outcome {
    let ScanJob {
        epoch,
        request,
        arguments,
    } = job;

    let result = match engine.scan(&request.host, &arguments).await {
        Ok(result) => result,
        Err(e) => {
            warn!(epoch, host = %request.host, error = %e, "scan failed");
            return Outcome::Failed(e.to_string());
        }
    };

    let meta = ReportMeta::from_request(&request, arguments, OffsetDateTime::now_utc());
    let report = report::build_report(&result, meta);
    let (id, name) = (report.id, report.name.clone());
    match store.create(report).await {
        Ok(()) => {
            info!(epoch, %id, %name, "report stored");
            Outcome::Completed { id, name }
        }
        Err(e) => {
            error!(epoch, error = %e, "failed to store report");
            Outcome::Failed(format!("could not store report: {e}"))
        }
    }
}

fn finish(state: &SharedState, epoch: u64, outcome: Outcome) {
    let mut st = state.lock();
    if !st.is_live(epoch) {
        info!(epoch, current = st.epoch, "discarding outcome of a stopped run");
        return;
    }
    match outcome {
        Outcome::Completed { id, name } => {
            st.status.message = format!("Scan completed. Report: {name}");
            st.status.last_report_id = Some(id);
        }
        Outcome::Failed(cause) => {
            st.status.message = format!("Scan failed: {cause}");
        }
    }
    st.status.running = false;
}
