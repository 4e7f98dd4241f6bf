//! Batch supervisor.
//!
//! The [`Supervisor`] walks the discovered jobs in order and launches one
//! analysis process per job, never holding more than `max_processes`
//! processes at once. When the cap is reached it blocks on the completion
//! queue until a waiter reports an exit, then launches the next job.
//!
//! ```text
//!  Submitting ──(jobs exhausted | interrupt | host out of processes)──▶ Draining ──(nothing tracked)──▶ Done
//! ```
//!
//! An interrupt stops submission immediately, sends the platform interrupt
//! to every running child and then keeps draining until every launched
//! process has reported its exit. No launched process is left unobserved.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cancel::{force_kill_running, interrupt_running};
use crate::collector::{self, CompletionEvent, Outcome, ProcessHandle};
use crate::job::Job;
use crate::launcher::{LaunchError, Launcher};

/// Concurrency cap used when zero is requested.
const DEFAULT_MAX_PROCESSES: usize = 2;

/// Phase of a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Launching jobs, blocking whenever the cap is reached.
    Submitting,
    /// No further launches; waiting for launched processes to exit.
    Draining,
    /// Every launched process has reported its exit.
    Done,
}

/// What happened during one batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Completion events in the order they were consumed.
    pub events: Vec<CompletionEvent>,
    /// Jobs that got a launch attempt.
    pub submitted: usize,
    /// Processes actually started.
    pub launched: usize,
    /// Jobs never attempted because the run was cancelled or aborted.
    pub not_submitted: usize,
    /// Largest number of processes tracked at the same time.
    pub peak_running: usize,
    /// Interrupt signals delivered.
    pub signalled: usize,
    /// Processes killed after the grace period ran out.
    pub force_killed: usize,
    pub cancelled: bool,
    pub state: SupervisorState,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.events.iter().filter(|e| e.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.events.len() - self.succeeded()
    }

    pub fn launch_failures(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e.outcome, Outcome::LaunchFailed(_)))
            .count()
    }
}

/// Errors that end a batch run early.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The host refused to start processes. Raised only after everything
    /// already launched has been drained.
    #[error("Cannot start analysis processes: {source}")]
    ResourceExhausted {
        #[source]
        source: LaunchError,
        report: Box<RunReport>,
    },

    #[error("Completion queue closed with {outstanding} processes outstanding")]
    CompletionQueueClosed { outstanding: usize },
}

/// Bounded-concurrency runner for analysis jobs.
pub struct Supervisor<L> {
    launcher: L,
    max_processes: usize,
    /// Grace period between interrupt and force-kill. `None` never kills.
    kill_after: Option<Duration>,
}

impl<L: Launcher> Supervisor<L> {
    pub fn new(launcher: L, max_processes: usize) -> Self {
        let limit = if max_processes == 0 {
            DEFAULT_MAX_PROCESSES
        } else {
            max_processes
        };
        Self {
            launcher,
            max_processes: limit,
            kill_after: None,
        }
    }

    /// Force-kill processes still running this long after an interrupt.
    #[must_use]
    pub fn with_kill_after(mut self, kill_after: Option<Duration>) -> Self {
        self.kill_after = kill_after;
        self
    }

    pub const fn max_processes(&self) -> usize {
        self.max_processes
    }

    /// Run `jobs` to completion or until `cancel` fires.
    ///
    /// Individual job failures are reported in the returned [`RunReport`];
    /// only the host running out of process slots is an error.
    pub async fn run(
        &self,
        jobs: Vec<Job>,
        cancel: &CancellationToken,
    ) -> Result<RunReport, SupervisorError> {
        let total = jobs.len();
        let (completions_tx, mut completions_rx) = mpsc::unbounded_channel();
        let mut run = RunState::new();

        info!(
            jobs = total,
            max_processes = self.max_processes,
            "Starting analysis batch"
        );

        let mut fatal = None;
        'submit: for job in jobs {
            if cancel.is_cancelled() {
                break;
            }

            while run.tracked.len() >= self.max_processes {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break 'submit,
                    event = completions_rx.recv() => run.consume(event)?,
                }
            }

            run.report.submitted += 1;
            match self.launcher.spawn(&job) {
                Ok(child) => {
                    let handle = collector::spawn_waiter(
                        job.id,
                        job.name().into_owned(),
                        child,
                        completions_tx.clone(),
                    );
                    run.track(handle);
                }
                Err(e) if e.is_resource_exhaustion() => {
                    error!(job = %job.name(), error = %e, "Host cannot start more processes, aborting batch");
                    run.record_launch_failure(&job, &e);
                    fatal = Some(e);
                    break;
                }
                Err(e) => run.record_launch_failure(&job, &e),
            }
        }

        run.enter(SupervisorState::Draining);
        run.report.not_submitted = total - run.report.submitted;
        if run.report.not_submitted > 0 {
            info!(skipped = run.report.not_submitted, "Jobs left unsubmitted");
        }

        let mut interrupted = false;
        let mut kill_at = None;
        if cancel.is_cancelled() || fatal.is_some() {
            interrupted = true;
            kill_at = self.interrupt(&mut run);
        }

        while !run.tracked.is_empty() {
            tokio::select! {
                biased;
                () = cancel.cancelled(), if !interrupted => {
                    interrupted = true;
                    kill_at = self.interrupt(&mut run);
                }
                () = sleep_until(kill_at.unwrap_or_else(Instant::now)), if kill_at.is_some() => {
                    kill_at = None;
                    run.report.force_killed += force_kill_running(run.tracked.values());
                }
                event = completions_rx.recv() => run.consume(event)?,
            }
        }

        run.enter(SupervisorState::Done);
        run.report.cancelled = cancel.is_cancelled();
        let report = run.report;

        info!(
            completed = report.events.len(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            cancelled = report.cancelled,
            "Analysis batch finished"
        );

        match fatal {
            Some(source) => Err(SupervisorError::ResourceExhausted {
                source,
                report: Box::new(report),
            }),
            None => Ok(report),
        }
    }

    /// Interrupt every running process; returns the force-kill deadline.
    fn interrupt(&self, run: &mut RunState) -> Option<Instant> {
        let signalled = interrupt_running(run.tracked.values());
        run.report.signalled += signalled;
        info!(
            signalled,
            outstanding = run.tracked.len(),
            "Interrupted running analysis processes"
        );
        self.kill_after.map(|grace| Instant::now() + grace)
    }
}

/// Mutable bookkeeping of one run, owned by the supervisor loop.
struct RunState {
    tracked: HashMap<usize, ProcessHandle>,
    report: RunReport,
    #[cfg(feature = "metrics")]
    metrics: stormbatch_core::metrics::BatchMetrics,
}

impl RunState {
    fn new() -> Self {
        Self {
            tracked: HashMap::new(),
            report: RunReport {
                events: Vec::new(),
                submitted: 0,
                launched: 0,
                not_submitted: 0,
                peak_running: 0,
                signalled: 0,
                force_killed: 0,
                cancelled: false,
                state: SupervisorState::Submitting,
            },
            #[cfg(feature = "metrics")]
            metrics: stormbatch_core::metrics::BatchMetrics::new(),
        }
    }

    fn enter(&mut self, state: SupervisorState) {
        debug!(from = ?self.report.state, to = ?state, "Supervisor state change");
        self.report.state = state;
    }

    fn track(&mut self, handle: ProcessHandle) {
        debug!(job = %handle.description(), pid = handle.pid(), "Analysis process started");
        self.tracked.insert(handle.job_id(), handle);
        self.report.launched += 1;
        self.report.peak_running = self.report.peak_running.max(self.tracked.len());
        #[cfg(feature = "metrics")]
        self.metrics.job_launched();
    }

    fn consume(&mut self, event: Option<CompletionEvent>) -> Result<(), SupervisorError> {
        let Some(event) = event else {
            return Err(SupervisorError::CompletionQueueClosed {
                outstanding: self.tracked.len(),
            });
        };
        let was_running = self.tracked.remove(&event.job_id).is_some();
        if !was_running {
            warn!(job_id = event.job_id, "Completion for an untracked process");
        }
        self.record(event, was_running);
        Ok(())
    }

    fn record_launch_failure(&mut self, job: &Job, err: &LaunchError) {
        self.record(
            CompletionEvent {
                job_id: job.id,
                description: job.name().into_owned(),
                outcome: Outcome::LaunchFailed(err.to_string()),
            },
            false,
        );
    }

    fn record(&mut self, event: CompletionEvent, was_running: bool) {
        #[cfg(feature = "metrics")]
        self.metrics.job_completed(event.outcome.kind(), was_running);
        #[cfg(not(feature = "metrics"))]
        let _ = was_running;

        match &event.outcome {
            Outcome::Exited(0) => info!(job = %event.description, "Finished"),
            Outcome::Exited(code) => {
                warn!(job = %event.description, exit_code = code, "Finished with failure");
            }
            Outcome::Signalled(signal) => {
                warn!(job = %event.description, signal, "Terminated by signal");
            }
            Outcome::LaunchFailed(reason) => {
                error!(job = %event.description, %reason, "Failed to launch");
            }
            Outcome::WaitFailed(reason) => {
                error!(job = %event.description, %reason, "Lost track of analysis process");
            }
        }
        self.report.events.push(event);
    }
}
