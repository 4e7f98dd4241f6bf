//! Completion collection.
//!
//! Each launched process gets one waiter task. The waiter owns the
//! [`Child`], waits for it to exit, publishes the exit on the handle's
//! liveness channel and posts exactly one [`CompletionEvent`] on the shared
//! completion queue. Waiters never touch the supervisor's tracking set.
//!
//! Interrupts and kills are requested through the handle and carried out by
//! the waiter. Only the waiter reaps the child, so a signal is never sent to
//! a pid that has already been released to the OS.

use std::fmt;
use std::process::ExitStatus;

use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::signal;

/// Terminal outcome of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The process exited with this code.
    Exited(i32),
    /// The process was terminated by this signal (Unix).
    Signalled(i32),
    /// The process could not be started.
    LaunchFailed(String),
    /// Waiting for the process failed; its exit status is unknown.
    WaitFailed(String),
}

impl Outcome {
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exited(code) => Some(*code),
            _ => None,
        }
    }

    /// Short label for the outcome class.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Exited(0) => "success",
            Self::Exited(_) => "failure",
            Self::Signalled(_) => "signalled",
            Self::LaunchFailed(_) => "launch_failed",
            Self::WaitFailed(_) => "wait_failed",
        }
    }

    fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signalled(signal);
            }
        }
        Self::WaitFailed(format!("unrecognised exit status: {status}"))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit code {code}"),
            Self::Signalled(signal) => write!(f, "terminated by signal {signal}"),
            Self::LaunchFailed(reason) => write!(f, "failed to launch: {reason}"),
            Self::WaitFailed(reason) => write!(f, "wait failed: {reason}"),
        }
    }
}

/// Notification that one job reached its terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEvent {
    pub job_id: usize,
    pub description: String,
    pub outcome: Outcome,
}

impl CompletionEvent {
    pub const fn exit_code(&self) -> Option<i32> {
        self.outcome.exit_code()
    }
}

/// Sending half of the completion queue.
pub type CompletionSender = mpsc::UnboundedSender<CompletionEvent>;

/// Liveness of a launched process as seen by its waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Running,
    /// Exited; `None` when there is no exit code (signal or wait failure).
    Exited(Option<i32>),
}

/// Supervisor-side handle to a launched process.
#[derive(Debug)]
pub struct ProcessHandle {
    job_id: usize,
    description: String,
    pid: Option<u32>,
    liveness: watch::Receiver<Liveness>,
    interrupt: CancellationToken,
    kill: CancellationToken,
}

impl ProcessHandle {
    pub const fn job_id(&self) -> usize {
        self.job_id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// OS process id, `None` if the process had already been reaped when
    /// the handle was created.
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn liveness(&self) -> Liveness {
        *self.liveness.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.liveness() == Liveness::Running
    }

    /// Ask the waiter to send the platform interrupt to the process.
    ///
    /// Returns `false` if an interrupt was already requested.
    pub fn interrupt(&self) -> bool {
        if self.interrupt.is_cancelled() {
            return false;
        }
        self.interrupt.cancel();
        true
    }

    /// Make the waiter kill the process outright.
    pub fn force_kill(&self) {
        self.kill.cancel();
    }
}

/// Start the waiter for `child` and return the handle the supervisor tracks.
pub fn spawn_waiter(
    job_id: usize,
    description: String,
    child: Child,
    completions: CompletionSender,
) -> ProcessHandle {
    let pid = child.id();
    let (liveness_tx, liveness_rx) = watch::channel(Liveness::Running);
    let interrupt = CancellationToken::new();
    let kill = CancellationToken::new();

    let waiter_interrupt = interrupt.clone();
    let waiter_kill = kill.clone();
    let waiter_description = description.clone();
    tokio::spawn(async move {
        let outcome =
            wait_for_exit(child, &waiter_description, &waiter_interrupt, &waiter_kill).await;
        debug!(job = %waiter_description, pid, %outcome, "Analysis process exited");

        liveness_tx.send_replace(Liveness::Exited(outcome.exit_code()));

        let event = CompletionEvent {
            job_id,
            description: waiter_description,
            outcome,
        };
        if completions.send(event).is_err() {
            warn!(job_id, "Completion queue closed, dropping completion event");
        }
    });

    ProcessHandle {
        job_id,
        description,
        pid,
        liveness: liveness_rx,
        interrupt,
        kill,
    }
}

async fn wait_for_exit(
    mut child: Child,
    description: &str,
    interrupt: &CancellationToken,
    kill: &CancellationToken,
) -> Outcome {
    let mut interrupted = false;
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            () = interrupt.cancelled(), if !interrupted => {
                interrupted = true;
                send_interrupt(&child, description);
            }
            () = kill.cancelled() => {
                warn!(job = %description, pid = child.id(), "Killing analysis process that ignored the interrupt");
                if let Err(e) = child.start_kill() {
                    warn!(job = %description, error = %e, "Failed to kill analysis process");
                }
                break child.wait().await;
            }
        }
    };

    match status {
        Ok(status) => Outcome::from_status(status),
        Err(e) => Outcome::WaitFailed(e.to_string()),
    }
}

/// `child.id()` is `None` once tokio has reaped the process.
fn send_interrupt(child: &Child, description: &str) {
    let Some(pid) = child.id() else {
        debug!(job = %description, "Process already reaped, not interrupting");
        return;
    };
    match signal::interrupt(pid) {
        Ok(true) => debug!(job = %description, pid, "Interrupt sent"),
        Ok(false) => debug!(job = %description, pid, "Process already gone"),
        Err(e) => warn!(job = %description, pid, error = %e, "Failed to send interrupt"),
    }
}
