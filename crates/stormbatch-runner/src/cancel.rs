//! Cancellation handling.
//!
//! Interrupts are advisory: every tracked process that is still running is
//! asked to stop, and the supervisor keeps draining completions afterwards.
//! A child that ignores the interrupt keeps the run waiting unless a
//! force-kill deadline is configured.

use tracing::{debug, warn};

use crate::collector::ProcessHandle;

/// Have the waiter of every handle still marked running send the platform
/// interrupt.
///
/// Returns how many processes were asked to stop. The waiter skips a process
/// that exits in the meantime.
pub fn interrupt_running<'a, I>(handles: I) -> usize
where
    I: IntoIterator<Item = &'a ProcessHandle>,
{
    let mut signalled = 0;
    for handle in handles {
        if handle.is_running() && handle.interrupt() {
            debug!(job = %handle.description(), pid = handle.pid(), "Interrupt requested");
            signalled += 1;
        }
    }
    signalled
}

/// Have the waiters of all still-running handles kill their processes.
///
/// Returns how many kill requests were issued.
pub fn force_kill_running<'a, I>(handles: I) -> usize
where
    I: IntoIterator<Item = &'a ProcessHandle>,
{
    let mut killed = 0;
    for handle in handles {
        if handle.is_running() {
            warn!(job = %handle.description(), pid = handle.pid(), "Force-killing analysis process");
            handle.force_kill();
            killed += 1;
        }
    }
    killed
}

#[cfg(all(test, unix))]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use tokio::process::Command;
    use tokio::sync::mpsc;

    use super::*;
    use crate::collector::{Outcome, spawn_waiter};

    fn sh(script: &str) -> tokio::process::Child {
        Command::new("sh").arg("-c").arg(script).spawn().unwrap()
    }

    fn sleep(secs: &str) -> tokio::process::Child {
        Command::new("sleep").arg(secs).spawn().unwrap()
    }

    #[tokio::test]
    async fn interrupts_only_running_processes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let done = spawn_waiter(0, "done".to_string(), sh("exit 0"), tx.clone());
        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.job_id, 0);

        let running = spawn_waiter(1, "running".to_string(), sleep("30"), tx);

        let signalled = interrupt_running([&done, &running]);
        assert_eq!(signalled, 1);
        // A second request for the same process is not counted again.
        assert_eq!(interrupt_running([&running]), 0);

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("interrupted process should exit")
            .unwrap();
        assert_eq!(event.job_id, 1);
        assert_eq!(event.outcome, Outcome::Signalled(libc::SIGINT));
    }

    #[tokio::test]
    async fn force_kill_skips_exited_processes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let done = spawn_waiter(0, "done".to_string(), sh("exit 0"), tx.clone());
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();

        let stuck = spawn_waiter(1, "stuck".to_string(), sh("trap '' INT; exec sleep 30"), tx);
        assert_eq!(force_kill_running([&done, &stuck]), 1);

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.outcome, Outcome::Signalled(libc::SIGKILL));
    }
}
