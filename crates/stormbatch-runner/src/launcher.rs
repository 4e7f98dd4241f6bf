//! Analysis process launcher.
//!
//! Every job runs as
//! `[interpreter] <entry point> --movie <input> --bin <output> --xml <config>`
//! with the runner's environment, stdout and stderr.

use std::ffi::{OsStr, OsString};
use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::debug;

use crate::job::Job;

#[cfg(windows)]
const CREATION_FLAGS: u32 = windows_sys::Win32::System::Threading::CREATE_NEW_PROCESS_GROUP;

/// Starts the external process for a job without waiting for it.
pub trait Launcher: Send + Sync {
    fn spawn(&self, job: &Job) -> Result<Child, LaunchError>;
}

/// Launches the analysis program through an optional interpreter.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    interpreter: Option<OsString>,
    entry_point: PathBuf,
}

impl CommandLauncher {
    /// Run `entry_point` directly.
    pub fn new(entry_point: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: None,
            entry_point: entry_point.into(),
        }
    }

    /// Run the entry point through `interpreter` (e.g. `python`).
    #[must_use]
    pub fn with_interpreter<S: Into<OsString>>(mut self, interpreter: Option<S>) -> Self {
        self.interpreter = interpreter.map(Into::into);
        self
    }

    /// The command that would be run for `job`.
    pub fn command(&self, job: &Job) -> Command {
        let mut cmd = match &self.interpreter {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(&self.entry_point);
                cmd
            }
            None => Command::new(&self.entry_point),
        };
        cmd.arg("--movie")
            .arg(&job.input)
            .arg("--bin")
            .arg(&job.output)
            .arg("--xml")
            .arg(&job.config)
            .stdin(Stdio::null());
        // Own process group, so the child can be sent CTRL_BREAK_EVENT alone.
        #[cfg(windows)]
        cmd.creation_flags(CREATION_FLAGS);
        cmd
    }

    fn program(&self) -> &OsStr {
        self.interpreter
            .as_deref()
            .unwrap_or_else(|| self.entry_point.as_os_str())
    }
}

impl Launcher for CommandLauncher {
    fn spawn(&self, job: &Job) -> Result<Child, LaunchError> {
        debug!(
            job = %job.name(),
            program = %self.program().to_string_lossy(),
            entry_point = %self.entry_point.display(),
            "Spawning analysis process"
        );
        self.command(job)
            .spawn()
            .map_err(|e| LaunchError::from_io(self.program(), e))
    }
}

/// Errors from starting an analysis process.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Analysis program not found: {program}")]
    NotFound { program: String },

    #[error("Permission denied starting {program}")]
    PermissionDenied { program: String },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl LaunchError {
    pub fn from_io(program: &OsStr, err: io::Error) -> Self {
        let program = program.to_string_lossy().into_owned();
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound { program },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { program },
            _ => Self::Spawn {
                program,
                source: err,
            },
        }
    }

    /// Whether the host cannot start processes at all, as opposed to this
    /// one job being unlaunchable.
    pub fn is_resource_exhaustion(&self) -> bool {
        let Self::Spawn { source, .. } = self else {
            return false;
        };
        if source.kind() == io::ErrorKind::OutOfMemory {
            return true;
        }
        #[cfg(unix)]
        if let Some(code) = source.raw_os_error() {
            return matches!(code, libc::EAGAIN | libc::ENOMEM | libc::EMFILE | libc::ENFILE);
        }
        false
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::path::Path;

    use super::*;

    fn job() -> Job {
        Job::new(
            3,
            PathBuf::from("/movies/a.dax"),
            Path::new("/out"),
            "_mlist.bin",
            PathBuf::from("/params.xml"),
        )
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn interpreter_precedes_entry_point() {
        let launcher = CommandLauncher::new("/opt/analysis.py").with_interpreter(Some("python"));
        let cmd = launcher.command(&job());

        assert_eq!(cmd.as_std().get_program(), "python");
        assert_eq!(
            args(&cmd),
            vec![
                "/opt/analysis.py",
                "--movie",
                "/movies/a.dax",
                "--bin",
                "/out/a_mlist.bin",
                "--xml",
                "/params.xml",
            ]
        );
    }

    #[test]
    fn entry_point_runs_directly_without_interpreter() {
        let launcher = CommandLauncher::new("/opt/analyse").with_interpreter(None::<String>);
        let cmd = launcher.command(&job());

        assert_eq!(cmd.as_std().get_program(), "/opt/analyse");
        assert_eq!(args(&cmd)[0], "--movie");
    }

    #[tokio::test]
    async fn missing_program_is_not_found() {
        let launcher = CommandLauncher::new("/nonexistent/stormbatch-analysis");
        let err = launcher.spawn(&job()).unwrap_err();

        assert!(matches!(err, LaunchError::NotFound { .. }));
        assert!(!err.is_resource_exhaustion());
    }

    #[test]
    fn classifies_resource_exhaustion() {
        let oom = LaunchError::from_io(
            OsStr::new("python"),
            io::Error::from(io::ErrorKind::OutOfMemory),
        );
        assert!(oom.is_resource_exhaustion());

        let other = LaunchError::from_io(
            OsStr::new("python"),
            io::Error::from(io::ErrorKind::InvalidInput),
        );
        assert!(!other.is_resource_exhaustion());
    }

    #[cfg(unix)]
    #[test]
    fn classifies_process_table_exhaustion() {
        let err = LaunchError::from_io(
            OsStr::new("python"),
            io::Error::from_raw_os_error(libc::EAGAIN),
        );
        assert!(err.is_resource_exhaustion());
    }

    #[cfg(windows)]
    #[test]
    fn children_get_their_own_process_group() {
        use windows_sys::Win32::System::Threading::CREATE_NEW_PROCESS_GROUP;
        assert_ne!(CREATION_FLAGS & CREATE_NEW_PROCESS_GROUP, 0);
    }
}
