//! stormbatch runner library
//!
//! Runs one external analysis process per movie in a directory while
//! keeping at most a fixed number of them alive at once:
//! - [`discovery`]: find movies long enough to analyse and turn them into [`Job`]s
//! - [`launcher`]: start the analysis program for a job
//! - [`collector`]: one waiter task per process posting its [`CompletionEvent`]
//! - [`supervisor`]: the submit/drain loop enforcing the concurrency cap
//! - [`cancel`] and [`signal`]: interrupt delivery to running children

pub mod cancel;
pub mod collector;
pub mod discovery;
pub mod job;
pub mod launcher;
pub mod signal;
pub mod supervisor;

pub use collector::{CompletionEvent, Liveness, Outcome, ProcessHandle};
pub use discovery::{DiscoveryConfig, DiscoveryError, discover};
pub use job::Job;
pub use launcher::{CommandLauncher, LaunchError, Launcher};
pub use supervisor::{RunReport, Supervisor, SupervisorError, SupervisorState};
