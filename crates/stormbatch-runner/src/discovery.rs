//! Job discovery.
//!
//! Lists the movies directly inside the input directory, asks the inspector
//! for each movie's length and keeps the ones longer than the minimum. Jobs
//! come out in directory enumeration order, which the filesystem does not
//! promise to be sorted.

use std::ffi::OsStr;
use std::path::PathBuf;

use stormbatch_core::{Config, InspectError, InspectFailurePolicy, MovieInspector};
use tracing::{debug, info, warn};

use crate::job::Job;

/// Where to look for movies and how to turn them into jobs.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Analysis parameters file handed to every job.
    pub analysis_config: PathBuf,
    /// Extension (without the dot) movies must have.
    pub extension: String,
    pub output_suffix: String,
    /// Movies must have strictly more frames than this.
    pub minimum_length: u64,
    pub on_inspect_error: InspectFailurePolicy,
}

impl DiscoveryConfig {
    pub fn from_config(
        config: &Config,
        input_dir: PathBuf,
        output_dir: PathBuf,
        analysis_config: PathBuf,
    ) -> Self {
        Self {
            input_dir,
            output_dir,
            analysis_config,
            extension: config.batch.input_extension.clone(),
            output_suffix: config.batch.output_suffix.clone(),
            minimum_length: config.batch.minimum_length,
            on_inspect_error: config.batch.on_inspect_error,
        }
    }
}

/// Errors that stop discovery altogether.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Cannot read input directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot inspect {path}: {source}")]
    Inspection {
        path: PathBuf,
        #[source]
        source: InspectError,
    },
}

/// Enumerate the jobs for one batch.
pub fn discover<I>(config: &DiscoveryConfig, inspector: &I) -> Result<Vec<Job>, DiscoveryError>
where
    I: MovieInspector + ?Sized,
{
    let entries =
        std::fs::read_dir(&config.input_dir).map_err(|e| DiscoveryError::ReadDir {
            path: config.input_dir.clone(),
            source: e,
        })?;

    let extension = OsStr::new(&config.extension);
    let mut jobs = Vec::new();

    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                warn!(dir = %config.input_dir.display(), error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };
        if path.extension() != Some(extension) || !path.is_file() {
            continue;
        }

        info!(movie = %path.display(), "Found");

        let info = match inspector.inspect(&path) {
            Ok(info) => info,
            Err(e) => match config.on_inspect_error {
                InspectFailurePolicy::Skip => {
                    warn!(movie = %path.display(), error = %e, "Skipping movie with unreadable header");
                    continue;
                }
                InspectFailurePolicy::Abort => {
                    return Err(DiscoveryError::Inspection { path, source: e });
                }
            },
        };

        if info.frames <= config.minimum_length {
            debug!(
                movie = %path.display(),
                frames = info.frames,
                minimum = config.minimum_length,
                "Movie too short, skipping"
            );
            continue;
        }

        let job = Job::new(
            jobs.len(),
            path,
            &config.output_dir,
            &config.output_suffix,
            config.analysis_config.clone(),
        );
        info!(output = %job.output.display(), "  ->");
        jobs.push(job);
    }

    Ok(jobs)
}
