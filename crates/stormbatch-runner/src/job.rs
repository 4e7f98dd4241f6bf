//! A single unit of batch work.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

/// One movie mapped to one output file, analysed with a shared
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Position in discovery order.
    pub id: usize,
    /// Movie to analyse.
    pub input: PathBuf,
    /// Localisation list the analysis writes.
    pub output: PathBuf,
    /// Analysis parameters file passed through to the analysis program.
    pub config: PathBuf,
}

impl Job {
    /// Build a job whose output is `<output_dir>/<input stem><suffix>`.
    pub fn new(id: usize, input: PathBuf, output_dir: &Path, suffix: &str, config: PathBuf) -> Self {
        let output = output_path(&input, output_dir, suffix);
        Self {
            id,
            input,
            output,
            config,
        }
    }

    /// File name of the input movie, used to describe the job in logs and
    /// completion events.
    pub fn name(&self) -> Cow<'_, str> {
        self.input.file_name().map_or_else(
            || self.input.to_string_lossy(),
            |name| name.to_string_lossy(),
        )
    }
}

/// Output file for `input`: its stem plus `suffix`, inside `output_dir`.
pub fn output_path(input: &Path, output_dir: &Path, suffix: &str) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    output_dir.join(format!("{stem}{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_replaces_extension_with_suffix() {
        let job = Job::new(
            0,
            PathBuf::from("/data/movies/cell_01.dax"),
            Path::new("/data/out"),
            "_mlist.bin",
            PathBuf::from("/data/params.xml"),
        );
        assert_eq!(job.output, PathBuf::from("/data/out/cell_01_mlist.bin"));
        assert_eq!(job.name(), "cell_01.dax");
    }

    #[test]
    fn stem_keeps_inner_dots() {
        let out = output_path(Path::new("run.2.dax"), Path::new("out"), "_mlist.bin");
        assert_eq!(out, PathBuf::from("out/run.2_mlist.bin"));
    }
}
