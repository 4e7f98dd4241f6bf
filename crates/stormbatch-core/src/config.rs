//! Configuration resolution for stormbatch.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config dir>/stormbatch/settings.json`)
//! 3. Project config (`.stormbatch/settings.json`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)
//!
//! Settings files are merged key by key, so a file that only sets
//! `batch.max_processes` leaves every other field at the value of the
//! lower layers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Complete stormbatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub cancellation: CancellationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What discovery does with a movie whose header cannot be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InspectFailurePolicy {
    /// Log the failure and leave that movie out of the batch.
    #[default]
    Skip,
    /// Stop discovery and fail the whole run.
    Abort,
}

/// Batch selection and concurrency settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum number of analysis processes running at once.
    pub max_processes: usize,
    /// Movies must have strictly more frames than this to be analysed.
    pub minimum_length: u64,
    /// Extension (without the dot) of the movies to pick up.
    pub input_extension: String,
    /// Appended to the movie stem to build the output file name.
    pub output_suffix: String,
    pub on_inspect_error: InspectFailurePolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_processes: 2,
            minimum_length: 100,
            input_extension: "dax".to_string(),
            output_suffix: "_mlist.bin".to_string(),
            on_inspect_error: InspectFailurePolicy::Skip,
        }
    }
}

/// How the external analysis program is invoked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Program used to run the entry point. `None` runs the entry point directly.
    pub interpreter: Option<String>,
    /// Analysis script or executable.
    pub entry_point: Option<PathBuf>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            interpreter: Some("python".to_string()),
            entry_point: None,
        }
    }
}

/// Cancellation behaviour.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CancellationConfig {
    /// Seconds after the interrupt before still-running children are
    /// force-killed. `None` leaves cancellation purely advisory.
    pub kill_after_secs: Option<u64>,
}

impl CancellationConfig {
    pub fn kill_after(&self) -> Option<Duration> {
        self.kill_after_secs.map(Duration::from_secs)
    }
}

/// Logging output settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Reject settings the runner cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.batch.max_processes == 0 {
            return Err(Error::Config(
                "batch.max_processes must be at least 1".to_string(),
            ));
        }
        if self.batch.input_extension.trim().is_empty() {
            return Err(Error::Config(
                "batch.input_extension must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load configuration with hierarchical resolution from the real
/// environment.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let global = global_config_path();
    resolve_config(global.as_deref(), project_dir, |key| std::env::var(key).ok())
}

/// Resolve configuration from an explicit global file, project directory and
/// environment lookup.
pub fn resolve_config<F>(global: Option<&Path>, project_dir: Option<&Path>, env: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut merged = serde_json::to_value(Config::default())?;

    if let Some(global_path) = global
        && global_path.exists()
    {
        debug!(path = %global_path.display(), "Loading global config");
        merge_json(&mut merged, load_config_file(global_path)?);
    }

    if let Some(dir) = project_dir {
        let project_path = project_config_path(dir);
        if project_path.exists() {
            debug!(path = %project_path.display(), "Loading project config");
            merge_json(&mut merged, load_config_file(&project_path)?);
        }
    }

    let mut config: Config = serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))?;
    apply_env_overrides(&mut config, env);
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("stormbatch").join("settings.json"))
}

/// Project config file path inside `dir`.
pub fn project_config_path(dir: &Path) -> PathBuf {
    dir.join(".stormbatch").join("settings.json")
}

fn load_config_file(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let value: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })?;
    if !value.is_object() {
        return Err(Error::Config(format!(
            "Config file {} must contain a JSON object",
            path.display()
        )));
    }
    Ok(value)
}

/// Recursively overlay `overlay` onto `base`. Objects merge per key, any
/// other value replaces what was there.
fn merge_json(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn apply_env_overrides<F>(config: &mut Config, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = env("STORMBATCH_MAX_PROCESSES") {
        match val.parse() {
            Ok(n) => config.batch.max_processes = n,
            Err(_) => warn!(value = %val, "Ignoring invalid STORMBATCH_MAX_PROCESSES"),
        }
    }
    if let Some(val) = env("STORMBATCH_MINIMUM_LENGTH") {
        match val.parse() {
            Ok(n) => config.batch.minimum_length = n,
            Err(_) => warn!(value = %val, "Ignoring invalid STORMBATCH_MINIMUM_LENGTH"),
        }
    }
    if let Some(val) = env("STORMBATCH_INTERPRETER") {
        config.analysis.interpreter = if val.is_empty() { None } else { Some(val) };
    }
    if let Some(val) = env("STORMBATCH_KILL_AFTER_SECS") {
        match val.parse() {
            Ok(n) => config.cancellation.kill_after_secs = Some(n),
            Err(_) => warn!(value = %val, "Ignoring invalid STORMBATCH_KILL_AFTER_SECS"),
        }
    }
    if let Some(val) = env("STORMBATCH_LOG_LEVEL") {
        config.logging.level = val;
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_project_config(dir: &Path, body: &str) {
        let path = project_config_path(dir);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn defaults_match_original_batch_settings() {
        let config = Config::default();
        assert_eq!(config.batch.max_processes, 2);
        assert_eq!(config.batch.minimum_length, 100);
        assert_eq!(config.batch.input_extension, "dax");
        assert_eq!(config.batch.output_suffix, "_mlist.bin");
        assert_eq!(config.batch.on_inspect_error, InspectFailurePolicy::Skip);
        assert_eq!(config.analysis.interpreter.as_deref(), Some("python"));
        assert!(config.cancellation.kill_after().is_none());
    }

    #[test]
    fn no_files_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = resolve_config(None, Some(dir.path()), no_env).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn project_file_overrides_only_named_keys() {
        let dir = tempfile::tempdir().unwrap();
        write_project_config(
            dir.path(),
            r#"{"batch": {"max_processes": 6, "on_inspect_error": "abort"}}"#,
        );

        let config = resolve_config(None, Some(dir.path()), no_env).unwrap();
        assert_eq!(config.batch.max_processes, 6);
        assert_eq!(config.batch.on_inspect_error, InspectFailurePolicy::Abort);
        assert_eq!(config.batch.minimum_length, 100);
        assert_eq!(config.batch.output_suffix, "_mlist.bin");
    }

    #[test]
    fn project_file_wins_over_global_file() {
        let global_dir = tempfile::tempdir().unwrap();
        let global_path = global_dir.path().join("settings.json");
        std::fs::write(
            &global_path,
            r#"{"batch": {"max_processes": 8, "minimum_length": 10}, "logging": {"json": true}}"#,
        )
        .unwrap();

        let project = tempfile::tempdir().unwrap();
        write_project_config(project.path(), r#"{"batch": {"max_processes": 3}}"#);

        let config = resolve_config(Some(&global_path), Some(project.path()), no_env).unwrap();
        assert_eq!(config.batch.max_processes, 3);
        assert_eq!(config.batch.minimum_length, 10);
        assert!(config.logging.json);
    }

    #[test]
    fn null_interpreter_runs_entry_point_directly() {
        let dir = tempfile::tempdir().unwrap();
        write_project_config(dir.path(), r#"{"analysis": {"interpreter": null}}"#);

        let config = resolve_config(None, Some(dir.path()), no_env).unwrap();
        assert!(config.analysis.interpreter.is_none());
    }

    #[test]
    fn env_overrides_files() {
        let dir = tempfile::tempdir().unwrap();
        write_project_config(dir.path(), r#"{"batch": {"max_processes": 3}}"#);

        let env = |key: &str| match key {
            "STORMBATCH_MAX_PROCESSES" => Some("5".to_string()),
            "STORMBATCH_KILL_AFTER_SECS" => Some("30".to_string()),
            "STORMBATCH_INTERPRETER" => Some(String::new()),
            _ => None,
        };
        let config = resolve_config(None, Some(dir.path()), env).unwrap();
        assert_eq!(config.batch.max_processes, 5);
        assert_eq!(config.cancellation.kill_after(), Some(Duration::from_secs(30)));
        assert!(config.analysis.interpreter.is_none());
    }

    #[test]
    fn unparsable_env_value_is_ignored() {
        let env = |key: &str| (key == "STORMBATCH_MAX_PROCESSES").then(|| "many".to_string());
        let config = resolve_config(None, None, env).unwrap();
        assert_eq!(config.batch.max_processes, 2);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        write_project_config(dir.path(), "{ not json");

        let err = resolve_config(None, Some(dir.path()), no_env).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn validate_rejects_zero_processes() {
        let mut config = Config::default();
        config.batch.max_processes = 0;
        assert!(config.validate().is_err());

        config.batch.max_processes = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_extension() {
        let mut config = Config::default();
        config.batch.input_extension = " ".to_string();
        assert!(config.validate().is_err());
    }
}
