//! `stormbatch` Core Library
//!
//! Shared functionality for the batch runner:
//! - Configuration resolution and hierarchy
//! - Movie header inspection (`.dax` + `.inf`)
//! - Tracing setup and the optional OpenTelemetry pipeline
//! - Common error types

pub mod config;
pub mod error;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod movie;
pub mod tracing_init;

pub use config::{Config, InspectFailurePolicy};
pub use error::{Error, Result};
pub use movie::{DaxInspector, InspectError, MovieInfo, MovieInspector};
