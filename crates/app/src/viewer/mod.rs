//! Live camera viewer that offloads frames to a detection service and serves
//! the annotated result over HTTP.
//!
//! The module is split into focused submodules:
//! - `config`: CLI configuration parsing.
//! - `pipeline`: Capture forwarding, the render tick and shutdown.
//! - `encoding`: JPEG encoding for the preview.
//! - `server`: Actix Web preview endpoints.
//! - `watchdog`: Stall reporting for capture, render and detection.
//! - `telemetry`: Tracing subscriber and Prometheus recorder setup.
//! - `data`: Shared structs passed between stages.

/// Re-export viewer settings so callers can configure runs without reaching
/// into submodules.
pub use config::{ViewerCliArgs, ViewerConfig};
/// Launch the viewer with a ready-made configuration.
pub use pipeline::run;

mod config;
mod data;
mod encoding;
mod pipeline;
mod server;
mod telemetry;
mod watchdog;
