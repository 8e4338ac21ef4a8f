//! Everything the pipeline writes out.
//!
//! - [`snapshot`] - per-stage JSON snapshots
//! - [`device_config`] - appliance configuration text
//! - [`terminal`] - run summary with colors

pub mod device_config;
mod snapshot;
mod terminal;

pub use snapshot::{SnapshotStore, StageOutput, SNAPSHOT_VERSION};
pub use terminal::{format_field, print_summary, render_checks, render_summary};
