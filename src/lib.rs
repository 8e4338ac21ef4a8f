// cargo watch -x 'fmt' -x 'run'  // 'run -- all --config config/lab.json'

pub mod azure;
pub mod config;
pub mod error;
pub mod models;
pub mod output;
pub mod processing;
pub mod stages;

pub use config::LabConfig;
pub use error::{ConvergeError, Result};
pub use stages::{parse_stages, Pipeline, StageReport};
