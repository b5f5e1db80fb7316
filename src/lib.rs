pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::{ConfiguredDiffer, ConfiguredSource, PbxClient, PbxSession};
pub use config::LcrConfig;
pub use core::update::UpdateEngine;
pub use domain::model::{LcrDocument, RunId, UpdateOutcome};
pub use utils::error::{LcrError, Result};
