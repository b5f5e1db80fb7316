pub mod bundle;
pub mod cache_diff;
pub mod update;

pub use crate::domain::model::{LcrDocument, RunId, Snapshot, UpdateOutcome};
pub use crate::domain::ports::{LcrTableService, PbxConnector, StructuralDiffer, TableSource};
pub use crate::utils::error::Result;
