use crate::domain::model::{LcrDocument, Snapshot};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Table operations available on an authenticated PBX session.
#[async_trait]
pub trait LcrTableService: Send + Sync {
    async fn download(&self) -> Result<LcrDocument>;

    /// Replaces the whole active table set; entries missing from `document` are removed.
    async fn upload(&self, filename: &str, document: &LcrDocument) -> Result<()>;

    async fn reset_to_defaults(&self) -> Result<()>;

    async fn erase(&self) -> Result<()>;
}

/// Produces authenticated sessions. Each call starts from fresh credentials.
#[async_trait]
pub trait PbxConnector: Send + Sync {
    type Session: LcrTableService;

    async fn authenticate(&self) -> Result<Self::Session>;
}

/// Source of candidate tables (normally the tariff downloader).
#[async_trait]
pub trait TableSource: Send + Sync {
    /// Writes the candidate document to `output` and returns it. `work_dir` is the run's
    /// working area; the source may leave cache files there.
    async fn produce_candidate(&self, work_dir: &Path, output: &Path) -> Result<LcrDocument>;
}

#[async_trait]
pub trait StructuralDiffer: Send + Sync {
    /// Zero means the tables are equivalent for upload purposes.
    async fn count_differences(&self, current: &Snapshot, candidate: &Snapshot) -> Result<usize>;
}
