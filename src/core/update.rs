use crate::core::bundle::RunBundle;
use crate::domain::model::{RunId, Snapshot, UpdateOutcome};
use crate::domain::ports::{LcrTableService, PbxConnector, StructuralDiffer, TableSource};
use crate::utils::error::{LcrError, Result};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    FetchCurrent,
    FetchCandidate,
    Decide,
    NoOp,
    Upload,
    Archive,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::FetchCurrent => "fetch-current",
            Phase::FetchCandidate => "fetch-candidate",
            Phase::Decide => "decide",
            Phase::NoOp => "no-op",
            Phase::Upload => "upload",
            Phase::Archive => "archive",
        };
        f.write_str(name)
    }
}

/// One change-detection run: snapshot the PBX, produce a candidate, upload only when the
/// two differ, then archive or clean up.
///
/// Failures abort the run without retrying and leave the working area on disk; only the
/// no-change path deletes it.
pub struct UpdateEngine<C: PbxConnector, S: TableSource, D: StructuralDiffer> {
    connector: C,
    source: S,
    differ: D,
    work_root: PathBuf,
    archive_dir: PathBuf,
}

impl<C: PbxConnector, S: TableSource, D: StructuralDiffer> UpdateEngine<C, S, D> {
    pub fn new(
        connector: C,
        source: S,
        differ: D,
        work_root: impl Into<PathBuf>,
        archive_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            connector,
            source,
            differ,
            work_root: work_root.into(),
            archive_dir: archive_dir.into(),
        }
    }

    pub async fn run(&self) -> Result<UpdateOutcome> {
        self.run_with_id(RunId::now()).await
    }

    pub async fn run_with_id(&self, run_id: RunId) -> Result<UpdateOutcome> {
        let bundle = RunBundle::create(&self.work_root, run_id.clone())
            .map_err(|e| abort(Phase::Init, None, e))?;
        tracing::info!("🚀 LCR update run {} in {}", run_id, bundle.dir().display());

        let session = self
            .connector
            .authenticate()
            .await
            .map_err(|e| abort(Phase::FetchCurrent, Some(&bundle), e))?;
        let current = async {
            let document = session.download().await?;
            let path = bundle.current_path();
            tokio::fs::write(&path, document.as_bytes()).await?;
            Ok::<_, LcrError>(Snapshot { path, document })
        }
        .await
        .map_err(|e| abort(Phase::FetchCurrent, Some(&bundle), e))?;

        let candidate_path = bundle.candidate_path();
        let candidate = self
            .source
            .produce_candidate(bundle.dir(), &candidate_path)
            .await
            .map(|document| Snapshot {
                path: candidate_path,
                document,
            })
            .map_err(|e| abort(Phase::FetchCandidate, Some(&bundle), e))?;
        tracing::info!("📋 Candidate tables: {:?}", candidate.document.table_counts());

        let differences = self
            .differ
            .count_differences(&current, &candidate)
            .await
            .map_err(|e| abort(Phase::Decide, Some(&bundle), e))?;

        if differences == 0 {
            tracing::info!("✅ PBX tables are up to date, nothing to upload");
            bundle
                .discard()
                .map_err(|e| abort(Phase::NoOp, None, e))?;
            return Ok(UpdateOutcome::NoChange { run_id });
        }

        tracing::info!("🔄 {} structural difference(s), uploading candidate", differences);
        let filename = format!("lcr-{}.xml", run_id);
        session
            .upload(&filename, &candidate.document)
            .await
            .map_err(|e| abort(Phase::Upload, Some(&bundle), e))?;

        let archive = bundle
            .archive_into(&self.archive_dir)
            .map_err(|e| abort(Phase::Archive, None, e))?;
        tracing::info!("📦 Run archived to {}", archive.display());

        Ok(UpdateOutcome::Updated {
            run_id,
            differences,
            archive,
        })
    }
}

fn abort(phase: Phase, bundle: Option<&RunBundle>, error: LcrError) -> LcrError {
    match bundle {
        Some(bundle) => tracing::error!(
            "❌ Run {} failed during {}: {} (artifacts kept in {})",
            bundle.run_id(),
            phase,
            error,
            bundle.dir().display()
        ),
        None => tracing::error!("❌ Run failed during {}: {}", phase, error),
    }
    error
}
