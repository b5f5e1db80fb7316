use crate::config::SourceConfig;
use crate::domain::model::LcrDocument;
use crate::domain::ports::TableSource;
use crate::utils::error::{LcrError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Runs the external tariff downloader:
/// `program [args..] [--config FILE] [--test] [--verbose] OUTPUT`.
///
/// The process runs inside the run's working area so whatever it caches ends up in the
/// archived bundle.
#[derive(Debug, Clone)]
pub struct CommandSource {
    program: String,
    args: Vec<String>,
    config: Option<PathBuf>,
    test: bool,
    verbose: bool,
}

impl CommandSource {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            config: None,
            test: false,
            verbose: false,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Relative paths are resolved now, since the child runs in a different directory.
    pub fn with_config(mut self, config: impl AsRef<Path>) -> Result<Self> {
        let config = config.as_ref();
        self.config = Some(if config.is_absolute() {
            config.to_path_buf()
        } else {
            std::env::current_dir()?.join(config)
        });
        Ok(self)
    }

    pub fn test_mode(mut self, test: bool) -> Self {
        self.test = test;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn command_line(&self, output: &Path) -> Vec<String> {
        let mut line = self.args.clone();
        if let Some(config) = &self.config {
            line.push("--config".to_string());
            line.push(config.display().to_string());
        }
        if self.test {
            line.push("--test".to_string());
        }
        if self.verbose {
            line.push("--verbose".to_string());
        }
        line.push(output.display().to_string());
        line
    }
}

#[async_trait]
impl TableSource for CommandSource {
    async fn produce_candidate(&self, work_dir: &Path, output: &Path) -> Result<LcrDocument> {
        let args = self.command_line(output);
        tracing::debug!("Running {} {:?} in {}", self.program, args, work_dir.display());

        let result = tokio::process::Command::new(&self.program)
            .args(&args)
            .current_dir(work_dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| LcrError::adapter(format!("cannot start {}: {}", self.program, e)))?;

        let stderr = String::from_utf8_lossy(&result.stderr);
        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            tracing::debug!("{}: {}", self.program, line);
        }
        if !result.status.success() {
            return Err(LcrError::adapter(format!(
                "{} failed ({}): {}",
                self.program,
                result.status,
                stderr.lines().last().unwrap_or("no output")
            )));
        }

        read_candidate(output).await
    }
}

/// A candidate table produced out of band, copied into the run's working area.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TableSource for FileSource {
    async fn produce_candidate(&self, _work_dir: &Path, output: &Path) -> Result<LcrDocument> {
        let document = read_candidate(&self.path).await?;
        tokio::fs::write(output, document.as_bytes()).await?;
        Ok(document)
    }
}

async fn read_candidate(path: &Path) -> Result<LcrDocument> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| LcrError::adapter(format!("cannot read {}: {}", path.display(), e)))?;
    LcrDocument::from_bytes(bytes)
        .map_err(|e| LcrError::adapter(format!("{} is not a usable LCR table: {}", path.display(), e)))
}

/// The table source selected by the `[source]` configuration section.
#[derive(Debug, Clone)]
pub enum ConfiguredSource {
    Command(CommandSource),
    File(FileSource),
}

impl ConfiguredSource {
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        match config {
            SourceConfig::Command {
                program,
                args,
                config,
                test,
                verbose,
            } => {
                let mut source = CommandSource::new(program.clone())
                    .with_args(args.clone())
                    .test_mode(*test)
                    .verbose(*verbose);
                if let Some(config) = config {
                    source = source.with_config(config)?;
                }
                Ok(Self::Command(source))
            }
            SourceConfig::File { path } => Ok(Self::File(FileSource::new(path))),
        }
    }
}

#[async_trait]
impl TableSource for ConfiguredSource {
    async fn produce_candidate(&self, work_dir: &Path, output: &Path) -> Result<LcrDocument> {
        match self {
            Self::Command(source) => source.produce_candidate(work_dir, output).await,
            Self::File(source) => source.produce_candidate(work_dir, output).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TABLE: &str = "<Slcr4TablesDB><SlcrProvider_table/></Slcr4TablesDB>";

    #[test]
    fn test_command_line_order() {
        let source = CommandSource::new("teltarif-dl")
            .with_args(vec!["-q".to_string()])
            .with_config("/etc/lcr.yaml")
            .unwrap()
            .test_mode(true)
            .verbose(true);

        assert_eq!(
            source.command_line(Path::new("/tmp/run/candidate.xml")),
            vec![
                "-q",
                "--config",
                "/etc/lcr.yaml",
                "--test",
                "--verbose",
                "/tmp/run/candidate.xml"
            ]
        );
    }

    #[tokio::test]
    async fn test_file_source_copies_into_bundle() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("prepared.xml");
        std::fs::write(&input, TABLE).unwrap();
        let output = dir.path().join("candidate.xml");

        let document = FileSource::new(&input)
            .produce_candidate(dir.path(), &output)
            .await
            .unwrap();

        assert_eq!(document.as_str(), TABLE);
        assert_eq!(std::fs::read_to_string(&output).unwrap(), TABLE);
    }

    #[tokio::test]
    async fn test_file_source_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("prepared.xml");
        std::fs::write(&input, "<html>").unwrap();

        let err = FileSource::new(&input)
            .produce_candidate(dir.path(), &dir.path().join("candidate.xml"))
            .await
            .unwrap_err();
        assert!(matches!(err, LcrError::AdapterError { .. }));
    }

    #[tokio::test]
    async fn test_missing_command_is_adapter_error() {
        let dir = TempDir::new().unwrap();
        let err = CommandSource::new("/nonexistent/teltarif-dl")
            .produce_candidate(dir.path(), &dir.path().join("candidate.xml"))
            .await
            .unwrap_err();
        assert!(matches!(err, LcrError::AdapterError { .. }));
    }
}
