use crate::utils::error::{LcrError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_path, validate_range, validate_url, Validate,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LcrConfig {
    pub pbx: PbxConfig,
    #[serde(default)]
    pub update: UpdateConfig,
    pub source: Option<SourceConfig>,
    #[serde(default)]
    pub differ: DifferConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct PbxConfig {
    /// Host name or IP of the PBX, or a full base URL such as `https://pbx.local:8443`.
    pub address: String,
    pub username: String,
    pub password: String,
    /// The PBX ships a self-signed certificate, so verification is off unless asked for.
    #[serde(default)]
    pub verify_tls: bool,
    pub timeout_seconds: Option<u64>,
}

// Keeps the password out of logs and `--verbose` dumps.
impl fmt::Debug for PbxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PbxConfig")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .field("verify_tls", &self.verify_tls)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

impl PbxConfig {
    pub fn base_url(&self) -> String {
        let address = self.address.trim().trim_end_matches('/');
        if address.contains("://") {
            address.to_string()
        } else {
            format!("https://{}", address)
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
    #[serde(default = "default_archive_dir")]
    pub archive_dir: String,
}

fn default_work_dir() -> String {
    "./cache".to_string()
}

fn default_archive_dir() -> String {
    "./archive".to_string()
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            archive_dir: default_archive_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// External downloader invoked as `program [args..] [--config C] [--test] [--verbose] OUTPUT`.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        config: Option<String>,
        #[serde(default)]
        test: bool,
        #[serde(default)]
        verbose: bool,
    },
    /// A table produced out of band.
    File { path: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DifferConfig {
    #[default]
    Canonical,
    /// External tool invoked as `program [args..] CURRENT CANDIDATE`.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl LcrConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| LcrError::ConfigError {
            message: format!("cannot read {}: {}", path.as_ref().display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| LcrError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` with the environment value; unknown variables are left as-is.
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| LcrError::ConfigError {
            message: format!("bad substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn work_dir(&self) -> PathBuf {
        PathBuf::from(&self.update.work_dir)
    }

    pub fn archive_dir(&self) -> PathBuf {
        PathBuf::from(&self.update.archive_dir)
    }
}

impl Validate for LcrConfig {
    fn validate(&self) -> Result<()> {
        validate_url("pbx.address", &self.pbx.base_url())?;
        validate_non_empty_string("pbx.username", &self.pbx.username)?;
        if self.pbx.password.starts_with("${") {
            return Err(LcrError::MissingConfigError {
                field: format!("pbx.password (environment variable {} is not set)", self.pbx.password),
            });
        }
        if let Some(timeout) = self.pbx.timeout_seconds {
            validate_range("pbx.timeout_seconds", timeout, 1, 600)?;
        }

        validate_path("update.work_dir", &self.update.work_dir)?;
        validate_path("update.archive_dir", &self.update.archive_dir)?;

        match &self.source {
            Some(SourceConfig::Command { program, .. }) => {
                validate_non_empty_string("source.program", program)?
            }
            Some(SourceConfig::File { path }) => validate_path("source.path", path)?,
            None => {}
        }

        if let DifferConfig::Command { program, .. } = &self.differ {
            validate_non_empty_string("differ.program", program)?;
        }

        Ok(())
    }
}
