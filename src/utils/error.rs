use thiserror::Error;

#[derive(Error, Debug)]
pub enum LcrError {
    #[error("Authentication failed: {message}")]
    AuthError { message: String },

    #[error("Transport error: {0}")]
    TransportError(#[from] reqwest::Error),

    #[error("Protocol error: {message}")]
    ProtocolError { message: String },

    #[error("PBX rejected the table: {}", messages.join("; "))]
    RejectedError { messages: Vec<String> },

    #[error("Table source failed: {message}")]
    AdapterError { message: String },

    #[error("Structural diff failed: {message}")]
    DiffToolError { message: String },

    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Cache comparison failed: {message}")]
    CacheError { message: String },

    #[error("XML error: {message}")]
    XmlError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },
}

pub type Result<T> = std::result::Result<T, LcrError>;

impl LcrError {
    pub fn auth(message: impl Into<String>) -> Self {
        Self::AuthError {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolError {
            message: message.into(),
        }
    }

    pub fn adapter(message: impl Into<String>) -> Self {
        Self::AdapterError {
            message: message.into(),
        }
    }

    pub fn diff_tool(message: impl Into<String>) -> Self {
        Self::DiffToolError {
            message: message.into(),
        }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::CacheError {
            message: message.into(),
        }
    }

    pub fn xml(message: impl Into<String>) -> Self {
        Self::XmlError {
            message: message.into(),
        }
    }

    /// Process exit status for this error; each failure category gets its own code.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::AuthError { .. } => 2,
            Self::TransportError(_) => 3,
            Self::ProtocolError { .. } => 4,
            Self::RejectedError { .. } => 5,
            Self::AdapterError { .. } => 6,
            Self::DiffToolError { .. } => 7,
            _ => 1,
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::AuthError { .. } => "The PBX refused the login credentials".to_string(),
            Self::TransportError(e) if e.is_timeout() => {
                "The PBX did not answer in time".to_string()
            }
            Self::TransportError(_) => "The PBX could not be reached".to_string(),
            Self::ProtocolError { message } => {
                format!("The PBX answered in an unexpected way: {}", message)
            }
            Self::RejectedError { messages } => {
                format!("The PBX rejected the LCR table ({} message(s))", messages.len())
            }
            Self::AdapterError { .. } => "No candidate LCR table could be produced".to_string(),
            Self::DiffToolError { .. } => "The LCR tables could not be compared".to_string(),
            other => other.to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::AuthError { .. } => "Check pbx.username and pbx.password in the configuration",
            Self::TransportError(_) => "Check pbx.address and that the PBX web interface is up",
            Self::ProtocolError { .. } => {
                "Check the PBX firmware supports Soft-LCR 4.0; rerun with --debug to capture the exchange"
            }
            Self::RejectedError { .. } => {
                "Inspect the preserved working directory and validate the table against the PBX limits"
            }
            Self::AdapterError { .. } => "Run the table source command by hand to see its output",
            Self::DiffToolError { .. } => "Check the [differ] section of the configuration",
            Self::CacheError { .. } => {
                "Pass a run directory or run archive that contains the tariff *.yaml files"
            }
            Self::ConfigError { .. }
            | Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => "Fix the configuration file and try again",
            _ => "Rerun with --verbose for more detail",
        }
    }
}
