//! Error types for the report processor.

use thiserror::Error;

/// Errors raised while loading settings or resolving secrets.
///
/// Every variant aborts the invocation before any HTTP call is made.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Settings file could not be read
    #[error("Failed to read settings file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Settings file is not valid YAML or has the wrong shape
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A required field is missing or empty
    #[error("Missing required setting: {0}")]
    MissingField(&'static str),

    /// Neither OAuth nor basic credentials resolved to usable values
    #[error("No credentials configured: set oauth_token or both user and password")]
    MissingCredentials,

    /// Unknown entry in `incident_creation_conditions`
    #[error("Unknown incident creation condition: '{0}'")]
    UnknownCondition(String),

    /// `ENC[...]` value that could not be parsed
    #[error("Malformed encrypted value: {0}")]
    MalformedSecret(String),

    /// Encryption scheme other than PKCS7
    #[error("Unsupported encryption scheme: '{0}'")]
    UnsupportedScheme(String),

    /// Key configuration file could not be read or parsed
    #[error("Failed to load eyaml key config '{path}': {reason}")]
    KeyConfig { path: String, reason: String },

    /// Key material missing or the decryption backend rejected the ciphertext
    #[error("Failed to decrypt secret: {0}")]
    Decrypt(String),
}

/// Errors raised while submitting an incident.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// ServiceNow answered with anything other than 200
    #[error("Failed to create ServiceNow incident (status: {status}): {body}")]
    Request { status: u16, body: String },

    /// Connection, DNS, TLS or timeout failure
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SubmitError {
    /// HTTP status code of a rejected request, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Request { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors raised while reading a run report document.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to read report '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse report: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Unknown report status: '{0}'")]
    UnknownStatus(String),
}

/// Fatal error for a single processor invocation.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Submit(#[from] SubmitError),
}

/// Result alias for processor operations.
pub type Result<T, E = ProcessorError> = std::result::Result<T, E>;
