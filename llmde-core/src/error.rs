use std::path::PathBuf;

use thiserror::Error;

use crate::params::ValidationError;

pub type Result<T, E = LlmdeError> = std::result::Result<T, E>;

/// Coarse classification used by callers to decide whether an error aborts
/// a run or only the current job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Validation,
    Upload,
    Generation,
    NoTextContent,
    Io,
}

#[derive(Debug, Error)]
pub enum LlmdeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("unknown model '{model}', expected a name starting with one of: {}", supported.join(", "))]
    UnknownModel {
        model: String,
        supported: Vec<&'static str>,
    },

    #[error(
        "API key for {provider} not provided and environment variable {env_var} is not set; pass --api-key or set {env_var}"
    )]
    MissingCredential {
        provider: &'static str,
        env_var: &'static str,
    },

    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("prompt '{name}' is neither a builtin prompt nor an existing file")]
    PromptNotFound { name: String },

    #[error("system instruction '{name}' is neither a builtin instruction nor an existing file")]
    SystemInstructionNotFound { name: String },

    #[error("file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("JSON schema {} is invalid: {message}", path.display())]
    InvalidSchema { path: PathBuf, message: String },

    #[error("failed to upload {}: {message}", file.display())]
    Upload { file: PathBuf, message: String },

    #[error("generation request to '{model}' failed: {message}")]
    Generation { model: String, message: String },

    #[error("no text content found in response from '{model}'")]
    NoTextContent { model: String },

    #[error("model '{model}' has already been closed")]
    AdapterClosed { model: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write manifest: {0}")]
    Manifest(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmdeError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::UnknownModel { .. }
            | Self::MissingCredential { .. }
            | Self::EmptyField { .. }
            | Self::PromptNotFound { .. }
            | Self::SystemInstructionNotFound { .. }
            | Self::FileNotFound { .. }
            | Self::InvalidSchema { .. } => ErrorKind::Configuration,
            Self::Upload { .. } => ErrorKind::Upload,
            Self::Generation { .. } | Self::AdapterClosed { .. } | Self::Json(_) => {
                ErrorKind::Generation
            }
            Self::NoTextContent { .. } => ErrorKind::NoTextContent,
            Self::Io { .. } | Self::Manifest(_) => ErrorKind::Io,
        }
    }

    /// Pre-flight errors terminate a run; everything else is scoped to a
    /// single (document, prompt) job.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Configuration | ErrorKind::Validation
        )
    }
}
