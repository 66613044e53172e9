use std::str::FromStr;
use thiserror::Error;
use uniqfield_storage::StorageError;

pub type Result<T> = std::result::Result<T, UniquenessError>;

#[derive(Error, Debug)]
pub enum UniquenessError {
    #[error("User must be authenticated.")]
    Unauthenticated,

    #[error("{0}")]
    InvalidArgument(String),

    #[error("Document with unique field already exists.")]
    AlreadyExists,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl UniquenessError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    pub fn serialization<E: std::fmt::Display>(e: E) -> Self {
        Self::Serialization(e.to_string())
    }

    /// Wire code surfaced to callers of the mutation endpoint.
    pub fn code(&self) -> &'static str {
        match self {
            UniquenessError::Unauthenticated => "unauthenticated",
            UniquenessError::InvalidArgument(_) => "invalid-argument",
            UniquenessError::AlreadyExists => "already-exists",
            UniquenessError::Storage(_)
            | UniquenessError::Config(_)
            | UniquenessError::Serialization(_) => "internal",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            UniquenessError::Storage(e) if e.kind.is_transient() => ErrorCategory::Transient,
            UniquenessError::Storage(_) => ErrorCategory::Infrastructure,
            _ => ErrorCategory::Permanent,
        }
    }
}

/// Error category for retry logic owned by the invoking infrastructure
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Transient error - retry automatically (e.g., busy store, aborted commit)
    Transient,
    /// Permanent error - don't retry (e.g., invalid input, uniqueness conflict)
    Permanent,
    /// Infrastructure error - alert ops (e.g., corrupt store, bad path)
    Infrastructure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Infrastructure => "infrastructure",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Transient)
    }
}

impl FromStr for ErrorCategory {
    type Err = UniquenessError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "transient" => Ok(ErrorCategory::Transient),
            "permanent" => Ok(ErrorCategory::Permanent),
            "infrastructure" => Ok(ErrorCategory::Infrastructure),
            _ => Err(UniquenessError::config(format!(
                "Invalid error category: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
