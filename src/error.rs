use thiserror::Error;

/// ACL error types
#[derive(Error, Debug)]
pub enum AclError {
    #[error("Unrecognized block at line {line}: {header}")]
    UnknownSection { line: usize, header: String },

    #[error("Invalid CIDR: {0}")]
    InvalidCidr(String),

    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    #[error("Fetch error: {0}")]
    FetchError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Parse cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl AclError {
    /// Whether this error is the result of an observed cancellation rather
    /// than a failure of the input.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AclError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, AclError>;
