use thiserror::Error;

/// Errors raised by rule storage, caching and search.
#[derive(Error, Debug)]
pub enum RuleError {
    /// Nothing exists at the requested location in any tree
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller-supplied path is absolute, empty, or escapes its root
    #[error("Invalid path '{0}'")]
    InvalidPath(String),

    #[error("Content is required")]
    EmptyContent,

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RuleError {
    fn from(e: serde_json::Error) -> Self {
        RuleError::Serialization(e.to_string())
    }
}

impl RuleError {
    /// Whether the caller can fix this by changing the request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RuleError::InvalidPath(_) | RuleError::EmptyContent | RuleError::InvalidQuery(_)
        )
    }
}

pub type RuleResult<T> = Result<T, RuleError>;
