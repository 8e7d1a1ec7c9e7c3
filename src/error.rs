use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlusError {
    // Configuration errors
    #[error("Invalid config: {message}")]
    ConfigValidation { message: String },

    // State errors
    #[error("Failed to save state to '{path}': {source}")]
    StateSave {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load state from '{path}': {source}")]
    StateLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse state file '{path}': {source}")]
    StateParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    // Authentication / authorization errors
    #[error("Access denied: {message}")]
    AccessDenied { message: String },

    // User input errors
    #[error("{message}")]
    InvalidInput { message: String },

    // State-conflict errors (voting window closed and the like)
    #[error("{message}")]
    Operation { message: String },

    // Generic errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl PlusError {
    pub fn access_denied(message: impl Into<String>) -> Self {
        PlusError::AccessDenied {
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        PlusError::InvalidInput {
            message: message.into(),
        }
    }

    pub fn operation(message: impl Into<String>) -> Self {
        PlusError::Operation {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for PlusError {
    fn from(err: std::io::Error) -> Self {
        PlusError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for PlusError {
    fn from(err: serde_json::Error) -> Self {
        PlusError::Internal {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PlusError>;
