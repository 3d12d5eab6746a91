//! Error types shared across webreel crates.

use std::path::PathBuf;

/// Top-level error type for webreel operations.
#[derive(Debug, thiserror::Error)]
pub enum WebreelError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Browser error: {message}")]
    Browser { message: String },

    #[error("Page error: {message}")]
    Page { message: String },

    #[error("Capture error: {message}")]
    Capture { message: String },

    #[error("Preprocess error: {message}")]
    Preprocess { message: String },

    #[error("Encode error: {message}")]
    Encode { message: String },

    #[error("Synthesis error: {message}")]
    Synthesis { message: String },

    #[error("Pool exhausted: {message}")]
    PoolExhausted { message: String },

    #[error("Timed out after {millis}ms: {message}")]
    Timeout { message: String, millis: u64 },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using WebreelError.
pub type WebreelResult<T> = Result<T, WebreelError>;

impl WebreelError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn browser(msg: impl Into<String>) -> Self {
        Self::Browser {
            message: msg.into(),
        }
    }

    pub fn page(msg: impl Into<String>) -> Self {
        Self::Page {
            message: msg.into(),
        }
    }

    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture {
            message: msg.into(),
        }
    }

    pub fn preprocess(msg: impl Into<String>) -> Self {
        Self::Preprocess {
            message: msg.into(),
        }
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode {
            message: msg.into(),
        }
    }

    pub fn synthesis(msg: impl Into<String>) -> Self {
        Self::Synthesis {
            message: msg.into(),
        }
    }

    pub fn pool(msg: impl Into<String>) -> Self {
        Self::PoolExhausted {
            message: msg.into(),
        }
    }

    pub fn timeout(msg: impl Into<String>, millis: u64) -> Self {
        Self::Timeout {
            message: msg.into(),
            millis,
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// Whether the error should take down the whole run rather than a
    /// single page.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Encode { .. } | Self::Synthesis { .. } | Self::Config { .. }
        )
    }
}
