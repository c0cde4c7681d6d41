//! Error types shared across Fraktal crates.

/// Top-level error type for Fraktal operations.
#[derive(Debug, thiserror::Error)]
pub enum FraktalError {
    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Encode error: {message}")]
    Encode { message: String },

    #[error("Mux error: {message}")]
    Mux { message: String },

    #[error("Bitstream error: {message}")]
    Bitstream { message: String },

    #[error("Export error: {message}")]
    Export { message: String },

    #[error("GPU context lost during {operation}")]
    ContextLost { operation: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("No codec configuration available for {codec} stream")]
    MissingCodecConfig { codec: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using FraktalError.
pub type FraktalResult<T> = Result<T, FraktalError>;

impl FraktalError {
    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode {
            message: msg.into(),
        }
    }

    pub fn mux(msg: impl Into<String>) -> Self {
        Self::Mux {
            message: msg.into(),
        }
    }

    pub fn bitstream(msg: impl Into<String>) -> Self {
        Self::Bitstream {
            message: msg.into(),
        }
    }

    pub fn export(msg: impl Into<String>) -> Self {
        Self::Export {
            message: msg.into(),
        }
    }

    pub fn context_lost(operation: impl Into<String>) -> Self {
        Self::ContextLost {
            operation: operation.into(),
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// Whether this error means the GPU resources are gone and the
    /// current session cannot continue.
    pub fn is_context_lost(&self) -> bool {
        matches!(self, Self::ContextLost { .. })
    }
}
