/// Result alias that carries the custom [`FxError`] type.
pub type Result<T> = std::result::Result<T, FxError>;

/// Common error type for the core crate.
///
/// None of these ever reach the embedding page: render loops translate them
/// into a fallback state and the shader cache logs them before returning.
#[derive(Debug, thiserror::Error)]
pub enum FxError {
    /// Free-form message for failures without a dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors (config loading).
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Malformed configuration or effect props.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    /// The GPU rejected the generated program for a cache key.
    #[error("shader `{key}` failed to compile: {reason}")]
    ShaderCompile { key: String, reason: String },
    /// No usable graphics context could be created.
    #[error("graphics context unavailable: {0}")]
    ContextUnavailable(String),
    /// A render loop was asked to move between two states it cannot connect.
    #[error("invalid render loop transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
}

impl FxError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for FxError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for FxError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
