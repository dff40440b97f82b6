use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeftError {
    // Definition errors
    #[error("Workflow contains a cycle: {0}")]
    Cycle(String),

    #[error("Invalid workflow shape: {0}")]
    Shape(String),

    // Configuration errors
    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("Package not allowed: {0}")]
    PackageNotAllowed(String),

    #[error("No implementation available for package: {0}")]
    PackageUnavailable(String),

    // Execution errors
    #[error("Provider call failed: {0}")]
    ProviderCall(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Execution timeout after {timeout_ms}ms")]
    SandboxTimeout { timeout_ms: u64 },

    #[error("Node {node} failed: {message}")]
    NodeExecution { node: String, message: String },

    #[error("Run cancelled")]
    Cancelled,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WeftError {
    /// Whether this error was raised before any node ran.
    pub fn is_definition_error(&self) -> bool {
        matches!(self, Self::Cycle(_) | Self::Shape(_))
    }
}

pub type Result<T> = std::result::Result<T, WeftError>;
