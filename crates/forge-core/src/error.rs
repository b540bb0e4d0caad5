use thiserror::Error;

/// High-level error type shared across Forge components.
#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("invalid project spec: {0}")]
    InvalidSpec(String),
    #[error("validation failed:\n{}", .0.join("\n"))]
    Validation(Vec<String>),
    #[error("engine error: {0}")]
    Engine(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("port allocator error: {0}")]
    PortAllocator(String),
    #[error("template error: {0}")]
    Template(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ForgeError {
    pub fn context<T: std::fmt::Display>(self, ctx: T) -> Self {
        match self {
            ForgeError::InvalidSpec(msg) => ForgeError::InvalidSpec(format!("{ctx}: {msg}")),
            ForgeError::Engine(msg) => ForgeError::Engine(format!("{ctx}: {msg}")),
            ForgeError::Store(msg) => ForgeError::Store(format!("{ctx}: {msg}")),
            ForgeError::PortAllocator(msg) => ForgeError::PortAllocator(format!("{ctx}: {msg}")),
            ForgeError::Template(msg) => ForgeError::Template(format!("{ctx}: {msg}")),
            ForgeError::NotFound(msg) => ForgeError::NotFound(format!("{ctx}: {msg}")),
            ForgeError::Serialization(msg) => ForgeError::Serialization(format!("{ctx}: {msg}")),
            other => other,
        }
    }
}

impl From<serde_json::Error> for ForgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for ForgeError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ForgeError>;
