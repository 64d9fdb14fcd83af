use thiserror::Error;

pub mod context;

pub type Result<T> = std::result::Result<T, Error>;

// Re-export context helpers
pub use context::{ErrorChain, ErrorContext};

/// Main error type for shelfdb
///
/// Every failure the manager surfaces carries one of these variants, so
/// callers can always tell a bad configuration from a dead server.
#[derive(Error, Debug)]
pub enum Error {
    /// A required field is missing or structurally invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// The configuration failed the corruption guard
    #[error("Corrupt configuration: {0}")]
    CorruptConfig(String),

    /// Network or authentication failure reported by a backend driver
    #[error("Connection error: {message}{}", hint.as_ref().map(|h| format!(" ({})", h)).unwrap_or_default())]
    Connect {
        message: String,
        hint: Option<String>,
    },

    #[error("Schema error: {0}")]
    Schema(String),

    /// Internal signal: a pool was created while its registry slot was replaced
    #[error("Pool leak risk: {0}")]
    PoolLeakRisk(String),

    #[error("Query error: {0}")]
    Query(String),

    /// The persisted default-config store failed
    #[error("Config store error: {0}")]
    Store(String),

    /// Manager settings could not be loaded or are invalid
    #[error("Settings error: {0}")]
    Settings(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Error with context chain
    #[error("{message}")]
    WithContext {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

/// Error category, stable across context wrapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    CorruptConfig,
    Connect,
    Schema,
    PoolLeakRisk,
    Query,
    Store,
    Settings,
    Io,
    Json,
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn corrupt_config(msg: impl Into<String>) -> Self {
        Self::CorruptConfig(msg.into())
    }

    pub fn connect(msg: impl Into<String>) -> Self {
        Self::Connect {
            message: msg.into(),
            hint: None,
        }
    }

    pub fn connect_with_hint(msg: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Connect {
            message: msg.into(),
            hint: Some(hint.into()),
        }
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn pool_leak_risk(msg: impl Into<String>) -> Self {
        Self::PoolLeakRisk(msg.into())
    }

    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn settings(msg: impl Into<String>) -> Self {
        Self::Settings(msg.into())
    }

    // Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            message: context.into(),
            source: Box::new(self),
        }
    }

    /// Category of the underlying error, looking through context wrappers
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Config,
            Error::CorruptConfig(_) => ErrorKind::CorruptConfig,
            Error::Connect { .. } => ErrorKind::Connect,
            Error::Schema(_) => ErrorKind::Schema,
            Error::PoolLeakRisk(_) => ErrorKind::PoolLeakRisk,
            Error::Query(_) => ErrorKind::Query,
            Error::Store(_) => ErrorKind::Store,
            Error::Settings(_) => ErrorKind::Settings,
            Error::Io(_) => ErrorKind::Io,
            Error::Json(_) => ErrorKind::Json,
            Error::WithContext { source, .. } => source.kind(),
        }
    }

    /// Operator-facing hint attached to a connection failure, if any
    pub fn hint(&self) -> Option<&str> {
        match self {
            Error::Connect { hint, .. } => hint.as_deref(),
            Error::WithContext { source, .. } => source.hint(),
            _ => None,
        }
    }

    /// True for errors raised before any network I/O took place
    pub fn is_pre_io(&self) -> bool {
        matches!(self.kind(), ErrorKind::Config | ErrorKind::CorruptConfig)
    }

    /// Get error code for API responses and CLI output
    pub fn error_code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Config => "E_CONFIG",
            ErrorKind::CorruptConfig => "E_CORRUPT_CONFIG",
            ErrorKind::Connect => "E_CONNECT",
            ErrorKind::Schema => "E_SCHEMA",
            ErrorKind::PoolLeakRisk => "E_POOL_LEAK_RISK",
            ErrorKind::Query => "E_QUERY",
            ErrorKind::Store => "E_STORE",
            ErrorKind::Settings => "E_SETTINGS",
            ErrorKind::Io => "E_IO",
            ErrorKind::Json => "E_JSON",
        }
    }
}
