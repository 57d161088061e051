use std::path::PathBuf;

/// Errors surfaced at the configuration boundary. The supervisor aborts with
/// exit code 1 on any of these.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config at {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid agent config in AGENT_CONFIG: {0}")]
    BadAgentConfig(String),

    #[error("Shared fan-out requires a workspace path")]
    FanOutWithoutWorkspace,

    #[error("Invalid queue URL '{url}': {message}")]
    BadQueueUrl { url: String, message: String },
}

/// Errors from the message bus and its queue backend.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Queue I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Queue protocol error: {0}")]
    Protocol(String),

    #[error("Queue server error: {0}")]
    Server(String),

    #[error("Malformed queue message: {0}")]
    BadMessage(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors from the iteration/session state store.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("State I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse state file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Errors from the LLM client.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("Unparsable API response: {0}")]
    BadResponse(String),
}

/// Errors from tool registration and execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    Unknown(String),

    #[error("Tool '{0}' is server-hosted and cannot be executed locally")]
    ServerHosted(String),

    #[error("Tool '{name}' failed: {message}")]
    Failed { name: String, message: String },

    #[error("Invalid input for tool '{name}': {message}")]
    BadInput { name: String, message: String },
}

/// Errors from the dynamic tool validator.
#[derive(Debug, thiserror::Error)]
pub enum ValidatorError {
    #[error("Tool source not found at {0}")]
    SourceMissing(PathBuf),

    #[error("Registry I/O error: {0}")]
    Registry(String),

    #[error("Validation runtime error: {0}")]
    Runtime(String),
}
