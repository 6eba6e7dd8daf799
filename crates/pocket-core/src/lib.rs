use thiserror::Error;

#[derive(Error, Debug)]
pub enum PocketError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("MCP communication error: {0}")]
    McpError(String),

    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),

    #[error("Tool '{0}' not found")]
    ToolNotFound(String),

    #[error("Invalid parameters for tool '{tool}': {message}")]
    InvalidParameters { tool: String, message: String },

    #[error("Channel '{channel}' error: {message}")]
    ChannelError { channel: String, message: String },

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Lifecycle error: {0}")]
    LifecycleError(String),

    #[error("Message bus error: {0}")]
    BusError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl PocketError {
    pub fn channel(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ChannelError {
            channel: channel.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PocketError>;
