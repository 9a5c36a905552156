use keyspan_core::{ConfigError, DriverError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("connection to store failed{}: {message}", trace_suffix(.trace_id))]
    ConnectionFailed {
        trace_id: Option<String>,
        message: String,
        #[source]
        cause: Option<DriverError>,
    },

    #[error("disconnect from store failed{}", trace_suffix(.trace_id))]
    DisconnectFailed {
        trace_id: Option<String>,
        #[source]
        cause: DriverError,
    },

    #[error("invalid state{}: {message}", trace_suffix(.trace_id))]
    InvalidState {
        trace_id: Option<String>,
        message: String,
    },

    #[error("schema creation failed{} on `{statement}`", trace_suffix(.trace_id))]
    SchemaCreationFailed {
        trace_id: Option<String>,
        statement: String,
        #[source]
        cause: DriverError,
    },

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        table: String,
        column: String,
        detail: String,
    },

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StoreError {
    pub(crate) fn invalid_state(trace_id: Option<&str>, message: impl Into<String>) -> Self {
        Self::InvalidState {
            trace_id: trace_id.map(str::to_string),
            message: message.into(),
        }
    }

    /// Trace id attached to connection/schema errors.
    pub fn trace_id(&self) -> Option<&str> {
        match self {
            Self::ConnectionFailed { trace_id, .. }
            | Self::DisconnectFailed { trace_id, .. }
            | Self::InvalidState { trace_id, .. }
            | Self::SchemaCreationFailed { trace_id, .. } => trace_id.as_deref(),
            _ => None,
        }
    }
}

fn trace_suffix(trace_id: &Option<String>) -> String {
    trace_id
        .as_deref()
        .map(|id| format!(" [trace {id}]"))
        .unwrap_or_default()
}
