use std::fmt;
use std::time::Duration;

/// Coarse classification of a failed RPC attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    Timeout,
    Remote,
    Malformed,
}

impl ErrorKind {
    /// Whether a failure of this kind may be cured by sending the request again.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Transport | Self::Timeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Remote => "remote",
            Self::Malformed => "malformed response",
        };
        f.write_str(name)
    }
}

/// A classified RPC failure. Constructed once when an attempt fails and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// The request could not be delivered or the connection dropped mid-flight.
    #[error("transport failure: {message}")]
    Transport {
        message: String,
        /// HTTP status when the server answered with a non-JSON-RPC error page.
        status: Option<u16>,
    },

    #[error("no response within {}ms", .after.as_millis())]
    Timeout { after: Duration },

    /// The node answered with a JSON-RPC error object.
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl RpcError {
    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
        }
    }

    pub(crate) fn http_status(status: u16, body: &str) -> Self {
        let snippet: String = body.trim().chars().take(200).collect();
        let message = if snippet.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {snippet}")
        };
        Self::Transport {
            message,
            status: Some(status),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Remote { .. } => ErrorKind::Remote,
            Self::Malformed(_) => ErrorKind::Malformed,
        }
    }

    /// Numeric code reported by the node, if this is a remote error.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether another attempt could succeed.
    ///
    /// HTTP error pages are only worth retrying when the status signals an
    /// overloaded or restarting node; bad credentials or a wrong path will not
    /// fix themselves.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport {
                status: Some(status),
                ..
            } => *status >= 500 || *status == 408 || *status == 429,
            other => other.kind().is_transient(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("call cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: usize },

}

impl CoreError {
    /// The classified RPC failure, if this error came from the remote exchange.
    pub fn as_rpc(&self) -> Option<&RpcError> {
        match self {
            Self::Rpc(err) => Some(err),
            _ => None,
        }
    }
}
