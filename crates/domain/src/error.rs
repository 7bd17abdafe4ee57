/// Shared error type used across all persona-relay crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// The agent endpoint answered with a non-success status.
    #[error("agent request failed ({status}). {details}")]
    Upstream { status: u16, details: String },

    /// A single SSE event carried a payload that is not a valid stream event.
    #[error("stream parse: {0}")]
    StreamParse(String),

    /// Writing turn/conversation state failed.
    #[error("persistence: {0}")]
    Persistence(String),

    /// The caller went away or the request was cancelled.
    #[error("request aborted")]
    Aborted,

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Name of the error category, stored as `error.name` on failed turns.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "IoError",
            Error::Json(_) => "JsonError",
            Error::Http(_) => "HttpError",
            Error::Timeout(_) => "TimeoutError",
            Error::Upstream { .. } => "UpstreamError",
            Error::StreamParse(_) => "StreamParseError",
            Error::Persistence(_) => "PersistenceError",
            Error::Aborted => "AbortError",
            Error::Validation(_) => "ValidationError",
            Error::Config(_) => "ConfigError",
            Error::Other(_) => "Error",
        }
    }

    /// `true` for errors that only affect one stream event; the stream
    /// keeps going after them.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::StreamParse(_))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Aborted)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_message_carries_status_and_details() {
        let err = Error::Upstream {
            status: 500,
            details: r#"{"error":"overloaded"}"#.into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("500"));
        assert!(msg.contains("overloaded"));
        assert_eq!(err.kind(), "UpstreamError");
    }

    #[test]
    fn only_stream_parse_is_recoverable() {
        assert!(Error::StreamParse("bad".into()).is_recoverable());
        assert!(!Error::Http("reset".into()).is_recoverable());
        assert!(!Error::Aborted.is_recoverable());
        assert!(Error::Aborted.is_aborted());
    }
}
