use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("backend service is unavailable")]
    BackendUnavailable,

    #[error("failed to connect to backend at {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("invalid backend request: {0}")]
    InvalidRequest(String),

    #[error("backend connection error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("malformed backend frame: {0}")]
    Decode(#[from] serde_json::Error),
}

impl RelayError {
    /// Nothing is listening at the backend address. Expected while the
    /// backend is starting, so it is logged without the full error chain.
    pub fn is_refused(&self) -> bool {
        let source = match self {
            Self::Connect { source, .. } | Self::Transport(source) => source,
            _ => return false,
        };
        match source {
            tungstenite::Error::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_connection_is_classified() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = RelayError::Connect {
            url: "ws://127.0.0.1:8765/".into(),
            source: tungstenite::Error::Io(io_err),
        };
        assert!(err.is_refused());
        assert!(err.to_string().contains("ws://127.0.0.1:8765/"));
    }

    #[test]
    fn other_errors_are_not_refused() {
        assert!(!RelayError::BackendUnavailable.is_refused());
        assert!(!RelayError::Transport(tungstenite::Error::ConnectionClosed).is_refused());
        let decode = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!RelayError::from(decode).is_refused());
    }
}
