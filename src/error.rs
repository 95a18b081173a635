//! Remote error taxonomy.
//!
//! The facade needs exactly one distinction: a transport-shaped failure
//! (connection refused, DNS, timeout) falls back to the offline path and is
//! never surfaced from a read path, while a business rejection from the
//! remote propagates verbatim to the caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    /// The transport failed before the remote could answer. Triggers the
    /// offline fallback and flips connectivity state.
    #[error("network unavailable: {0}")]
    Transport(String),

    /// The remote answered with an explicit error payload. Never retried
    /// automatically, never swallowed.
    #[error("{0}")]
    Api(String),

    /// The remote answered 200 but the body wasn't in any shape we know.
    #[error("malformed remote response: {0}")]
    Malformed(String),
}

impl RemoteError {
    pub fn is_transport(&self) -> bool {
        matches!(self, RemoteError::Transport(_))
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        // Anything that never produced a decodable response is transport.
        if err.is_decode() {
            RemoteError::Malformed(err.to_string())
        } else {
            RemoteError::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_classification() {
        assert!(RemoteError::Transport("connection refused".into()).is_transport());
        assert!(!RemoteError::Api("Playlist not found".into()).is_transport());
        assert!(!RemoteError::Malformed("not json".into()).is_transport());
    }

    #[test]
    fn api_errors_display_verbatim() {
        let err = RemoteError::Api("Access denied".into());
        assert_eq!(err.to_string(), "Access denied");
    }
}
