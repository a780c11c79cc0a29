//! RPC failure classification.

/// Classified failure of a single RPC call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// Network unreachable, refused, or timed out.
    #[error("Connection failure: {0}")]
    Connection(String),

    /// Any HTTP status other than 200.
    #[error("Device returned HTTP {0}")]
    BadStatus(u16),

    /// Body could not be parsed or lacks a required field.
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Malformed(err.to_string())
        } else if err.is_timeout() {
            Self::Connection(format!("request timed out: {err}"))
        } else {
            Self::Connection(err.to_string())
        }
    }
}
