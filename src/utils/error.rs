//! The `error` module defines the error type shared by every part of
//! `dispatchq`.
//!
//! Most of these conditions are expected during normal operation (a stale
//! answer, a consumer that left between selection and send) and are logged
//! and dropped by the broker rather than propagated. The only place an
//! error crosses a component boundary is the producer callback.

use crate::endpoint::Address;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("consumer not found")]
    ConsumerNotFound,

    #[error("consumer already exists")]
    ConsumerAlreadyExists,

    #[error("message not found")]
    MessageNotFound,

    #[error("answer not found")]
    AnswerNotFound,

    #[error("peer {0} not found")]
    PeerNotFound(Address),

    #[error("command '{0}' not found")]
    CommandNotFound(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("truncated packet: got {0} bytes, need at least 4")]
    TruncatedPacket(usize),

    #[error("send failed: {0}")]
    SendFailure(String),

    #[error("request {0} timed out")]
    Timeout(u32),

    #[error("connection error: {0}")]
    Connection(String),
}

impl Error {
    /// Create a send failure from any displayable transport error.
    pub fn send<E: std::fmt::Display>(err: E) -> Self {
        Self::SendFailure(err.to_string())
    }

    /// True for the "absent" family of errors that callers usually just log.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ConsumerNotFound
                | Self::MessageNotFound
                | Self::AnswerNotFound
                | Self::PeerNotFound(_)
                | Self::CommandNotFound(_)
        )
    }
}
