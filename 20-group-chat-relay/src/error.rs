//! Error types shared by the relay and the chat client.

use std::{io, net::SocketAddr, time::Duration};

use thiserror::Error;

use crate::session::SessionId;

/// Failures while encoding or decoding a single frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame payload is {0} bytes, the limit is 65535")]
    FrameTooLarge(usize),
    #[error("connection closed before a complete frame was read")]
    ConnectionClosed,
    #[error("frame payload is not valid modified UTF-8")]
    MalformedFrame,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FrameError {
    /// Maps a short read to [`FrameError::ConnectionClosed`]; everything else stays an I/O error.
    pub(crate) fn from_read(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            FrameError::ConnectionClosed
        } else {
            FrameError::Io(err)
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {0} is closed")]
    Closed(SessionId),
    #[error("write to session {id} timed out after {timeout:?}")]
    WriteTimeout { id: SessionId, timeout: Duration },
    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to bind relay listener on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid {field} '{value}': must be non-empty and must not contain ']'")]
    InvalidIdentity { field: &'static str, value: String },
    #[error("message is {0} bytes once encoded, the limit is 65535")]
    MessageTooLarge(usize),
    #[error("disconnected from relay")]
    Disconnected(#[source] Option<FrameError>),
    #[error("client is already listening")]
    AlreadyListening,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicParseError {
    #[error("message does not start with a '[topic]' tag")]
    MissingTopic,
    #[error("message has no '[sender]' tag after the topic")]
    MissingSender,
}
