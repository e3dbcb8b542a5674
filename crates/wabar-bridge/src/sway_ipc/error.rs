//! Error types for sway IPC operations
//!
//! The classes follow how far a failure reaches: `ProtocolError` and
//! `TransportError` end the connection, `SchemaError` only drops the
//! offending message, and `StateError` is a no-op the dispatcher logs.

use std::path::PathBuf;

use thiserror::Error;

use super::types::RequestKind;

/// The byte stream no longer makes sense as i3-ipc frames
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame header does not start with the `i3-ipc` magic
    #[error("Bad frame magic: expected \"i3-ipc\", got {found:?}")]
    BadMagic { found: Vec<u8> },

    /// A frame declares a payload larger than the configured maximum
    #[error("Frame payload of {length} bytes exceeds the {max} byte limit")]
    LengthOverflow { length: u64, max: u32 },

    /// The peer closed the socket in the middle of a frame
    #[error("Connection closed with {buffered} bytes of an incomplete frame buffered")]
    Truncated { buffered: usize },

    /// A reply arrived that does not answer the oldest outstanding request
    #[error("Reply of type {got} does not match the pending {expected:?} request")]
    UnexpectedReply { expected: RequestKind, got: u32 },

    /// A reply arrived while no request was outstanding
    #[error("Unsolicited reply of type {got}")]
    UnsolicitedReply { got: u32 },
}

/// Errors that can occur on the socket itself
#[derive(Debug, Error)]
pub enum TransportError {
    /// Neither SWAYSOCK nor I3SOCK is set
    #[error("SWAYSOCK and I3SOCK environment variables not set - is sway running?")]
    SocketNotSet,

    /// The socket path does not exist
    #[error("Sway socket not found at {path}")]
    SocketNotFound { path: PathBuf },

    /// Failed to connect to the socket
    #[error("Failed to connect to sway socket at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a request
    #[error("Failed to send request to sway: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Failed to read from the socket
    #[error("Failed to receive from sway: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The peer closed the connection
    #[error("Connection to sway closed unexpectedly")]
    ConnectionClosed,

    /// The compositor announced it is exiting or restarting
    #[error("Sway is shutting down ({change})")]
    CompositorShutdown { change: String },

    /// The compositor answered a request with `success: false`
    #[error("Sway rejected {kind:?} request: {message}")]
    Rejected { kind: RequestKind, message: String },

    /// GET_BAR_IDS returned an empty list
    #[error("Sway reports no bars")]
    NoBars,
}

/// A well-formed frame whose JSON does not match what its type promises
#[derive(Debug, Error)]
#[error("Malformed {context} payload: {source}")]
pub struct SchemaError {
    pub context: &'static str,
    #[source]
    pub source: serde_json::Error,
}

impl SchemaError {
    pub fn new(context: &'static str, source: serde_json::Error) -> Self {
        Self { context, source }
    }
}

/// An event that is valid but not meant for this bar
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("Event for bar {event_id:?}, this bridge drives {bar_id:?}")]
    UnknownBar { event_id: String, bar_id: String },
}

/// Umbrella error for bridge operations
#[derive(Debug, Error)]
pub enum IpcError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    State(#[from] StateError),

    /// The bar id is not known yet, so the request cannot be addressed
    #[error("Bar configuration has not been received yet")]
    NotReady,

    /// The reader stopped before answering a request
    #[error("Bridge reader stopped before the reply arrived")]
    ReaderGone,
}

impl IpcError {
    /// Whether this error ends the connection
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IpcError::Protocol(_) | IpcError::Transport(_) | IpcError::ReaderGone
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_not_set_message_names_variables() {
        let message = TransportError::SocketNotSet.to_string();
        assert!(message.contains("SWAYSOCK"));
        assert!(message.contains("I3SOCK"));
    }

    #[test]
    fn test_fatality_by_class() {
        assert!(IpcError::from(ProtocolError::Truncated { buffered: 3 }).is_fatal());
        assert!(IpcError::from(TransportError::ConnectionClosed).is_fatal());

        let schema = serde_json::from_str::<u32>("nope").unwrap_err();
        assert!(!IpcError::from(SchemaError::new("mode", schema)).is_fatal());

        let state = StateError::UnknownBar {
            event_id: "bar-1".into(),
            bar_id: "bar-0".into(),
        };
        assert!(!IpcError::from(state).is_fatal());
    }

    #[test]
    fn test_length_overflow_message() {
        let err = ProtocolError::LengthOverflow {
            length: 1 << 31,
            max: 1024,
        };
        let message = err.to_string();
        assert!(message.contains("2147483648"));
        assert!(message.contains("1024"));
    }
}
