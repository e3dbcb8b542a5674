//! Sway/i3 IPC client for the bar bridge
//!
//! This module speaks the i3-ipc protocol over the compositor's Unix socket.
//! It enables the bridge to:
//! - Discover the bar and fetch its configuration
//! - Subscribe to mode, workspace, window, bar and binding events
//! - Run commands and one-off queries
//!
//! ## Architecture
//!
//! - `codec`: binary framing (`Frame`, `FrameBuffer`)
//! - `Transport` / `TransportReader`: socket halves and reply correlation
//! - `Dispatcher`: handshake state machine and event routing
//! - `IpcError`: error taxonomy shared by all of the above
//!
//! ## Protocol
//!
//! Sway exposes a Unix socket at `$SWAYSOCK` (i3 at `$I3SOCK`). Every message
//! is a binary frame with a JSON payload; replies come back in request order
//! and events are interleaved with them, marked by the high bit of the type.

pub mod codec;
mod dispatch;
mod error;
mod transport;
mod types;

pub use codec::{Frame, FrameBuffer, DEFAULT_MAX_PAYLOAD};
pub use dispatch::{Dispatcher, SetupState};
pub use error::{IpcError, ProtocolError, SchemaError, StateError, TransportError};
pub use transport::{get_socket_path, request_once, Inbound, Transport, TransportReader};
pub use types::{
    event_type, message_type, parse_payload, subscription_payload, BarConfig, BarEvent,
    BarStateUpdate, BindingEvent, BindingInfo, CommandOutcome, EventKind, ModeEvent,
    RequestKind, WindowEvent, WorkspaceEvent, WorkspaceNode, EVENT_MASK,
};
