//! IPC bridge between sway/i3 and a status bar
//!
//! Connects to the compositor, tracks why the bar should be shown, and
//! publishes the result through watch channels a UI loop can poll without
//! ever blocking on the socket.

pub mod bar_state;
pub mod bridge;
pub mod relay;
pub mod shared;
pub mod sway_ipc;

pub use bar_state::{BarState, Signal, VisibilityTriggers};
pub use bridge::{BarBridge, CLOSED_BY_CONSUMER};
pub use relay::{BarSignals, LinkState, SignalRelay};
pub use shared::{ToggleMember, ToggleRegistry};
pub use sway_ipc::{BarConfig, CommandOutcome, IpcError};
