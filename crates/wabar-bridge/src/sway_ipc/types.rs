//! Message types and JSON payloads of the i3/sway IPC protocol
//!
//! Only the subset the bar bridge needs is modelled. Unknown JSON fields are
//! ignored so newer compositors keep working.

use serde::{Deserialize, Serialize};

use super::codec::Frame;
use super::error::SchemaError;

/// High bit marking a frame as an event rather than a reply
pub const EVENT_MASK: u32 = 0x8000_0000;

/// Command message types
pub mod message_type {
    pub const RUN_COMMAND: u32 = 0;
    pub const GET_WORKSPACES: u32 = 1;
    pub const SUBSCRIBE: u32 = 2;
    pub const GET_BAR_CONFIG: u32 = 6;
    pub const GET_VERSION: u32 = 7;
}

/// Event message types, without the event bit
pub mod event_type {
    pub const WORKSPACE: u32 = 0;
    pub const OUTPUT: u32 = 1;
    pub const MODE: u32 = 2;
    pub const WINDOW: u32 = 3;
    pub const BARCONFIG_UPDATE: u32 = 4;
    pub const BINDING: u32 = 5;
    pub const SHUTDOWN: u32 = 6;
    pub const TICK: u32 = 7;
    pub const BAR_STATE_UPDATE: u32 = 0x14;
    pub const INPUT: u32 = 0x15;
}

/// What an outbound request asks for
///
/// GET_BAR_IDS and GET_BAR_CONFIG share a wire type; the payload (empty or a
/// bar id) tells them apart, so replies are matched on this kind instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    RunCommand,
    GetWorkspaces,
    Subscribe,
    GetBarIds,
    GetBarConfig,
    GetVersion,
}

impl RequestKind {
    pub const fn message_type(self) -> u32 {
        match self {
            Self::RunCommand => message_type::RUN_COMMAND,
            Self::GetWorkspaces => message_type::GET_WORKSPACES,
            Self::Subscribe => message_type::SUBSCRIBE,
            Self::GetBarIds | Self::GetBarConfig => message_type::GET_BAR_CONFIG,
            Self::GetVersion => message_type::GET_VERSION,
        }
    }
}

/// Event classes a client can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Workspace,
    Output,
    Mode,
    Window,
    BarConfigUpdate,
    Binding,
    Shutdown,
    Tick,
    BarStateUpdate,
    Input,
}

impl EventKind {
    /// Decode the event class from a frame type; `None` for replies and
    /// unknown events
    pub fn from_type(kind: u32) -> Option<Self> {
        if kind & EVENT_MASK == 0 {
            return None;
        }
        match kind & !EVENT_MASK {
            event_type::WORKSPACE => Some(Self::Workspace),
            event_type::OUTPUT => Some(Self::Output),
            event_type::MODE => Some(Self::Mode),
            event_type::WINDOW => Some(Self::Window),
            event_type::BARCONFIG_UPDATE => Some(Self::BarConfigUpdate),
            event_type::BINDING => Some(Self::Binding),
            event_type::SHUTDOWN => Some(Self::Shutdown),
            event_type::TICK => Some(Self::Tick),
            event_type::BAR_STATE_UPDATE => Some(Self::BarStateUpdate),
            event_type::INPUT => Some(Self::Input),
            _ => None,
        }
    }

    pub const fn message_type(self) -> u32 {
        EVENT_MASK
            | match self {
                Self::Workspace => event_type::WORKSPACE,
                Self::Output => event_type::OUTPUT,
                Self::Mode => event_type::MODE,
                Self::Window => event_type::WINDOW,
                Self::BarConfigUpdate => event_type::BARCONFIG_UPDATE,
                Self::Binding => event_type::BINDING,
                Self::Shutdown => event_type::SHUTDOWN,
                Self::Tick => event_type::TICK,
                Self::BarStateUpdate => event_type::BAR_STATE_UPDATE,
                Self::Input => event_type::INPUT,
            }
    }

    /// Name used in a SUBSCRIBE payload
    pub const fn subscription_name(self) -> &'static str {
        match self {
            Self::Workspace => "workspace",
            Self::Output => "output",
            Self::Mode => "mode",
            Self::Window => "window",
            Self::BarConfigUpdate => "barconfig_update",
            Self::Binding => "binding",
            Self::Shutdown => "shutdown",
            Self::Tick => "tick",
            Self::BarStateUpdate => "bar_state_update",
            Self::Input => "input",
        }
    }
}

/// Supported subset of the sway `barconfig` object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarConfig {
    pub id: String,
    /// "dock", "hide", "invisible" or "overlay"
    pub mode: String,
    /// "hide" or "show"
    pub hidden_state: String,
    /// Modules allowed on this bar; `None` enables every module
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modules: Option<Vec<String>>,
}

impl Default for BarConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            mode: "dock".to_string(),
            hidden_state: "hide".to_string(),
            modules: None,
        }
    }
}

impl BarConfig {
    /// Default config for a known bar id, used until sway sends the real one
    pub fn for_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// A module is enabled unless a module list exists and no entry names it
    ///
    /// Entries match by prefix so `"sway/workspaces#alt"` enables
    /// `"sway/workspaces"`.
    pub fn is_module_enabled(&self, name: &str) -> bool {
        match &self.modules {
            None => true,
            Some(modules) => modules.iter().any(|module| module.starts_with(name)),
        }
    }
}

/// Reply body of RUN_COMMAND (one per command) and SUBSCRIBE
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandOutcome {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Error object sway returns instead of a bar config
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorReply {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModeEvent {
    pub change: String,
    #[serde(default)]
    pub pango_markup: bool,
}

/// Workspace node, as found in WORKSPACE events and GET_WORKSPACES replies
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WorkspaceNode {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub urgent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkspaceEvent {
    pub change: String,
    #[serde(default)]
    pub current: Option<WorkspaceNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ContainerNode {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub urgent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WindowEvent {
    pub change: String,
    pub container: ContainerNode,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BarStateUpdate {
    pub id: String,
    pub visible_by_modifier: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BindingInfo {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub event_state_mask: Vec<String>,
    #[serde(default)]
    pub input_code: i64,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub input_type: String,
}

impl BindingInfo {
    /// A binding triggered by the bare modifier, with no key or button
    pub fn is_bare_modifier(&self, modifier: &str) -> bool {
        self.symbol.is_none()
            && self.input_code == 0
            && !self.event_state_mask.is_empty()
            && self.event_state_mask.iter().all(|m| m == modifier)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BindingEvent {
    pub change: String,
    pub binding: BindingInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShutdownEvent {
    pub change: String,
}

/// An inbound event, decoded into the payload shape its type promises
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarEvent {
    Mode(ModeEvent),
    Workspace(WorkspaceEvent),
    Window(WindowEvent),
    BarConfigUpdate(BarConfig),
    BarStateUpdate(BarStateUpdate),
    Binding(BindingEvent),
    Shutdown(ShutdownEvent),
    /// A known or unknown event class the bar chrome does not care about
    Ignored(u32),
}

impl BarEvent {
    /// Decode an event frame
    ///
    /// Bar config and bar state updates share one handler: a payload that
    /// carries `visible_by_modifier` is a modifier visibility change,
    /// anything else is a config update.
    pub fn parse(frame: &Frame) -> Result<Self, SchemaError> {
        let Some(kind) = EventKind::from_type(frame.kind) else {
            return Ok(Self::Ignored(frame.kind));
        };

        let event = match kind {
            EventKind::Mode => Self::Mode(parse_payload(frame, "mode event")?),
            EventKind::Workspace => Self::Workspace(parse_payload(frame, "workspace event")?),
            EventKind::Window => Self::Window(parse_payload(frame, "window event")?),
            EventKind::Binding => Self::Binding(parse_payload(frame, "binding event")?),
            EventKind::Shutdown => Self::Shutdown(parse_payload(frame, "shutdown event")?),
            EventKind::BarConfigUpdate | EventKind::BarStateUpdate => {
                let value: serde_json::Value = parse_payload(frame, "bar event")?;
                if value.get("visible_by_modifier").is_some() {
                    Self::BarStateUpdate(
                        serde_json::from_value(value)
                            .map_err(|e| SchemaError::new("bar state update", e))?,
                    )
                } else {
                    Self::BarConfigUpdate(
                        serde_json::from_value(value)
                            .map_err(|e| SchemaError::new("bar config update", e))?,
                    )
                }
            }
            EventKind::Output | EventKind::Tick | EventKind::Input => Self::Ignored(frame.kind),
        };

        Ok(event)
    }
}

/// Deserialize a frame payload, tagging failures with what was expected
pub fn parse_payload<T>(frame: &Frame, context: &'static str) -> Result<T, SchemaError>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_slice(&frame.payload).map_err(|e| SchemaError::new(context, e))
}

/// Build the SUBSCRIBE payload for a set of event classes
pub fn subscription_payload(events: &[EventKind]) -> Vec<u8> {
    let names: Vec<&str> = events.iter().map(|e| e.subscription_name()).collect();
    serde_json::Value::from(names).to_string().into_bytes()
}
