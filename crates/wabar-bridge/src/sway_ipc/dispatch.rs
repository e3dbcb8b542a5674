//! Handshake and event routing for one bar
//!
//! The `Dispatcher` lives in the reader task. It is fed every `Inbound`
//! message the `TransportReader` produces and turns it into state machine
//! transitions and published signals.
//!
//! ## Handshake
//!
//! ```text
//!  Idle ──start()──> RequestingBarIds ──["bar-0",..]──> RequestingBarConfig
//!   │                                                        │
//!   └──start() with a configured id────────────────────────>─┤
//!                                                            │ config reply
//!                                                            v
//!                         Ready <──{"success":true}── Subscribing
//! ```
//!
//! Any state can fall into `Failed`: an empty bar id list, a config error
//! reply, or a rejected subscription. A config reply that is valid JSON of
//! the wrong shape is not fatal: the defaults for the requested id are kept
//! and the handshake continues.

use tracing::{debug, info, trace, warn};
use wabar_config::BarSettings;

use super::codec::Frame;
use super::error::{IpcError, SchemaError, TransportError};
use super::transport::{Inbound, Transport};
use super::types::{
    parse_payload, subscription_payload, BarConfig, BarEvent, CommandOutcome, ErrorReply,
    EventKind, RequestKind, WorkspaceNode,
};
use crate::bar_state::{BarState, Signal};
use crate::relay::{LinkState, SignalRelay};

/// Where the initial exchange with the compositor stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupState {
    Idle,
    RequestingBarIds,
    RequestingBarConfig,
    Subscribing,
    Ready,
    Failed,
}

/// Routes inbound messages for one bar
#[derive(Debug)]
pub struct Dispatcher {
    transport: Transport,
    relay: SignalRelay,
    state: BarState,
    setup: SetupState,
    settings: BarSettings,
}

impl Dispatcher {
    pub fn new(transport: Transport, relay: SignalRelay, settings: BarSettings) -> Self {
        Self {
            transport,
            relay,
            state: BarState::new(&settings),
            setup: SetupState::Idle,
            settings,
        }
    }

    pub fn setup(&self) -> SetupState {
        self.setup
    }

    pub fn state(&self) -> &BarState {
        &self.state
    }

    pub fn relay(&self) -> &SignalRelay {
        &self.relay
    }

    /// Take the relay back out, e.g. to reuse it for a new connection
    pub fn into_relay(self) -> SignalRelay {
        self.relay
    }

    /// Event classes this bar subscribes to
    pub fn subscriptions(&self) -> Vec<EventKind> {
        let mut events = vec![
            EventKind::Workspace,
            EventKind::Mode,
            EventKind::Window,
            EventKind::BarConfigUpdate,
            EventKind::BarStateUpdate,
            EventKind::Shutdown,
        ];
        if self.settings.wants_binding_events() {
            events.push(EventKind::Binding);
        }
        events
    }

    /// Begin the handshake
    pub async fn start(&mut self) -> Result<(), IpcError> {
        self.relay.set_link(LinkState::Connecting);

        match self.state.bar_id().map(str::to_string) {
            Some(id) => self.request_bar_config(&id).await,
            None => {
                debug!("No bar id configured, asking sway for bar ids");
                self.setup = SetupState::RequestingBarIds;
                self.transport.send(RequestKind::GetBarIds, b"").await
            }
        }
    }

    async fn request_bar_config(&mut self, id: &str) -> Result<(), IpcError> {
        debug!(bar_id = id, "Requesting bar config");
        self.setup = SetupState::RequestingBarConfig;
        self.transport
            .send(RequestKind::GetBarConfig, id.as_bytes())
            .await
    }

    /// Handle one inbound message
    ///
    /// Errors during the handshake leave the dispatcher `Failed`; callers
    /// should treat an error as fatal when `IpcError::is_fatal` says so or
    /// the handshake has failed, and log and continue otherwise.
    pub async fn handle(&mut self, inbound: Inbound) -> Result<(), IpcError> {
        let result = match inbound {
            Inbound::Reply { kind, frame } => self.on_reply(kind, frame).await,
            Inbound::Event(frame) => self.on_event(frame).await,
        };

        if let Err(e) = &result {
            if self.setup != SetupState::Ready && e.is_fatal() {
                self.setup = SetupState::Failed;
            }
        }

        result
    }

    async fn on_reply(&mut self, kind: RequestKind, frame: Frame) -> Result<(), IpcError> {
        trace!(kind = ?kind, len = frame.payload.len(), "Reply");

        match kind {
            RequestKind::GetBarIds => self.on_bar_ids(&frame).await?,
            RequestKind::GetBarConfig => self.on_bar_config(&frame).await?,
            RequestKind::Subscribe => self.on_subscribed(&frame)?,
            RequestKind::GetWorkspaces => {
                let workspaces: Vec<WorkspaceNode> = parse_payload(&frame, "workspace list")?;
                let urgent = workspaces.iter().any(|ws| ws.urgent);
                let signals = self.state.on_urgency(urgent);
                self.publish(signals);
            }
            RequestKind::RunCommand | RequestKind::GetVersion => {
                debug!(kind = ?kind, "Ignoring reply nobody waited for");
            }
        }

        Ok(())
    }

    async fn on_bar_ids(&mut self, frame: &Frame) -> Result<(), IpcError> {
        let ids: Vec<String> = match parse_payload(frame, "bar id list") {
            Ok(ids) => ids,
            Err(e) => {
                self.setup = SetupState::Failed;
                return Err(e.into());
            }
        };

        let Some(id) = ids.first() else {
            self.setup = SetupState::Failed;
            return Err(TransportError::NoBars.into());
        };

        if ids.len() > 1 {
            debug!("Sway has {} bars, driving the first", ids.len());
        }

        let id = id.clone();
        self.state.set_bar_id(&id);
        self.request_bar_config(&id).await
    }

    async fn on_bar_config(&mut self, frame: &Frame) -> Result<(), IpcError> {
        let value: serde_json::Value = parse_payload(frame, "bar config")?;

        if let Ok(ErrorReply {
            success: Some(false),
            error,
        }) = serde_json::from_value::<ErrorReply>(value.clone())
        {
            let err = TransportError::Rejected {
                kind: RequestKind::GetBarConfig,
                message: error.unwrap_or_else(|| "unknown error".to_string()),
            };
            if self.setup == SetupState::Ready {
                warn!("Config refresh failed: {}", err);
                return Ok(());
            }
            self.setup = SetupState::Failed;
            return Err(err.into());
        }

        let parsed = serde_json::from_value::<BarConfig>(value)
            .map_err(|e| SchemaError::new("bar config", e));

        if self.setup != SetupState::RequestingBarConfig {
            // A refresh: same rules as a pushed config update
            let config = parsed?;
            let signals = self.state.on_config_update(config)?;
            self.publish(signals);
            return Ok(());
        }

        match parsed {
            Ok(config) => {
                let signals = self.state.on_config_update(config)?;
                self.publish(signals);
            }
            Err(e) => {
                warn!("{}; keeping defaults", e);
                let defaults = self.state.config().clone();
                self.publish([Signal::Config(defaults), Signal::Visible(self.state.visible())]);
            }
        }

        self.setup = SetupState::Subscribing;
        let payload = subscription_payload(&self.subscriptions());
        debug!("Subscribing to {}", String::from_utf8_lossy(&payload));
        self.transport.send(RequestKind::Subscribe, &payload).await
    }

    fn on_subscribed(&mut self, frame: &Frame) -> Result<(), IpcError> {
        let outcome: CommandOutcome = match parse_payload(frame, "subscribe reply") {
            Ok(outcome) => outcome,
            Err(e) => {
                self.setup = SetupState::Failed;
                return Err(e.into());
            }
        };

        if !outcome.success {
            self.setup = SetupState::Failed;
            return Err(TransportError::Rejected {
                kind: RequestKind::Subscribe,
                message: outcome.error.unwrap_or_else(|| "subscription refused".to_string()),
            }
            .into());
        }

        self.setup = SetupState::Ready;
        self.relay.set_link(LinkState::Ready);
        info!(
            "Bar {} connected to sway",
            self.state.bar_id().unwrap_or("?")
        );
        Ok(())
    }

    async fn on_event(&mut self, frame: Frame) -> Result<(), IpcError> {
        match BarEvent::parse(&frame)? {
            BarEvent::Mode(event) => {
                let signals = self.state.on_mode(&event.change);
                self.publish(signals);
            }
            BarEvent::Workspace(event) => {
                self.state.note_action();
                if event.change == "urgent" {
                    let urgent = event.current.is_some_and(|ws| ws.urgent);
                    self.urgency_hint(urgent).await?;
                }
            }
            BarEvent::Window(event) => {
                if event.change == "urgent" {
                    self.urgency_hint(event.container.urgent).await?;
                }
            }
            BarEvent::BarConfigUpdate(config) => {
                let signals = self.state.on_config_update(config)?;
                self.publish(signals);
            }
            BarEvent::BarStateUpdate(update) => {
                let signals = self
                    .state
                    .on_modifier_visibility(&update.id, update.visible_by_modifier)?;
                self.publish(signals);
            }
            BarEvent::Binding(event) => {
                let signals = self.state.on_binding(&event.binding);
                self.publish(signals);
            }
            BarEvent::Shutdown(event) => {
                info!("Sway is shutting down ({})", event.change);
                return Err(TransportError::CompositorShutdown {
                    change: event.change,
                }
                .into());
            }
            BarEvent::Ignored(kind) => trace!(kind, "Ignoring event"),
        }

        Ok(())
    }

    /// Something became urgent, or stopped being urgent
    ///
    /// Losing urgency on one window says nothing about the others, so while
    /// urgency is showing the bar the workspace list is fetched and the
    /// reply decides.
    async fn urgency_hint(&mut self, urgent: bool) -> Result<(), IpcError> {
        if urgent {
            let signals = self.state.on_urgency(true);
            self.publish(signals);
            Ok(())
        } else if self.state.triggers().by_urgency {
            self.transport.send(RequestKind::GetWorkspaces, b"").await
        } else {
            trace!("Urgency cleared while not shown for it");
            Ok(())
        }
    }

    fn publish(&self, signals: impl IntoIterator<Item = Signal>) {
        self.relay.publish_all(signals);
    }
}
