//! Consumer-facing bar bridge
//!
//! `BarBridge` owns one sway connection and the reader task that drives it.
//! The consumer never touches the socket directly: it reads signals from a
//! `BarSignals` bundle and calls the few async methods here, none of which
//! wait on anything but their own request.
//!
//! ```text
//! +-----------------+      +------------+      +-------------+
//! | TransportReader | ---> | Dispatcher | ---> | SignalRelay | ---> BarSignals
//! | (reader task)   |      | + BarState |      | (watch)     |      (consumer)
//! +-----------------+      +------------+      +-------------+
//! ```

use std::path::PathBuf;

use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use wabar_config::BarSettings;

use crate::relay::{BarSignals, LinkState, SignalRelay};
use crate::sway_ipc::{
    get_socket_path, parse_payload, CommandOutcome, Dispatcher, IpcError, RequestKind,
    SetupState, Transport, TransportReader,
};

/// Disconnect reason reported when the consumer closed the bridge
pub const CLOSED_BY_CONSUMER: &str = "closed by consumer";

enum ReaderState {
    Running {
        stop: oneshot::Sender<()>,
        task: JoinHandle<SignalRelay>,
    },
    Stopped(SignalRelay),
    /// The reader task panicked and took the relay with it
    Lost,
}

/// IPC bridge for one sway bar
pub struct BarBridge {
    settings: BarSettings,
    transport: Transport,
    signals: BarSignals,
    reader: ReaderState,
}

impl BarBridge {
    /// Connect to sway and start the handshake
    ///
    /// Uses the configured socket if there is one, `$SWAYSOCK` / `$I3SOCK`
    /// otherwise. Returns once the socket is connected; watch the link state
    /// in `signals()` for the handshake result.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` variants if the socket cannot be found or
    /// connected.
    pub async fn connect(settings: BarSettings) -> Result<Self, IpcError> {
        let (transport, reader) = Self::open(&settings).await?;
        let (relay, signals) = SignalRelay::new();

        Ok(Self::start(settings, transport, reader, relay, signals))
    }

    /// Run the bridge over an already connected stream
    pub fn from_stream(settings: BarSettings, stream: UnixStream) -> Self {
        let (transport, reader) = Transport::from_stream(stream, settings.max_frame_size);
        let (relay, signals) = SignalRelay::new();

        Self::start(settings, transport, reader, relay, signals)
    }

    async fn open(settings: &BarSettings) -> Result<(Transport, TransportReader), IpcError> {
        let path: PathBuf = match &settings.socket {
            Some(path) => path.clone(),
            None => get_socket_path()?,
        };
        Ok(Transport::connect(&path, settings.max_frame_size).await?)
    }

    fn start(
        settings: BarSettings,
        transport: Transport,
        reader: TransportReader,
        relay: SignalRelay,
        signals: BarSignals,
    ) -> Self {
        let reader = spawn_reader(&settings, transport.clone(), reader, relay);
        Self {
            settings,
            transport,
            signals,
            reader,
        }
    }

    /// Signal receivers for a new consumer
    pub fn signals(&self) -> BarSignals {
        self.signals.clone()
    }

    /// Current link state
    pub fn link(&self) -> LinkState {
        self.signals.link.borrow().clone()
    }

    /// Whether the last bar config enables a module
    ///
    /// Every module is enabled until a config has arrived.
    pub fn is_module_enabled(&self, name: &str) -> bool {
        self.signals
            .config
            .borrow()
            .as_ref()
            .map_or(true, |config| config.is_module_enabled(name))
    }

    /// Ask sway for the bar config again
    ///
    /// The reply is handled by the reader task and shows up on the config
    /// signal like any pushed update.
    ///
    /// # Errors
    ///
    /// Returns `IpcError::NotReady` before the first config has arrived.
    pub async fn refresh_config(&self) -> Result<(), IpcError> {
        let id = self
            .signals
            .config
            .borrow()
            .as_ref()
            .map(|config| config.id.clone())
            .ok_or(IpcError::NotReady)?;

        debug!(bar_id = %id, "Refreshing bar config");
        self.transport
            .send(RequestKind::GetBarConfig, id.as_bytes())
            .await
    }

    /// Run a sway command and wait for its outcome
    ///
    /// Sway answers with one outcome per `;`-separated command.
    pub async fn run_command(&self, command: &str) -> Result<Vec<CommandOutcome>, IpcError> {
        let reply = self
            .transport
            .request(RequestKind::RunCommand, command.as_bytes())
            .await?;
        Ok(parse_payload(&reply, "command reply")?)
    }

    /// Close the connection and reconnect from scratch
    ///
    /// Bar state and config go back to defaults; existing `BarSignals` stay
    /// valid and see the link go `Disconnected`, then `Connecting` and
    /// `Ready` again.
    pub async fn reconnect(&mut self) -> Result<(), IpcError> {
        self.disconnect().await;

        let relay = match std::mem::replace(&mut self.reader, ReaderState::Lost) {
            ReaderState::Stopped(relay) => relay,
            other => {
                self.reader = other;
                return Err(IpcError::ReaderGone);
            }
        };

        let (transport, reader) = match Self::open(&self.settings).await {
            Ok(halves) => halves,
            Err(e) => {
                self.reader = ReaderState::Stopped(relay);
                return Err(e);
            }
        };

        info!("Reconnecting to sway");
        relay.reset();
        self.transport = transport.clone();
        self.reader = spawn_reader(&self.settings, transport, reader, relay);
        Ok(())
    }

    /// Close the socket and stop the reader
    ///
    /// Consumers see the link go `Disconnected` if it was not already.
    pub async fn disconnect(&mut self) {
        match std::mem::replace(&mut self.reader, ReaderState::Lost) {
            ReaderState::Running { stop, task } => {
                // The task may already have ended on its own
                let _ = stop.send(());
                self.transport.shutdown().await;
                match task.await {
                    Ok(relay) => self.reader = ReaderState::Stopped(relay),
                    Err(e) => error!("Bridge reader task failed: {}", e),
                }
            }
            other => self.reader = other,
        }
    }
}

impl Drop for BarBridge {
    fn drop(&mut self) {
        if let ReaderState::Running { stop, .. } =
            std::mem::replace(&mut self.reader, ReaderState::Lost)
        {
            debug!("Bar bridge dropped, stopping reader");
            let _ = stop.send(());
        }
    }
}

fn spawn_reader(
    settings: &BarSettings,
    transport: Transport,
    reader: TransportReader,
    relay: SignalRelay,
) -> ReaderState {
    let (stop, stop_rx) = oneshot::channel();
    let dispatcher = Dispatcher::new(transport, relay, settings.clone());
    let task = tokio::spawn(run_reader(dispatcher, reader, stop_rx));
    ReaderState::Running { stop, task }
}

/// Reader task body; hands the relay back when the connection ends
///
/// Requests still waiting for a reply are failed before the terminal link
/// state is published.
async fn run_reader(
    mut dispatcher: Dispatcher,
    mut reader: TransportReader,
    mut stop: oneshot::Receiver<()>,
) -> SignalRelay {
    let outcome = match dispatcher.start().await {
        Ok(()) => read_loop(&mut dispatcher, &mut reader, &mut stop).await,
        Err(e) => Err(e),
    };

    let state = match outcome {
        Ok(()) => {
            info!("Bar bridge closed");
            LinkState::Disconnected(CLOSED_BY_CONSUMER.to_string())
        }
        Err(e) => {
            error!("Bar bridge disconnected: {}", e);
            LinkState::Disconnected(e.to_string())
        }
    };
    reader.close();
    dispatcher.relay().set_link(state);
    dispatcher.into_relay()
}

/// `Ok` when stopped by the consumer, the fatal error otherwise
async fn read_loop(
    dispatcher: &mut Dispatcher,
    reader: &mut TransportReader,
    stop: &mut oneshot::Receiver<()>,
) -> Result<(), IpcError> {
    loop {
        let inbound = tokio::select! {
            _ = &mut *stop => return Ok(()),
            inbound = reader.next_inbound() => inbound?,
        };

        match dispatcher.handle(inbound).await {
            Ok(()) => {}
            Err(e) if e.is_fatal() || dispatcher.setup() == SetupState::Failed => {
                return Err(e)
            }
            Err(IpcError::State(e)) => trace!("{}", e),
            Err(e) => warn!("Dropping message: {}", e),
        }
    }
}
