//! Hand-off of bar signals from the reader task to consumers
//!
//! Each signal is a `tokio::sync::watch` channel: publishing never blocks,
//! a burst of updates coalesces to the latest value, and a consumer that
//! looks after the burst still sees that something changed. Signals are
//! independent channels, so there is no ordering between different kinds;
//! within one kind the last value published is the one observed.

use tokio::sync::watch;
use tracing::trace;

use crate::bar_state::Signal;
use crate::sway_ipc::BarConfig;

/// Connection status of the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// Handshake in progress
    Connecting,
    /// Subscribed and receiving events
    Ready,
    /// The connection ended; carries the reason
    Disconnected(String),
}

impl LinkState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LinkState::Disconnected(_))
    }
}

/// Publishing side, owned by the reader task
#[derive(Debug)]
pub struct SignalRelay {
    mode: watch::Sender<bool>,
    visible: watch::Sender<bool>,
    urgency: watch::Sender<bool>,
    config: watch::Sender<Option<BarConfig>>,
    link: watch::Sender<LinkState>,
}

/// Consuming side; clone freely, one per consumer
#[derive(Debug, Clone)]
pub struct BarSignals {
    pub mode: watch::Receiver<bool>,
    pub visible: watch::Receiver<bool>,
    pub urgency: watch::Receiver<bool>,
    pub config: watch::Receiver<Option<BarConfig>>,
    pub link: watch::Receiver<LinkState>,
}

impl SignalRelay {
    pub fn new() -> (Self, BarSignals) {
        let (mode, mode_rx) = watch::channel(false);
        let (visible, visible_rx) = watch::channel(false);
        let (urgency, urgency_rx) = watch::channel(false);
        let (config, config_rx) = watch::channel(None);
        let (link, link_rx) = watch::channel(LinkState::Connecting);

        let relay = Self {
            mode,
            visible,
            urgency,
            config,
            link,
        };
        let signals = BarSignals {
            mode: mode_rx,
            visible: visible_rx,
            urgency: urgency_rx,
            config: config_rx,
            link: link_rx,
        };

        (relay, signals)
    }

    /// Publish one signal
    ///
    /// `send_replace` stores the value even when nobody is subscribed and
    /// marks it changed for every receiver, including repeats of the same
    /// value.
    pub fn publish(&self, signal: Signal) {
        trace!(?signal, "Publishing");
        match signal {
            Signal::Mode(value) => {
                self.mode.send_replace(value);
            }
            Signal::Visible(value) => {
                self.visible.send_replace(value);
            }
            Signal::Urgency(value) => {
                self.urgency.send_replace(value);
            }
            Signal::Config(config) => {
                self.config.send_replace(Some(config));
            }
        }
    }

    pub fn publish_all(&self, signals: impl IntoIterator<Item = Signal>) {
        for signal in signals {
            self.publish(signal);
        }
    }

    /// Update the link state; a disconnect is only ever reported once
    pub fn set_link(&self, state: LinkState) {
        self.link.send_if_modified(|current| {
            if current.is_terminal() || *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    /// Back to the initial values for a fresh connection
    ///
    /// The config is cleared too; the new connection publishes its own.
    pub fn reset(&self) {
        self.mode.send_replace(false);
        self.visible.send_replace(false);
        self.urgency.send_replace(false);
        self.config.send_replace(None);
        self.link.send_replace(LinkState::Connecting);
    }

    pub fn link(&self) -> LinkState {
        self.link.borrow().clone()
    }

    /// Latest published config
    pub fn config(&self) -> Option<BarConfig> {
        self.config.borrow().clone()
    }

    /// New consumer handles, seeing the current values as already read
    pub fn subscribe(&self) -> BarSignals {
        BarSignals {
            mode: self.mode.subscribe(),
            visible: self.visible.subscribe(),
            urgency: self.urgency.subscribe(),
            config: self.config.subscribe(),
            link: self.link.subscribe(),
        }
    }
}

impl BarSignals {
    /// Latest visibility if it changed since the last poll
    pub fn poll_visible(&mut self) -> Option<bool> {
        poll(&mut self.visible)
    }

    pub fn poll_mode(&mut self) -> Option<bool> {
        poll(&mut self.mode)
    }

    pub fn poll_urgency(&mut self) -> Option<bool> {
        poll(&mut self.urgency)
    }

    pub fn poll_config(&mut self) -> Option<BarConfig> {
        poll(&mut self.config).flatten()
    }

    pub fn poll_link(&mut self) -> Option<LinkState> {
        poll(&mut self.link)
    }

    /// Wait until the link is ready or gone, returning the state reached
    pub async fn wait_ready(&mut self) -> LinkState {
        match self
            .link
            .wait_for(|state| *state == LinkState::Ready || state.is_terminal())
            .await
        {
            Ok(state) => state.clone(),
            Err(_) => LinkState::Disconnected("bridge dropped".to_string()),
        }
    }
}

// Works after the sender is gone too, so the final link state is not lost
fn poll<T: Clone>(rx: &mut watch::Receiver<T>) -> Option<T> {
    let value = rx.borrow_and_update();
    value.has_changed().then(|| value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_consumers_does_not_block() {
        let (relay, signals) = SignalRelay::new();
        drop(signals);

        for i in 0..1000 {
            relay.publish(Signal::Visible(i % 2 == 0));
        }

        assert!(!*relay.subscribe().visible.borrow());
    }

    #[test]
    fn test_burst_coalesces_to_last_value() {
        let (relay, mut signals) = SignalRelay::new();

        for i in 0..100 {
            relay.publish(Signal::Urgency(i % 2 == 1));
        }

        assert_eq!(signals.poll_urgency(), Some(true));
        assert_eq!(signals.poll_urgency(), None, "nothing new since last poll");
    }

    #[test]
    fn test_repeated_value_still_marks_changed() {
        let (relay, mut signals) = SignalRelay::new();

        relay.publish(Signal::Mode(false));
        assert_eq!(signals.poll_mode(), Some(false));
    }

    #[test]
    fn test_signals_are_independent() {
        let (relay, mut signals) = SignalRelay::new();

        relay.publish_all([Signal::Urgency(true), Signal::Visible(true)]);

        assert_eq!(signals.poll_mode(), None);
        assert_eq!(signals.poll_urgency(), Some(true));
        assert_eq!(signals.poll_visible(), Some(true));
        assert_eq!(signals.poll_config(), None);
    }

    #[test]
    fn test_config_signal() {
        let (relay, mut signals) = SignalRelay::new();

        relay.publish(Signal::Config(BarConfig::for_id("bar-0")));

        assert_eq!(signals.poll_config(), Some(BarConfig::for_id("bar-0")));
        assert_eq!(relay.config(), Some(BarConfig::for_id("bar-0")));
    }

    #[test]
    fn test_disconnect_is_reported_once() {
        let (relay, mut signals) = SignalRelay::new();

        relay.set_link(LinkState::Ready);
        assert_eq!(signals.poll_link(), Some(LinkState::Ready));

        relay.set_link(LinkState::Disconnected("closed".into()));
        relay.set_link(LinkState::Disconnected("again".into()));
        relay.set_link(LinkState::Ready);

        assert_eq!(
            signals.poll_link(),
            Some(LinkState::Disconnected("closed".into()))
        );
        assert_eq!(signals.poll_link(), None);
    }

    #[test]
    fn test_final_state_survives_dropped_relay() {
        let (relay, mut signals) = SignalRelay::new();

        relay.set_link(LinkState::Disconnected("eof".into()));
        drop(relay);

        assert_eq!(
            signals.poll_link(),
            Some(LinkState::Disconnected("eof".into()))
        );
    }

    #[test]
    fn test_reset_reopens_link() {
        let (relay, mut signals) = SignalRelay::new();
        relay.publish(Signal::Urgency(true));
        relay.publish(Signal::Config(BarConfig::for_id("bar-0")));
        relay.set_link(LinkState::Disconnected("eof".into()));
        signals.poll_urgency();
        signals.poll_link();

        relay.reset();

        assert_eq!(signals.poll_urgency(), Some(false));
        assert_eq!(relay.config(), None);
        assert!(signals.config.borrow().is_none());
        assert_eq!(signals.poll_link(), Some(LinkState::Connecting));
        relay.set_link(LinkState::Ready);
        assert_eq!(signals.poll_link(), Some(LinkState::Ready));
    }

    #[tokio::test]
    async fn test_wait_ready() {
        let (relay, mut signals) = SignalRelay::new();

        let waiter = tokio::spawn(async move { signals.wait_ready().await });
        relay.set_link(LinkState::Ready);

        assert_eq!(waiter.await.unwrap(), LinkState::Ready);
    }

    #[tokio::test]
    async fn test_consumer_on_other_task_sees_latest() {
        let (relay, mut signals) = SignalRelay::new();

        let consumer = tokio::spawn(async move {
            signals.visible.changed().await.unwrap();
            *signals.visible.borrow_and_update()
        });

        relay.publish(Signal::Visible(true));
        assert!(consumer.await.unwrap());
    }
}
