//! Bar visibility state machine
//!
//! Three independent triggers can make a hidden bar visible: a non-default
//! binding mode, the bar modifier, and an urgent workspace. The bar config
//! pushed by sway can override all of them:
//!
//! | config                  | visible                                  |
//! |-------------------------|------------------------------------------|
//! | `mode == "invisible"`   | never                                    |
//! | `hidden_state == "show"`| always                                   |
//! | otherwise               | `by_mode \|\| by_modifier \|\| by_urgency` |
//!
//! Every handler returns the signals to publish. The machine itself does no
//! I/O, so it can be driven from the reader task and tested directly.

use tracing::{debug, info};
use wabar_config::{BarSettings, ModifierReset};

use crate::sway_ipc::{BarConfig, BindingInfo, StateError};

/// Binding mode sway reports when no mode is active
pub const DEFAULT_MODE: &str = "default";

/// Bar mode that hides the bar unconditionally
pub const MODE_INVISIBLE: &str = "invisible";

/// Hidden state that shows the bar unconditionally
pub const HIDDEN_STATE_SHOW: &str = "show";

/// Independent reasons for the bar to be shown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VisibilityTriggers {
    pub by_mode: bool,
    pub by_modifier: bool,
    pub by_urgency: bool,
}

impl VisibilityTriggers {
    pub fn any(&self) -> bool {
        self.by_mode || self.by_modifier || self.by_urgency
    }
}

/// One observable output of the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Mode(bool),
    Visible(bool),
    Urgency(bool),
    Config(BarConfig),
}

/// Visibility triggers plus the last-known-good bar config for one bar
#[derive(Debug, Clone)]
pub struct BarState {
    config: BarConfig,
    triggers: VisibilityTriggers,
    modifier_reset: ModifierReset,
    toggle_modifier: Option<String>,
    /// Set while the modifier is down and nothing else has happened yet
    modifier_no_action: bool,
}

impl BarState {
    pub fn new(settings: &BarSettings) -> Self {
        Self {
            config: BarConfig::for_id(settings.id.clone().unwrap_or_default()),
            triggers: VisibilityTriggers::default(),
            modifier_reset: settings.modifier_reset,
            toggle_modifier: settings.toggle_modifier.clone(),
            modifier_no_action: false,
        }
    }

    /// Back to defaults, keeping the bar id (used on reconnect)
    pub fn reset(&mut self) {
        self.config = BarConfig::for_id(std::mem::take(&mut self.config.id));
        self.triggers = VisibilityTriggers::default();
        self.modifier_no_action = false;
    }

    pub fn config(&self) -> &BarConfig {
        &self.config
    }

    pub fn triggers(&self) -> VisibilityTriggers {
        self.triggers
    }

    /// Bar id, or `None` until one is configured or discovered
    pub fn bar_id(&self) -> Option<&str> {
        Some(self.config.id.as_str()).filter(|id| !id.is_empty())
    }

    /// Pin the bar id discovered during the handshake
    pub fn set_bar_id(&mut self, id: &str) {
        self.config.id = id.to_string();
    }

    pub fn modifier_guard(&self) -> bool {
        self.modifier_no_action
    }

    /// Combined visibility, mode overrides first
    pub fn visible(&self) -> bool {
        if self.config.mode == MODE_INVISIBLE {
            false
        } else if self.config.hidden_state == HIDDEN_STATE_SHOW {
            true
        } else {
            self.triggers.any()
        }
    }

    /// Whether the bar config allows a module
    pub fn is_module_enabled(&self, name: &str) -> bool {
        self.config.is_module_enabled(name)
    }

    fn check_id(&self, event_id: &str) -> Result<(), StateError> {
        match self.bar_id() {
            Some(bar_id) if bar_id != event_id => Err(StateError::UnknownBar {
                event_id: event_id.to_string(),
                bar_id: bar_id.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Replace the stored config with one pushed by sway
    pub fn on_config_update(&mut self, config: BarConfig) -> Result<Vec<Signal>, StateError> {
        self.check_id(&config.id)?;

        info!(
            "Config update for {}: mode {}, hidden_state {}",
            config.id, config.mode, config.hidden_state
        );

        self.config = config;
        Ok(vec![
            Signal::Config(self.config.clone()),
            Signal::Visible(self.visible()),
        ])
    }

    /// Binding mode changed; anything but the default mode shows the bar
    pub fn on_mode(&mut self, change: &str) -> Vec<Signal> {
        self.triggers.by_mode = change != DEFAULT_MODE;
        self.modifier_no_action = false;
        debug!(mode = change, by_mode = self.triggers.by_mode, "Mode update");
        vec![
            Signal::Mode(self.triggers.by_mode),
            Signal::Visible(self.visible()),
        ]
    }

    /// Some workspace gained or lost urgency
    pub fn on_urgency(&mut self, urgent: bool) -> Vec<Signal> {
        self.triggers.by_urgency = urgent;
        debug!(urgent, "Urgency update");
        vec![Signal::Urgency(urgent), Signal::Visible(self.visible())]
    }

    /// Sway reports the bar modifier being held or released
    ///
    /// Releasing the modifier is the reset point: with `ModifierReset::Press`
    /// a press and release with nothing in between also drops the mode and
    /// urgency triggers, so tapping the modifier dismisses a bar that was
    /// shown for another reason.
    pub fn on_modifier_visibility(
        &mut self,
        id: &str,
        visible_by_modifier: bool,
    ) -> Result<Vec<Signal>, StateError> {
        self.check_id(id)?;

        debug!(visible_by_modifier, "Visibility update");
        self.triggers.by_modifier = visible_by_modifier;

        let mut signals = Vec::new();
        if visible_by_modifier {
            self.modifier_no_action = true;
        } else {
            if self.modifier_reset == ModifierReset::Press && self.modifier_no_action {
                self.triggers.by_mode = false;
                self.triggers.by_urgency = false;
                signals.push(Signal::Mode(false));
                signals.push(Signal::Urgency(false));
            }
            self.modifier_no_action = false;
        }

        signals.push(Signal::Visible(self.visible()));
        Ok(signals)
    }

    /// A key binding ran
    ///
    /// A bare press of the toggle modifier flips `by_modifier` once; key
    /// repeats are swallowed until the modifier is released. Any other
    /// binding counts as an action taken while the modifier was held.
    pub fn on_binding(&mut self, binding: &BindingInfo) -> Vec<Signal> {
        let is_toggle = self
            .toggle_modifier
            .as_deref()
            .is_some_and(|modifier| binding.is_bare_modifier(modifier));

        if !is_toggle {
            if self.modifier_reset == ModifierReset::Press {
                self.modifier_no_action = false;
            }
            return Vec::new();
        }

        if self.modifier_no_action {
            debug!("Ignoring repeated modifier press");
            return Vec::new();
        }

        self.triggers.by_modifier = !self.triggers.by_modifier;
        self.modifier_no_action = true;
        debug!(by_modifier = self.triggers.by_modifier, "Modifier toggle");
        vec![Signal::Visible(self.visible())]
    }

    /// A workspace event happened while the modifier may be held
    pub fn note_action(&mut self) {
        self.modifier_no_action = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hidden_bar() -> BarState {
        let mut state = BarState::new(&BarSettings {
            id: Some("bar-0".into()),
            ..BarSettings::default()
        });
        state
            .on_config_update(BarConfig {
                id: "bar-0".into(),
                mode: "hide".into(),
                hidden_state: "hide".into(),
                modules: None,
            })
            .unwrap();
        state
    }

    fn with_config(state: &mut BarState, mode: &str, hidden_state: &str) -> Vec<Signal> {
        state
            .on_config_update(BarConfig {
                id: "bar-0".into(),
                mode: mode.into(),
                hidden_state: hidden_state.into(),
                modules: None,
            })
            .unwrap()
    }

    fn toggle_settings(modifier_reset: ModifierReset) -> BarSettings {
        BarSettings {
            id: Some("bar-0".into()),
            modifier_reset,
            toggle_modifier: Some("Mod4".into()),
            ..BarSettings::default()
        }
    }

    fn bare(modifier: &str) -> BindingInfo {
        BindingInfo {
            event_state_mask: vec![modifier.into()],
            input_type: "keyboard".into(),
            ..BindingInfo::default()
        }
    }

    #[test]
    fn test_new_state_is_hidden_with_defaults() {
        let state = BarState::new(&BarSettings::default());

        assert_eq!(state.bar_id(), None);
        assert_eq!(state.triggers(), VisibilityTriggers::default());
        assert!(!state.visible());
    }

    #[test]
    fn test_mode_shows_then_default_hides() {
        let mut state = hidden_bar();

        let signals = state.on_mode("resize");
        assert_eq!(signals, vec![Signal::Mode(true), Signal::Visible(true)]);
        assert!(state.visible());

        let signals = state.on_mode(DEFAULT_MODE);
        assert_eq!(signals, vec![Signal::Mode(false), Signal::Visible(false)]);
        assert!(!state.visible());
    }

    #[test]
    fn test_mode_named_like_bar_mode_shows_bar() {
        let mut state = hidden_bar();

        state.on_mode("hide");
        assert!(state.triggers().by_mode);
        assert!(state.visible());
    }

    #[test]
    fn test_default_mode_keeps_other_triggers() {
        let mut state = hidden_bar();

        state.on_urgency(true);
        state.on_mode("resize");
        state.on_mode(DEFAULT_MODE);

        assert!(state.visible(), "urgency still holds the bar open");
    }

    #[test]
    fn test_hidden_state_show_forces_visible() {
        let mut state = hidden_bar();

        let signals = with_config(&mut state, "hide", "show");
        assert_eq!(signals.last(), Some(&Signal::Visible(true)));
        assert_eq!(state.triggers(), VisibilityTriggers::default());
        assert!(state.visible());
    }

    #[test]
    fn test_invisible_mode_forces_hidden() {
        let mut state = hidden_bar();
        state.on_mode("resize");
        state.on_urgency(true);

        let signals = with_config(&mut state, MODE_INVISIBLE, "show");
        assert_eq!(signals.last(), Some(&Signal::Visible(false)));
        assert!(state.triggers().any());
        assert!(!state.visible());
    }

    #[test]
    fn test_config_update_for_other_bar_is_ignored() {
        let mut state = hidden_bar();

        let err = state
            .on_config_update(BarConfig {
                id: "bar-1".into(),
                mode: "hide".into(),
                hidden_state: "show".into(),
                modules: None,
            })
            .unwrap_err();

        assert!(matches!(err, StateError::UnknownBar { .. }));
        assert_eq!(state.config().hidden_state, "hide");
        assert!(!state.visible());
    }

    #[test]
    fn test_config_update_replaces_fields() {
        let mut state = hidden_bar();

        let signals = with_config(&mut state, "dock", "hide");
        assert_eq!(
            signals[0],
            Signal::Config(BarConfig {
                id: "bar-0".into(),
                mode: "dock".into(),
                hidden_state: "hide".into(),
                modules: None,
            })
        );
        assert_eq!(state.config().mode, "dock");
    }

    #[test]
    fn test_urgency_trigger() {
        let mut state = hidden_bar();

        assert_eq!(
            state.on_urgency(true),
            vec![Signal::Urgency(true), Signal::Visible(true)]
        );
        assert_eq!(
            state.on_urgency(false),
            vec![Signal::Urgency(false), Signal::Visible(false)]
        );
    }

    #[test]
    fn test_modifier_held_and_released() {
        let mut state = hidden_bar();

        state.on_modifier_visibility("bar-0", true).unwrap();
        assert!(state.visible());
        assert!(state.modifier_guard());

        state.on_modifier_visibility("bar-0", false).unwrap();
        assert!(!state.visible());
        assert!(!state.modifier_guard());
    }

    #[test]
    fn test_modifier_tap_clears_other_triggers_on_press_reset() {
        let mut state = hidden_bar();
        state.on_mode("resize");
        state.on_urgency(true);

        state.on_modifier_visibility("bar-0", true).unwrap();
        let signals = state.on_modifier_visibility("bar-0", false).unwrap();

        assert_eq!(
            signals,
            vec![
                Signal::Mode(false),
                Signal::Urgency(false),
                Signal::Visible(false)
            ]
        );
        assert_eq!(state.triggers(), VisibilityTriggers::default());
    }

    #[test]
    fn test_action_while_modifier_held_keeps_triggers() {
        let mut state = hidden_bar();
        state.on_urgency(true);

        state.on_modifier_visibility("bar-0", true).unwrap();
        state.on_binding(&BindingInfo {
            command: "workspace 2".into(),
            symbol: Some("2".into()),
            event_state_mask: vec!["Mod4".into()],
            ..BindingInfo::default()
        });
        state.on_modifier_visibility("bar-0", false).unwrap();

        assert!(state.triggers().by_urgency);
        assert!(state.visible());
    }

    #[test]
    fn test_release_reset_keeps_triggers() {
        let mut state = BarState::new(&BarSettings {
            id: Some("bar-0".into()),
            modifier_reset: ModifierReset::Release,
            ..BarSettings::default()
        });
        with_config(&mut state, "hide", "hide");
        state.on_urgency(true);

        state.on_modifier_visibility("bar-0", true).unwrap();
        state.on_modifier_visibility("bar-0", false).unwrap();

        assert!(state.triggers().by_urgency);
    }

    #[test]
    fn test_modifier_visibility_for_other_bar() {
        let mut state = hidden_bar();

        assert!(state.on_modifier_visibility("bar-9", true).is_err());
        assert!(!state.triggers().by_modifier);
    }

    #[test]
    fn test_toggle_modifier_guards_key_repeat() {
        let mut state = BarState::new(&toggle_settings(ModifierReset::Press));
        with_config(&mut state, "hide", "hide");

        assert_eq!(state.on_binding(&bare("Mod4")), vec![Signal::Visible(true)]);
        // Key repeat of the same physical press
        assert!(state.on_binding(&bare("Mod4")).is_empty());
        assert!(state.on_binding(&bare("Mod4")).is_empty());
        assert!(state.triggers().by_modifier);

        // Release clears the guard, the next press toggles back
        state.on_modifier_visibility("bar-0", false).unwrap();
        assert_eq!(state.on_binding(&bare("Mod4")), vec![Signal::Visible(true)]);
        assert!(state.triggers().by_modifier);
        state.on_modifier_visibility("bar-0", false).unwrap();
        assert!(!state.visible());
    }

    #[test]
    fn test_other_modifier_does_not_toggle() {
        let mut state = BarState::new(&toggle_settings(ModifierReset::Release));
        with_config(&mut state, "hide", "hide");

        assert!(state.on_binding(&bare("Mod1")).is_empty());
        assert!(!state.triggers().by_modifier);
    }

    #[test]
    fn test_mode_and_workspace_actions_clear_guard() {
        let mut state = hidden_bar();

        state.on_modifier_visibility("bar-0", true).unwrap();
        state.on_mode("resize");
        assert!(!state.modifier_guard());

        state.on_modifier_visibility("bar-0", true).unwrap();
        state.note_action();
        assert!(!state.modifier_guard());
    }

    #[test]
    fn test_reset_keeps_id_only() {
        let mut state = hidden_bar();
        state.on_mode("resize");
        state.on_modifier_visibility("bar-0", true).unwrap();

        state.reset();

        assert_eq!(state.bar_id(), Some("bar-0"));
        assert_eq!(state.config(), &BarConfig::for_id("bar-0"));
        assert_eq!(state.triggers(), VisibilityTriggers::default());
        assert!(!state.modifier_guard());
    }

    #[test]
    fn test_set_bar_id_before_config() {
        let mut state = BarState::new(&BarSettings::default());
        state.set_bar_id("bar-3");

        assert_eq!(state.bar_id(), Some("bar-3"));
        assert!(state
            .on_config_update(BarConfig::for_id("bar-4"))
            .is_err());
    }
}
