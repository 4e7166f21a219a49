//! Two-threshold relay control.
//!
//! ```text
//!            temp >= temp_on
//!   ┌─────┐ ─────────────────► ┌────┐
//!   │ OFF │                    │ ON │
//!   └─────┘ ◄───────────────── └────┘
//!            temp <= temp_off
//! ```
//!
//! Readings strictly between the thresholds never change the state. Deciding and
//! committing are separate steps: [`HysteresisController::decide`] only looks at the
//! state, the caller commits the command once it has actually been published.

use serde::{Deserialize, Serialize};

use super::error::ManagerError;

/// Live on/off view of one relay. Starts OFF on every process start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayControlState {
    pub relay_id: String,
    pub on: bool,
}

impl RelayControlState {
    pub fn new(relay_id: impl Into<String>) -> Self {
        Self {
            relay_id: relay_id.into(),
            on: false,
        }
    }

    /// Records a command this process has issued.
    pub fn commit(&mut self, command: &RelayCommand) {
        self.on = command.on;
    }

    /// Takes the actuator's reported state as authoritative.
    ///
    /// Returns whether the local view changed. Never yields a command.
    pub fn apply_echo(&mut self, on: bool) -> bool {
        let changed = self.on != on;
        self.on = on;
        changed
    }
}

/// Command payload for the relay's `set` topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayCommand {
    pub relay_id: String,
    pub on: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HysteresisController {
    temp_on: f64,
    temp_off: f64,
}

impl HysteresisController {
    pub fn new(temp_on: f64, temp_off: f64) -> Result<Self, ManagerError> {
        if !temp_on.is_finite() || !temp_off.is_finite() || temp_off >= temp_on {
            return Err(ManagerError::InvalidThresholds {
                on: temp_on,
                off: temp_off,
            });
        }
        Ok(Self { temp_on, temp_off })
    }

    pub fn temp_on(&self) -> f64 {
        self.temp_on
    }

    pub fn temp_off(&self) -> f64 {
        self.temp_off
    }

    /// Level check used for alerting: true for every reading at or above `temp_on`.
    pub fn is_high(&self, temperature: f64) -> bool {
        temperature >= self.temp_on
    }

    /// Returns the command to issue for this reading, or `None` if the state holds.
    pub fn decide(&self, state: &RelayControlState, temperature: f64) -> Option<RelayCommand> {
        let switch_to = if !state.on && temperature >= self.temp_on {
            true
        } else if state.on && temperature <= self.temp_off {
            false
        } else {
            return None;
        };

        Some(RelayCommand {
            relay_id: state.relay_id.clone(),
            on: switch_to,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> HysteresisController {
        HysteresisController::new(30.0, 29.0).unwrap()
    }

    /// Feeds temperatures through decide+commit, returning the commands issued.
    fn run(temps: &[f64], state: &mut RelayControlState) -> Vec<bool> {
        let ctrl = controller();
        let mut commands = Vec::new();
        for &t in temps {
            if let Some(cmd) = ctrl.decide(state, t) {
                state.commit(&cmd);
                commands.push(cmd.on);
            }
        }
        commands
    }

    #[test]
    fn rejects_inverted_or_equal_thresholds() {
        assert!(HysteresisController::new(29.0, 30.0).is_err());
        assert!(HysteresisController::new(30.0, 30.0).is_err());
        assert!(HysteresisController::new(f64::NAN, 29.0).is_err());
    }

    #[test]
    fn switches_on_at_upper_threshold() {
        let state = RelayControlState::new("relay1");
        let cmd = controller().decide(&state, 30.0).unwrap();
        assert_eq!(
            cmd,
            RelayCommand {
                relay_id: "relay1".to_string(),
                on: true
            }
        );
        assert!(controller().decide(&state, 29.99).is_none());
    }

    #[test]
    fn switches_off_at_lower_threshold() {
        let mut state = RelayControlState::new("relay1");
        state.on = true;
        assert!(controller().decide(&state, 29.01).is_none());
        assert!(!controller().decide(&state, 29.0).unwrap().on);
    }

    #[test]
    fn band_between_thresholds_holds_state() {
        let mut state = RelayControlState::new("relay1");
        assert!(run(&[29.5, 29.9, 29.1], &mut state).is_empty());
        assert!(!state.on);

        state.on = true;
        assert!(run(&[29.5, 29.9, 29.1, 35.0], &mut state).is_empty());
        assert!(state.on);
    }

    #[test]
    fn reference_sequence() {
        let mut state = RelayControlState::new("relay1");
        let commands = run(&[28.0, 30.0, 30.5, 29.5, 29.0, 28.5], &mut state);
        assert_eq!(commands, vec![true, false]);
        assert!(!state.on);
    }

    #[test]
    fn no_duplicate_commands_while_state_unchanged() {
        let mut state = RelayControlState::new("relay1");
        let commands = run(&[31.0, 32.0, 33.0, 28.0, 27.0, 26.0, 31.0], &mut state);
        assert_eq!(commands, vec![true, false, true]);
    }

    #[test]
    fn echo_overwrites_without_command() {
        let mut state = RelayControlState::new("relay1");
        assert!(state.apply_echo(true));
        assert!(state.on);
        assert!(!state.apply_echo(true));
        assert!(state.apply_echo(false));
        assert!(!state.on);
    }

    #[test]
    fn echo_resyncs_before_next_decision() {
        let mut state = RelayControlState::new("relay1");
        state.apply_echo(true);
        // already on: a hot reading must not re-issue ON
        assert!(controller().decide(&state, 31.0).is_none());
        assert!(!controller().decide(&state, 28.0).unwrap().on);
    }

    #[test]
    fn alert_level_is_inclusive() {
        let ctrl = controller();
        assert!(ctrl.is_high(30.0));
        assert!(ctrl.is_high(45.0));
        assert!(!ctrl.is_high(29.99));
    }
}
