use std::time::Instant;

use crate::config::BrightnessRange;
use crate::config::ColorTempRange;
use crate::engine::ColorSetting;
use crate::engine::LightCommand;
use crate::engine::LightState;

/// Command verb an action carries.
///
/// The controller only produces `TurnOn` (lights that are off are left
/// alone), but the queue scores both power directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Command {
    TurnOn,
    TurnOff,
}

impl Command {
    pub fn targets_on(self) -> bool {
        matches!(self, Command::TurnOn)
    }
}

/// A desired state change for one light.
///
/// Immutable once created; a newer target for the same light is expressed
/// by creating a new Action, which supersedes this one at selection time.
#[derive(Debug, Clone)]
pub struct Action {
    entity_id: String,

    /// Wire representation of the color target
    color: ColorSetting,

    /// Color temperature basis (mireds) the wire value was derived from;
    /// all convergence and priority comparisons use this against the
    /// light's reported color temperature
    color_temp: u16,

    /// Brightness target (0-255); absent means "do not adjust brightness"
    brightness: Option<u8>,

    /// Transition duration hint in seconds
    transition: f64,

    command: Command,

    created_at: Instant,
}

impl Action {
    pub fn new(
        entity_id: impl Into<String>,
        color: ColorSetting,
        color_temp: u16,
        brightness: Option<u8>,
        transition: f64,
        command: Command,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            color,
            color_temp,
            brightness,
            transition,
            command,
            created_at: Instant::now(),
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn color(&self) -> ColorSetting {
        self.color
    }

    pub fn color_temp(&self) -> u16 {
        self.color_temp
    }

    pub fn brightness(&self) -> Option<u8> {
        self.brightness
    }

    pub fn transition(&self) -> f64 {
        self.transition
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn targets_on(&self) -> bool {
        self.command.targets_on()
    }

    /// Absolute difference between the color target and the light's
    /// reported color temperature, in mireds.
    ///
    /// `None` if the light has not reported a color temperature; callers
    /// treat an unreported value as divergent.
    pub fn color_difference(&self, state: &LightState) -> Option<f64> {
        state
            .color_temp
            .map(|current| (f64::from(self.color_temp) - f64::from(current)).abs())
    }

    /// Color difference divided by the configured range width, for
    /// cross-entity priority comparison. Unreported state maps to 1.0.
    /// Conceptually in [0, 1] but not clamped.
    pub fn color_difference_normalized(&self, state: &LightState, range: &ColorTempRange) -> f64 {
        match self.color_difference(state) {
            Some(diff) => diff / range.span(),
            None => 1.0,
        }
    }

    /// Absolute difference between the brightness target and the light's
    /// reported level, on the 0-255 scale.
    ///
    /// `None` if this action does not adjust brightness, or if the light
    /// has not reported a level.
    pub fn brightness_difference(&self, state: &LightState) -> Option<f64> {
        let target = self.brightness?;
        let current = state.brightness?;
        Some((f64::from(target) - f64::from(current)).abs())
    }

    /// Brightness difference divided by the configured range width.
    /// An action without a brightness target contributes 0.0; a target
    /// against an unreported level maps to 1.0.
    pub fn brightness_difference_normalized(
        &self,
        state: &LightState,
        range: &BrightnessRange,
    ) -> f64 {
        if self.brightness.is_none() {
            return 0.0;
        }
        match self.brightness_difference(state) {
            Some(diff) => diff / range.span(),
            None => 1.0,
        }
    }

    /// Whether the light's power state already equals this action's intent.
    pub fn matches_state(&self, state: &LightState) -> bool {
        state.on == self.targets_on()
    }

    pub fn differs_from_state(&self, state: &LightState) -> bool {
        !self.matches_state(state)
    }

    /// Build the outgoing wire command for this action.
    pub fn to_command(&self) -> LightCommand {
        LightCommand {
            entity_id: self.entity_id.clone(),
            on: self.targets_on(),
            brightness: self.brightness,
            color: Some(self.color),
            transition: Some(self.transition),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(on: bool, brightness: Option<u8>, color_temp: Option<u16>) -> LightState {
        LightState {
            on,
            brightness,
            color_temp,
        }
    }

    fn action(color_temp: u16, brightness: Option<u8>) -> Action {
        Action::new(
            "light.test",
            ColorSetting::ColorTemp(color_temp),
            color_temp,
            brightness,
            60.0,
            Command::TurnOn,
        )
    }

    #[test]
    fn test_color_difference() {
        let action = action(300, None);
        assert_eq!(action.color_difference(&state(true, None, Some(305))), Some(5.0));
        assert_eq!(action.color_difference(&state(true, None, Some(300))), Some(0.0));
        assert_eq!(action.color_difference(&state(true, None, None)), None);
    }

    #[test]
    fn test_color_difference_normalized() {
        let range = ColorTempRange { min: 153, max: 500 };
        let action = action(300, None);

        let diff = action.color_difference_normalized(&state(true, None, Some(400)), &range);
        assert!((diff - 100.0 / 347.0).abs() < 1e-9);

        // Unreported color temperature is maximally divergent
        let diff = action.color_difference_normalized(&state(true, None, None), &range);
        assert_eq!(diff, 1.0);
    }

    #[test]
    fn test_brightness_difference() {
        let action = action(300, Some(200));
        assert_eq!(
            action.brightness_difference(&state(true, Some(195), None)),
            Some(5.0)
        );
        assert_eq!(action.brightness_difference(&state(true, None, None)), None);

        // No target means no difference to speak of
        let no_target = action_without_brightness();
        assert_eq!(
            no_target.brightness_difference(&state(true, Some(10), None)),
            None
        );
    }

    fn action_without_brightness() -> Action {
        action(300, None)
    }

    #[test]
    fn test_brightness_difference_normalized() {
        let range = BrightnessRange { min: 1, max: 254 };

        let no_target = action_without_brightness();
        assert_eq!(
            no_target.brightness_difference_normalized(&state(true, Some(10), None), &range),
            0.0
        );

        let with_target = action(300, Some(200));
        assert_eq!(
            with_target.brightness_difference_normalized(&state(true, None, None), &range),
            1.0
        );
        let diff =
            with_target.brightness_difference_normalized(&state(true, Some(100), None), &range);
        assert!((diff - 100.0 / 253.0).abs() < 1e-9);
    }

    #[test]
    fn test_power_state_matching() {
        let action = action(300, None);
        assert!(action.matches_state(&state(true, None, None)));
        assert!(action.differs_from_state(&state(false, None, None)));
    }

    #[test]
    fn test_to_command_carries_all_fields() {
        let action = Action::new(
            "light.kitchen",
            ColorSetting::Rgb(255, 160, 60),
            350,
            Some(128),
            1.5,
            Command::TurnOn,
        );

        let command = action.to_command();
        assert_eq!(command.entity_id, "light.kitchen");
        assert!(command.on);
        assert_eq!(command.brightness, Some(128));
        assert_eq!(command.color, Some(ColorSetting::Rgb(255, 160, 60)));
        assert_eq!(command.transition, Some(1.5));
    }

    #[test]
    fn test_command_display() {
        assert_eq!(Command::TurnOn.to_string(), "turn_on");
        assert_eq!(Command::TurnOff.to_string(), "turn_off");
    }
}
