//! Simulation Configuration
//!
//! Every numeric tunable lives here so gameplay feel can be adjusted without
//! code changes. Configs load from JSON (missing fields take defaults) and
//! can be overridden from the environment.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::core::time::Seconds;

/// Environment variable naming a JSON config file.
pub const CONFIG_PATH_ENV: &str = "AETHER_PHYSICS_CONFIG";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Path that failed
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config JSON was malformed
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// An environment override was not a number
    #[error("invalid value {value:?} for {var}")]
    InvalidOverride {
        /// Variable name
        var: &'static str,
        /// Raw value
        value: String,
    },

    /// A value is outside its allowed range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Thresholds beyond which physics state counts as accumulated/corrupted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulationLimits {
    /// Max magnitude of the persistent force vector
    pub max_accumulated_force: f32,
    /// Max body friction coefficient
    pub max_friction: f32,
    /// Max body restitution
    pub max_restitution: f32,
    /// Max simultaneous contact points
    pub max_contact_points: usize,
    /// Max velocity magnitude
    pub max_velocity: f32,
}

impl Default for AccumulationLimits {
    fn default() -> Self {
        Self {
            max_accumulated_force: 1000.0,
            max_friction: 0.5,
            max_restitution: 1.0,
            max_contact_points: 10,
            max_velocity: 2000.0,
        }
    }
}

/// Integration and clamping parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Fixed step length (seconds)
    pub fixed_dt: Seconds,
    /// Largest frame time the accumulator will catch up on
    pub max_frame_time: Seconds,
    /// Gravity acceleration along +Y (pixels/s²)
    pub gravity: f32,
    /// Hard cap on velocity magnitude
    pub max_velocity: f32,
    /// Cap on downward speed
    pub max_fall_speed: f32,
    /// Cap on acceleration magnitude
    pub max_acceleration: f32,
    /// Cap on walk speed
    pub max_walk_speed: f32,
    /// Cap on dash speed
    pub max_dash_speed: f32,
    /// Cap on a single impulse magnitude
    pub max_impulse: f32,
    /// Friction a body gets on registration and reset
    pub default_friction: f32,
    /// Restitution a body gets on registration and reset
    pub default_restitution: f32,
    /// Horizontal deceleration on a friction-1.0 surface when undriven (pixels/s²)
    pub ground_deceleration: f32,
    /// Fraction of horizontal airborne velocity lost per second
    pub air_drag: f32,
    /// Minimum impact speed for a bouncy surface to reflect velocity
    pub bounce_threshold: f32,
    /// Requests older than this are dropped as expired (seconds)
    pub request_max_age: Seconds,
    /// Accumulation detection thresholds
    pub accumulation: AccumulationLimits,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            fixed_dt: 1.0 / 60.0,
            max_frame_time: 0.25,
            gravity: 980.0,
            max_velocity: 1500.0,
            max_fall_speed: 1200.0,
            max_acceleration: 5000.0,
            max_walk_speed: 600.0,
            max_dash_speed: 1200.0,
            max_impulse: 1500.0,
            default_friction: 0.1,
            default_restitution: 0.0,
            ground_deceleration: 6000.0,
            air_drag: 0.5,
            bounce_threshold: 120.0,
            request_max_age: 0.1,
            accumulation: AccumulationLimits::default(),
        }
    }
}

/// Contact classification and grounded tracking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionConfig {
    /// Grace window after leaving ground during which a jump is allowed
    pub coyote_time: Seconds,
    /// Max angle between a contact normal and "up" for it to count as ground
    pub ground_angle_degrees: f32,
    /// Distance at which touching shapes still count as in contact
    pub contact_skin: f32,
    /// Penetration resolution passes per integration step
    pub max_resolution_iterations: usize,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            coyote_time: 0.15,
            ground_angle_degrees: 45.0,
            contact_skin: 0.5,
            max_resolution_iterations: 4,
        }
    }
}

/// Request validation, queueing and retry policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    /// Submissions per second per entity above which input counts as rapid
    pub rapid_input_threshold_hz: f32,
    /// Window the rapid-input rate is measured over (seconds)
    pub rapid_input_window: Seconds,
    /// Speed multiplier applied to each retry of a failed request
    pub fallback_speed_multiplier: f32,
    /// Retry attempts after the first failure
    pub max_retries: u32,
    /// Pending requests kept per entity before new ones are rejected
    pub max_queued_per_entity: usize,
    /// Walk speed the input handler requests at full stick deflection
    pub walk_speed: f32,
    /// Requests the input handler may submit per entity per tick
    pub max_requests_per_tick: usize,
    /// How long a jump press is remembered while a jump is not yet allowed
    pub jump_buffer_time: Seconds,
    /// Direction reversals within the rapid-input window that trigger a
    /// force clear before submission
    pub direction_reversal_limit: usize,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            rapid_input_threshold_hz: 20.0,
            rapid_input_window: 1.0,
            fallback_speed_multiplier: 0.75,
            max_retries: 2,
            max_queued_per_entity: 16,
            walk_speed: 200.0,
            max_requests_per_tick: 4,
            jump_buffer_time: 0.1,
            direction_reversal_limit: 6,
        }
    }
}

/// Character abilities: jump, dash, energy, respawn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterConfig {
    /// Full jump force (upward speed at max hold)
    pub jump_force: f32,
    /// Fraction of `jump_force` applied for a tap
    pub min_jump_ratio: f32,
    /// Hold duration that yields the full jump force
    pub max_jump_hold: Seconds,
    /// Dash speed
    pub dash_speed: f32,
    /// Time between dashes
    pub dash_cooldown: Seconds,
    /// How long a dash lasts
    pub dash_duration: Seconds,
    /// Energy spent per dash
    pub dash_energy_cost: f32,
    /// Energy pool size
    pub max_energy: f32,
    /// Energy regained per second
    pub energy_regen_per_second: f32,
}

impl Default for CharacterConfig {
    fn default() -> Self {
        Self {
            jump_force: 540.0,
            min_jump_ratio: 0.5,
            max_jump_hold: 0.2,
            dash_speed: 900.0,
            dash_cooldown: 0.5,
            dash_duration: 0.15,
            dash_energy_cost: 25.0,
            max_energy: 100.0,
            energy_regen_per_second: 20.0,
        }
    }
}

/// Complete simulation configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Integration parameters
    pub physics: PhysicsConfig,
    /// Collision parameters
    pub collision: CollisionConfig,
    /// Movement coordination parameters
    pub movement: MovementConfig,
    /// Character ability parameters
    pub character: CharacterConfig,
}

impl SimulationConfig {
    /// Parse from a JSON string. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json_str(&json)?;
        info!(path = %path.display(), "loaded simulation config");
        Ok(config)
    }

    /// Build from the environment.
    ///
    /// Starts from the file named by `AETHER_PHYSICS_CONFIG` (or defaults),
    /// then applies individual `AETHER_*` overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_json_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `AETHER_*` overrides from a variable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidOverride { var, value })
        }

        if let Some(v) = lookup("AETHER_GRAVITY") {
            self.physics.gravity = parse("AETHER_GRAVITY", v)?;
        }
        if let Some(v) = lookup("AETHER_JUMP_FORCE") {
            self.character.jump_force = parse("AETHER_JUMP_FORCE", v)?;
        }
        if let Some(v) = lookup("AETHER_COYOTE_TIME") {
            self.collision.coyote_time = parse("AETHER_COYOTE_TIME", v)?;
        }
        if let Some(v) = lookup("AETHER_REQUEST_MAX_AGE") {
            self.physics.request_max_age = parse("AETHER_REQUEST_MAX_AGE", v)?;
        }
        if let Some(v) = lookup("AETHER_DASH_COOLDOWN") {
            self.character.dash_cooldown = parse("AETHER_DASH_COOLDOWN", v)?;
        }
        if let Some(v) = lookup("AETHER_RAPID_INPUT_HZ") {
            self.movement.rapid_input_threshold_hz = parse("AETHER_RAPID_INPUT_HZ", v)?;
        }
        debug!("applied environment overrides");
        Ok(())
    }

    /// Check ranges and cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.physics;
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if !(p.fixed_dt.is_finite() && p.fixed_dt > 0.0) {
            return invalid(format!("fixed_dt must be positive, got {}", p.fixed_dt));
        }
        if p.max_frame_time < p.fixed_dt {
            return invalid("max_frame_time must be at least fixed_dt".into());
        }
        let positive = [
            ("gravity", p.gravity),
            ("max_velocity", p.max_velocity),
            ("max_fall_speed", p.max_fall_speed),
            ("max_acceleration", p.max_acceleration),
            ("max_walk_speed", p.max_walk_speed),
            ("max_dash_speed", p.max_dash_speed),
            ("max_impulse", p.max_impulse),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value >= 0.0) {
                return invalid(format!("{name} must be finite and non-negative, got {value}"));
            }
        }
        if p.max_velocity > p.accumulation.max_velocity {
            return invalid(format!(
                "max_velocity {} exceeds the accumulation threshold {}",
                p.max_velocity, p.accumulation.max_velocity
            ));
        }
        if p.default_friction < 0.0 || p.default_friction > p.accumulation.max_friction {
            return invalid(format!("default_friction {} out of range", p.default_friction));
        }
        if p.default_restitution < 0.0 || p.default_restitution > p.accumulation.max_restitution {
            return invalid(format!("default_restitution {} out of range", p.default_restitution));
        }
        if !(p.request_max_age > 0.0) {
            return invalid("request_max_age must be positive".into());
        }

        let c = &self.collision;
        if !(c.coyote_time >= 0.0) {
            return invalid("coyote_time must be non-negative".into());
        }
        if !(c.ground_angle_degrees > 0.0 && c.ground_angle_degrees < 90.0) {
            return invalid("ground_angle_degrees must be in (0, 90)".into());
        }

        let m = &self.movement;
        if !(m.fallback_speed_multiplier > 0.0 && m.fallback_speed_multiplier <= 1.0) {
            return invalid("fallback_speed_multiplier must be in (0, 1]".into());
        }
        if !(m.rapid_input_threshold_hz > 0.0) || !(m.rapid_input_window > 0.0) {
            return invalid("rapid input threshold and window must be positive".into());
        }

        let ch = &self.character;
        if !(ch.jump_force > 0.0) {
            return invalid("jump_force must be positive".into());
        }
        if !(ch.min_jump_ratio > 0.0 && ch.min_jump_ratio <= 1.0) {
            return invalid("min_jump_ratio must be in (0, 1]".into());
        }
        if ch.dash_energy_cost > ch.max_energy {
            return invalid("dash_energy_cost exceeds max_energy".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        SimulationConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SimulationConfig::from_json_str(
            r#"{ "physics": { "gravity": 1200.0 }, "character": { "jump_force": 720.0 } }"#,
        )
        .unwrap();
        assert_eq!(config.physics.gravity, 1200.0);
        assert_eq!(config.character.jump_force, 720.0);
        assert_eq!(config.collision.coyote_time, 0.15);
        assert_eq!(config.physics.request_max_age, 0.1);
    }

    #[test]
    fn test_rejects_velocity_above_accumulation_threshold() {
        let err = SimulationConfig::from_json_str(r#"{ "physics": { "max_velocity": 5000.0 } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_malformed_json() {
        let err = SimulationConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_overrides() {
        let mut config = SimulationConfig::default();
        config
            .apply_overrides(|var| match var {
                "AETHER_JUMP_FORCE" => Some("720".into()),
                "AETHER_COYOTE_TIME" => Some(" 0.2 ".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.character.jump_force, 720.0);
        assert_eq!(config.collision.coyote_time, 0.2);

        let err = config
            .apply_overrides(|var| (var == "AETHER_GRAVITY").then(|| "heavy".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOverride { var: "AETHER_GRAVITY", .. }));
    }
}
