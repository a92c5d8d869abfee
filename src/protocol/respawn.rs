//! Respawn / Teleport Descriptors

use std::fmt;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::core::time::Seconds;

/// Longest invulnerability a respawn may grant.
pub const MAX_INVULNERABILITY: Seconds = 10.0;

/// Why the entity is being placed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RespawnTag {
    /// Death or level start
    #[default]
    Spawning,
    /// Door, portal or checkpoint warp
    Teleporting,
    /// Recovery from corrupted state
    EmergencyReset,
}

impl fmt::Display for RespawnTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Spawning => "spawning",
            Self::Teleporting => "teleporting",
            Self::EmergencyReset => "emergency_reset",
        };
        f.write_str(name)
    }
}

fn default_true() -> bool {
    true
}

/// Everything needed to (re)place an entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RespawnState {
    /// Target position
    pub position: Vec2,
    /// Target velocity (usually zero)
    #[serde(default)]
    pub velocity: Vec2,
    /// Clear forces/contacts/materials; always on unless explicitly disabled
    #[serde(default = "default_true")]
    pub reset_accumulation: bool,
    /// Drop buffered and recorded input
    #[serde(default)]
    pub clear_history: bool,
    /// Restore energy and cooldowns
    #[serde(default)]
    pub reset_abilities: bool,
    /// Invulnerability granted (0 to 10 s)
    #[serde(default)]
    invulnerability: Seconds,
    /// Reason for the placement
    #[serde(default)]
    pub tag: RespawnTag,
}

impl RespawnState {
    /// Regular spawn at `position`: full reset, history and abilities cleared.
    pub fn spawning(position: Vec2) -> Self {
        Self {
            position,
            velocity: Vec2::ZERO,
            reset_accumulation: true,
            clear_history: true,
            reset_abilities: true,
            invulnerability: 0.0,
            tag: RespawnTag::Spawning,
        }
    }

    /// Teleport keeping abilities and input history.
    pub fn teleporting(position: Vec2) -> Self {
        Self {
            clear_history: false,
            reset_abilities: false,
            tag: RespawnTag::Teleporting,
            ..Self::spawning(position)
        }
    }

    /// Recovery placement after corruption was detected.
    pub fn emergency_reset(position: Vec2) -> Self {
        Self {
            tag: RespawnTag::EmergencyReset,
            reset_abilities: false,
            ..Self::spawning(position)
        }
    }

    /// Copy with a launch velocity.
    pub fn with_velocity(mut self, velocity: Vec2) -> Self {
        self.velocity = velocity;
        self
    }

    /// Copy granting invulnerability, clamped to `[0, MAX_INVULNERABILITY]`.
    pub fn with_invulnerability(mut self, seconds: Seconds) -> Self {
        self.invulnerability = clamp_invulnerability(seconds);
        self
    }

    /// Granted invulnerability (always within range, even after deserializing).
    #[inline]
    pub fn invulnerability(&self) -> Seconds {
        clamp_invulnerability(self.invulnerability)
    }

    /// Position and velocity are usable.
    pub fn is_valid(&self) -> bool {
        self.position.is_finite() && self.velocity.is_finite()
    }
}

fn clamp_invulnerability(seconds: Seconds) -> Seconds {
    if seconds.is_finite() {
        seconds.clamp(0.0, MAX_INVULNERABILITY)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variants() {
        let spawn = RespawnState::spawning(Vec2::ZERO);
        assert!(spawn.reset_accumulation && spawn.clear_history && spawn.reset_abilities);

        let tp = RespawnState::teleporting(Vec2::new(5.0, 5.0));
        assert!(tp.reset_accumulation);
        assert!(!tp.clear_history);
        assert_eq!(tp.tag, RespawnTag::Teleporting);

        assert_eq!(RespawnState::emergency_reset(Vec2::ZERO).tag, RespawnTag::EmergencyReset);
    }

    #[test]
    fn test_invulnerability_clamped() {
        let s = RespawnState::spawning(Vec2::ZERO).with_invulnerability(25.0);
        assert_eq!(s.invulnerability(), MAX_INVULNERABILITY);
        let s = RespawnState::spawning(Vec2::ZERO).with_invulnerability(-1.0);
        assert_eq!(s.invulnerability(), 0.0);
        let s = RespawnState::spawning(Vec2::ZERO).with_invulnerability(f64::NAN);
        assert_eq!(s.invulnerability(), 0.0);
    }

    #[test]
    fn test_deserialize_defaults_reset_on() {
        let s: RespawnState = serde_json::from_str(r#"{ "position": [3.0, 4.0] }"#).unwrap();
        assert!(s.reset_accumulation);
        assert!(!s.clear_history);
        assert_eq!(s.position, Vec2::new(3.0, 4.0));
        assert_eq!(s.tag, RespawnTag::Spawning);
    }
}
