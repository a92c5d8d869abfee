//! Identifiers
//!
//! Entity ids are assigned by the world/level loader. Negative ids are
//! reserved sentinels standing in for static geometry in collision pairs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Entity identifier.
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub i64);

impl EntityId {
    /// Sentinel for ground geometry.
    pub const GROUND: Self = Self(-1);
    /// Sentinel for wall geometry.
    pub const WALL: Self = Self(-2);
    /// Sentinel for ceiling geometry.
    pub const CEILING: Self = Self(-3);
    /// Sentinel for platforms (one-way or moving).
    pub const PLATFORM: Self = Self(-4);
    /// Sentinel for sensor volumes (pickups, triggers, damage zones).
    pub const SENSOR: Self = Self(-5);

    /// Create an entity id.
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// True for the reserved static-geometry ids.
    #[inline]
    pub const fn is_sentinel(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::GROUND => f.write_str("ground"),
            Self::WALL => f.write_str("wall"),
            Self::CEILING => f.write_str("ceiling"),
            Self::PLATFORM => f.write_str("platform"),
            Self::SENSOR => f.write_str("sensor"),
            Self(raw) => write!(f, "#{raw}"),
        }
    }
}

/// Identifier of a static collider in the level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColliderId(pub u32);

impl fmt::Display for ColliderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "collider:{}", self.0)
    }
}

/// Identifier correlating a request with its response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels() {
        assert!(EntityId::GROUND.is_sentinel());
        assert!(EntityId::SENSOR.is_sentinel());
        assert!(!EntityId::new(0).is_sentinel());
        assert_eq!(EntityId::WALL.to_string(), "wall");
        assert_eq!(EntityId::new(7).to_string(), "#7");
    }

    #[test]
    fn test_entity_id_ordering() {
        let mut ids = vec![EntityId(5), EntityId(1), EntityId(3)];
        ids.sort();
        assert_eq!(ids, vec![EntityId(1), EntityId(3), EntityId(5)]);
    }
}
