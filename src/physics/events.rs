//! Physics Events
//!
//! Events generated during a step, queued and flushed to listeners after the
//! step completes so no listener ever runs while physics state is borrowed.

use serde::{Deserialize, Serialize};

use crate::protocol::contact::{CollisionInfo, GroundInfo, SurfaceDescriptor};
use crate::protocol::ids::EntityId;
use crate::protocol::respawn::RespawnTag;
use crate::protocol::state::AccumulationViolation;

/// Processing order within a tick. Lower value = delivered first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventPriority {
    /// Resets and corrections first, so listeners see the repaired state
    Correction = 0,
    /// Contact ended
    CollisionEnd = 1,
    /// Contact started
    CollisionStart = 2,
    /// Landing / leaving ground
    GroundState = 3,
    /// Ground material changed
    Surface = 4,
}

/// Event payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PhysicsEventData {
    /// A new contact appeared
    CollisionStarted(CollisionInfo),

    /// A contact disappeared (`active` is false)
    CollisionEnded(CollisionInfo),

    /// Grounded flag flipped
    GroundStateChanged(GroundInfo),

    /// Standing surface changed while grounded
    SurfaceChanged {
        /// Surface before the change
        previous: Option<SurfaceDescriptor>,
        /// Surface now stood on
        current: SurfaceDescriptor,
    },

    /// Accumulated state was corrected
    AccumulationCorrected {
        /// What was out of range
        violations: Vec<AccumulationViolation>,
    },

    /// Entity state was reset
    StateReset {
        /// Reset reason, when triggered by a respawn
        tag: Option<RespawnTag>,
    },
}

/// An event with timing and ordering data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PhysicsEvent {
    /// Tick the event occurred on
    pub tick: u64,
    /// Processing priority
    pub priority: EventPriority,
    /// Entity involved
    pub entity: EntityId,
    /// Event data
    pub data: PhysicsEventData,
}

impl PhysicsEvent {
    /// Contact started.
    pub fn collision_started(tick: u64, info: CollisionInfo) -> Self {
        Self {
            tick,
            priority: EventPriority::CollisionStart,
            entity: info.entity_a,
            data: PhysicsEventData::CollisionStarted(info),
        }
    }

    /// Contact ended.
    pub fn collision_ended(tick: u64, mut info: CollisionInfo) -> Self {
        info.active = false;
        Self {
            tick,
            priority: EventPriority::CollisionEnd,
            entity: info.entity_a,
            data: PhysicsEventData::CollisionEnded(info),
        }
    }

    /// Grounded flag flipped.
    pub fn ground_state_changed(tick: u64, ground: GroundInfo) -> Self {
        Self {
            tick,
            priority: EventPriority::GroundState,
            entity: ground.entity,
            data: PhysicsEventData::GroundStateChanged(ground),
        }
    }

    /// Standing surface changed.
    pub fn surface_changed(
        tick: u64,
        entity: EntityId,
        previous: Option<SurfaceDescriptor>,
        current: SurfaceDescriptor,
    ) -> Self {
        Self {
            tick,
            priority: EventPriority::Surface,
            entity,
            data: PhysicsEventData::SurfaceChanged { previous, current },
        }
    }

    /// Accumulation corrected.
    pub fn accumulation_corrected(
        tick: u64,
        entity: EntityId,
        violations: Vec<AccumulationViolation>,
    ) -> Self {
        Self {
            tick,
            priority: EventPriority::Correction,
            entity,
            data: PhysicsEventData::AccumulationCorrected { violations },
        }
    }

    /// State reset.
    pub fn state_reset(tick: u64, entity: EntityId, tag: Option<RespawnTag>) -> Self {
        Self {
            tick,
            priority: EventPriority::Correction,
            entity,
            data: PhysicsEventData::StateReset { tag },
        }
    }

    /// Landing event.
    pub fn is_landing(&self) -> bool {
        matches!(&self.data, PhysicsEventData::GroundStateChanged(g) if g.just_landed())
    }

    /// Take-off event.
    pub fn is_takeoff(&self) -> bool {
        matches!(&self.data, PhysicsEventData::GroundStateChanged(g) if g.just_left_ground())
    }
}

impl PartialEq for PhysicsEvent {
    fn eq(&self, other: &Self) -> bool {
        self.tick == other.tick && self.priority == other.priority && self.entity == other.entity
    }
}

impl Eq for PhysicsEvent {}

impl PartialOrd for PhysicsEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PhysicsEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Sort by: tick, then priority, then entity
        self.tick
            .cmp(&other.tick)
            .then(self.priority.cmp(&other.priority))
            .then(self.entity.cmp(&other.entity))
    }
}

/// Observer for collision notifications.
///
/// Listeners are invoked from the notifier's flush, after the step, in event
/// order. All methods default to no-ops.
pub trait CollisionListener: Send {
    /// A contact started.
    fn on_collision_start(&mut self, _info: &CollisionInfo) {}

    /// A contact ended.
    fn on_collision_end(&mut self, _info: &CollisionInfo) {}

    /// An entity landed or left the ground.
    fn on_ground_state_changed(&mut self, _ground: &GroundInfo) {}

    /// An entity's standing surface changed.
    fn on_surface_changed(
        &mut self,
        _entity: EntityId,
        _previous: Option<&SurfaceDescriptor>,
        _current: &SurfaceDescriptor,
    ) {
    }
}

/// Route one event to the matching listener callback.
pub fn dispatch(listener: &mut dyn CollisionListener, event: &PhysicsEvent) {
    match &event.data {
        PhysicsEventData::CollisionStarted(info) => listener.on_collision_start(info),
        PhysicsEventData::CollisionEnded(info) => listener.on_collision_end(info),
        PhysicsEventData::GroundStateChanged(ground) => listener.on_ground_state_changed(ground),
        PhysicsEventData::SurfaceChanged { previous, current } => {
            listener.on_surface_changed(event.entity, previous.as_ref(), current)
        }
        PhysicsEventData::AccumulationCorrected { .. } | PhysicsEventData::StateReset { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_ordering() {
        let reset = PhysicsEvent::state_reset(10, EntityId(2), None);
        let landed = PhysicsEvent::ground_state_changed(10, GroundInfo::airborne(EntityId(1)));
        let later = PhysicsEvent::state_reset(11, EntityId(1), None);
        let other = PhysicsEvent::state_reset(10, EntityId(3), None);

        // Same tick, correction before ground state
        assert!(reset < landed);
        // Same tick and priority, lower entity first
        assert!(reset < other);
        // Tick dominates
        assert!(landed < later);
    }

    #[test]
    fn test_landing_detection() {
        let mut ground = GroundInfo::airborne(EntityId(1));
        ground.grounded = true;
        let event = PhysicsEvent::ground_state_changed(1, ground);
        assert!(event.is_landing());
        assert!(!event.is_takeoff());
    }
}
