//! Collision Notifier
//!
//! Owns the level geometry and every entity's active contact set. Detects
//! and classifies contacts, tracks grounded/coyote state, and publishes
//! events. It never moves anything; the physics coordinator resolves
//! penetration and then hands the resulting contacts back here.
//!
//! # Grounded state machine
//!
//! ```text
//! Airborne ──ground contact──▶ Grounded
//! Grounded ──contact lost────▶ CoyoteWindow(coyote_time) ──expired──▶ Airborne
//! CoyoteWindow ──ground contact──▶ Grounded
//! Grounded/CoyoteWindow ──jump──▶ (no coyote window on take-off)
//! ```

use std::collections::BTreeMap;

use glam::Vec2;
use tracing::debug;

use crate::config::CollisionConfig;
use crate::core::aabb::{Aabb, DOWN, UP};
use crate::core::time::{Seconds, TIME_EPSILON};
use crate::physics::events::{dispatch, CollisionListener, PhysicsEvent};
use crate::physics::world::{ColliderKind, StaticCollider, StaticWorld};
use crate::protocol::contact::{CollisionInfo, CollisionType, ContactKey, GroundInfo, SurfaceDescriptor};
use crate::protocol::ids::{ColliderId, EntityId};

/// Overlap below this is treated as touching, not penetrating.
pub const CONTACT_EPSILON: f32 = 1e-3;

/// Handle returned when registering a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub u64);

/// Grounded phase of one entity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GroundPhase {
    /// No standing contact and no grace window
    Airborne,
    /// Standing on ground
    Grounded,
    /// Recently left ground without jumping
    CoyoteWindow {
        /// Time the ground contact was lost
        left_at: Seconds,
    },
}

#[derive(Clone, Debug)]
struct GroundTracker {
    phase: GroundPhase,
    was_grounded: bool,
    jump_latched: bool,
    normal: Vec2,
    surface: Option<SurfaceDescriptor>,
    collider: Option<ColliderId>,
    platform_velocity: Vec2,
    last_grounded_at: Option<Seconds>,
}

impl Default for GroundTracker {
    fn default() -> Self {
        Self {
            phase: GroundPhase::Airborne,
            was_grounded: false,
            jump_latched: false,
            normal: UP,
            surface: None,
            collider: None,
            platform_velocity: Vec2::ZERO,
            last_grounded_at: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct EntityContacts {
    contacts: BTreeMap<ContactKey, CollisionInfo>,
    ground: GroundTracker,
}

/// Read-only collision queries and listener registration.
pub trait CollisionNotification {
    /// Register a push listener.
    fn add_collision_listener(&mut self, listener: Box<dyn CollisionListener>) -> ListenerId;

    /// Remove a listener. Returns false for unknown ids.
    fn remove_collision_listener(&mut self, id: ListenerId) -> bool;

    /// Active contacts of an entity (copies).
    fn get_collisions_for_entity(&self, entity: EntityId) -> Vec<CollisionInfo>;

    /// Entity is standing on ground.
    fn is_grounded(&self, entity: EntityId) -> bool;

    /// Normal of the ground stood on.
    fn get_ground_normal(&self, entity: EntityId) -> Option<Vec2>;

    /// Seconds left in the coyote window (full window while grounded).
    fn get_coyote_time_remaining(&self, entity: EntityId) -> Seconds;

    /// Full grounded description.
    fn get_ground_info(&self, entity: EntityId) -> Option<GroundInfo>;

    /// Grounded or inside the coyote window.
    fn can_jump(&self, entity: EntityId) -> bool;

    /// Contacts a box would make moving at `velocity` for `dt`.
    fn predict_collisions(
        &self,
        entity: EntityId,
        bounds: &Aabb,
        velocity: Vec2,
        dt: Seconds,
    ) -> Vec<CollisionInfo>;
}

/// Contact detection and grounded tracking.
pub struct CollisionNotifier {
    config: CollisionConfig,
    cos_ground: f32,
    world: StaticWorld,
    entities: BTreeMap<EntityId, EntityContacts>,
    tick: u64,
    now: Seconds,
    pending_events: Vec<PhysicsEvent>,
    listeners: BTreeMap<ListenerId, Box<dyn CollisionListener>>,
    next_listener: u64,
}

impl CollisionNotifier {
    /// Create a notifier over `world`.
    pub fn new(config: CollisionConfig, world: StaticWorld) -> Self {
        let cos_ground = config.ground_angle_degrees.to_radians().cos();
        Self {
            config,
            cos_ground,
            world,
            entities: BTreeMap::new(),
            tick: 0,
            now: 0.0,
            pending_events: Vec::new(),
            listeners: BTreeMap::new(),
            next_listener: 0,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Level geometry.
    pub fn world(&self) -> &StaticWorld {
        &self.world
    }

    /// Mutable level geometry (platform motion, level edits).
    pub fn world_mut(&mut self) -> &mut StaticWorld {
        &mut self.world
    }

    /// Collision configuration.
    pub fn config(&self) -> &CollisionConfig {
        &self.config
    }

    /// Sync the notifier clock with the physics step.
    pub fn set_time(&mut self, tick: u64, now: Seconds) {
        self.tick = tick;
        self.now = now;
    }

    /// Current notifier time.
    pub fn now(&self) -> Seconds {
        self.now
    }

    /// Start tracking an entity (airborne, no contacts).
    pub fn register(&mut self, entity: EntityId) {
        self.entities.insert(entity, EntityContacts::default());
    }

    /// Stop tracking an entity. No events are emitted.
    pub fn unregister(&mut self, entity: EntityId) {
        self.entities.remove(&entity);
    }

    /// Drop every contact and return to airborne, emitting end events.
    pub fn reset_entity(&mut self, entity: EntityId) {
        let (tick, now) = (self.tick, self.now);
        let Some(tracked) = self.entities.get_mut(&entity) else {
            return;
        };

        for (_, info) in std::mem::take(&mut tracked.contacts) {
            self.pending_events.push(PhysicsEvent::collision_ended(tick, info));
        }

        let was_grounded = tracked.ground.phase == GroundPhase::Grounded;
        tracked.ground = GroundTracker {
            was_grounded,
            ..GroundTracker::default()
        };
        if was_grounded {
            let info = ground_info(entity, &tracked.ground, &self.config, now);
            self.pending_events.push(PhysicsEvent::ground_state_changed(tick, info));
        }
    }

    /// Consume the coyote window: a jump never grants a second one.
    pub fn mark_jumped(&mut self, entity: EntityId) {
        if let Some(tracked) = self.entities.get_mut(&entity) {
            tracked.ground.jump_latched = true;
            if matches!(tracked.ground.phase, GroundPhase::CoyoteWindow { .. }) {
                tracked.ground.phase = GroundPhase::Airborne;
            }
        }
    }

    /// Grounded phase of an entity.
    pub fn ground_phase(&self, entity: EntityId) -> Option<GroundPhase> {
        self.entities.get(&entity).map(|t| t.ground.phase)
    }

    /// Collider currently stood on.
    pub fn ground_collider(&self, entity: EntityId) -> Option<ColliderId> {
        self.entities
            .get(&entity)
            .filter(|t| t.ground.phase == GroundPhase::Grounded)
            .and_then(|t| t.ground.collider)
    }

    /// True when an active blocking contact lies below the entity.
    pub fn has_collision_below(&self, entity: EntityId) -> bool {
        self.entities.get(&entity).is_some_and(|t| {
            t.contacts.values().any(|c| {
                c.active && !c.collision_type.is_sensor() && c.normal.dot(UP) >= self.cos_ground
            })
        })
    }

    // =========================================================================
    // Detection
    // =========================================================================

    /// Classify a static contact by its normal and collider kind.
    pub fn classify(&self, normal: Vec2, collider: &StaticCollider) -> CollisionType {
        if let ColliderKind::Sensor(kind) = collider.kind {
            return kind;
        }
        if normal.dot(UP) >= self.cos_ground {
            if collider.kind == ColliderKind::OneWay || collider.is_moving() {
                CollisionType::Platform
            } else {
                CollisionType::Ground
            }
        } else if normal.dot(DOWN) >= self.cos_ground {
            CollisionType::Ceiling
        } else {
            CollisionType::Wall
        }
    }

    /// Contacts between a body box and the level.
    ///
    /// Solid and one-way contacts count while within `contact_skin`; sensors
    /// only while overlapping. `impacts` carries the approach speed measured
    /// during resolution, keyed by collider.
    pub fn detect_static_contacts(
        &self,
        entity: EntityId,
        bounds: &Aabb,
        velocity: Vec2,
        impacts: &BTreeMap<ColliderId, f32>,
    ) -> Vec<CollisionInfo> {
        let skin = self.config.contact_skin;
        let mut contacts = Vec::new();

        for collider in self.world.query(bounds, skin) {
            let raw = bounds.overlap(&collider.bounds);

            let (normal, penetration) = match collider.kind {
                ColliderKind::Sensor(_) => {
                    let Some(sep) = bounds.mtv(&collider.bounds) else {
                        continue;
                    };
                    (sep.normal, sep.depth)
                }
                ColliderKind::Solid | ColliderKind::OneWay => {
                    let probe = bounds.expanded(skin).overlap(&collider.bounds);
                    if probe.x <= 0.0 || probe.y <= 0.0 || (raw.x <= 0.0 && raw.y <= 0.0) {
                        continue;
                    }
                    contact_normal(bounds, &collider.bounds, raw)
                }
            };

            if collider.kind == ColliderKind::OneWay && (normal != UP || velocity.y < -CONTACT_EPSILON) {
                continue;
            }

            let collision_type = self.classify(normal, collider);
            let impact_velocity = impacts
                .get(&collider.id)
                .copied()
                .unwrap_or_else(|| (-velocity.dot(normal)).max(0.0));

            contacts.push(CollisionInfo {
                entity_a: entity,
                entity_b: collision_type.sentinel(),
                collider: Some(collider.id),
                contact_point: collider.bounds.closest_point(bounds.center),
                normal,
                penetration,
                separation: normal * penetration.max(0.0),
                collision_type,
                surface: collider.surface.clone(),
                timestamp: self.now,
                active: true,
                impact_velocity,
            });
        }
        contacts
    }

    /// Pairwise body contacts, reported for both sides. Never resolved.
    pub fn detect_entity_contacts(
        &self,
        bodies: &[(EntityId, Aabb, Vec2)],
    ) -> BTreeMap<EntityId, Vec<CollisionInfo>> {
        let skin = self.config.contact_skin;
        let mut out: BTreeMap<EntityId, Vec<CollisionInfo>> = BTreeMap::new();

        for i in 0..bodies.len() {
            for j in (i + 1)..bodies.len() {
                let (id_a, box_a, vel_a) = bodies[i];
                let (id_b, box_b, vel_b) = bodies[j];
                let probe = box_a.expanded(skin).overlap(&box_b);
                let raw = box_a.overlap(&box_b);
                if probe.x <= 0.0 || probe.y <= 0.0 || (raw.x <= 0.0 && raw.y <= 0.0) {
                    continue;
                }

                let (normal, penetration) = contact_normal(&box_a, &box_b, raw);
                let closing = (vel_b - vel_a).dot(normal).max(0.0);
                let make = |a: EntityId, b: EntityId, normal: Vec2, point: Vec2| CollisionInfo {
                    entity_a: a,
                    entity_b: b,
                    collider: None,
                    contact_point: point,
                    normal,
                    penetration,
                    separation: normal * penetration.max(0.0),
                    collision_type: CollisionType::Entity,
                    surface: SurfaceDescriptor::default(),
                    timestamp: self.now,
                    active: true,
                    impact_velocity: closing,
                };

                out.entry(id_a)
                    .or_default()
                    .push(make(id_a, id_b, normal, box_b.closest_point(box_a.center)));
                out.entry(id_b)
                    .or_default()
                    .push(make(id_b, id_a, -normal, box_a.closest_point(box_b.center)));
            }
        }
        out
    }

    // =========================================================================
    // Contact set update
    // =========================================================================

    /// Replace an entity's contact set, emitting start/end, ground and
    /// surface events.
    pub fn update_contacts(&mut self, entity: EntityId, contacts: Vec<CollisionInfo>) {
        let (tick, now) = (self.tick, self.now);
        let cos_ground = self.cos_ground;
        let coyote_time = self.config.coyote_time;
        let Some(tracked) = self.entities.get_mut(&entity) else {
            return;
        };

        let next: BTreeMap<ContactKey, CollisionInfo> =
            contacts.into_iter().map(|c| (c.key(), c)).collect();

        for (key, info) in &tracked.contacts {
            if !next.contains_key(key) {
                self.pending_events.push(PhysicsEvent::collision_ended(tick, info.clone()));
            }
        }
        for (key, info) in &next {
            if !tracked.contacts.contains_key(key) {
                #[cfg(feature = "debug-tracing")]
                tracing::trace!(
                    entity = %entity,
                    other = %info.entity_b,
                    kind = %info.collision_type,
                    penetration = info.penetration,
                    "contact started"
                );
                self.pending_events.push(PhysicsEvent::collision_started(tick, info.clone()));
            }
        }

        let support = next
            .values()
            .find(|c| c.collision_type.is_standable() && c.normal.dot(UP) >= cos_ground)
            .cloned();
        tracked.contacts = next;

        let ground = &mut tracked.ground;
        let was_grounded = ground.phase == GroundPhase::Grounded;
        ground.was_grounded = was_grounded;

        match support {
            Some(contact) => {
                ground.phase = GroundPhase::Grounded;
                ground.jump_latched = false;
                ground.last_grounded_at = Some(now);
                ground.normal = contact.normal;
                ground.collider = contact.collider;
                ground.platform_velocity = contact
                    .collider
                    .and_then(|id| self.world.get(id))
                    .map(|c| c.velocity)
                    .unwrap_or(Vec2::ZERO);

                let changed = ground.surface.as_ref() != Some(&contact.surface);
                if changed {
                    let previous = ground.surface.replace(contact.surface.clone());
                    self.pending_events.push(PhysicsEvent::surface_changed(
                        tick,
                        entity,
                        previous,
                        contact.surface,
                    ));
                }
            }
            None => {
                ground.phase = match ground.phase {
                    GroundPhase::Grounded if ground.jump_latched => GroundPhase::Airborne,
                    GroundPhase::Grounded => GroundPhase::CoyoteWindow { left_at: now },
                    GroundPhase::CoyoteWindow { left_at } if now - left_at + TIME_EPSILON >= coyote_time => {
                        GroundPhase::Airborne
                    }
                    phase => phase,
                };
                ground.normal = UP;
                ground.collider = None;
                ground.platform_velocity = Vec2::ZERO;
            }
        }

        let grounded = ground.phase == GroundPhase::Grounded;
        if grounded != was_grounded {
            debug!(entity = %entity, grounded, "ground state changed");
            let info = ground_info(entity, ground, &self.config, now);
            self.pending_events.push(PhysicsEvent::ground_state_changed(tick, info));
        }
    }

    /// Queue an event raised by another layer (resets, corrections).
    pub fn push_event(&mut self, event: PhysicsEvent) {
        self.pending_events.push(event);
    }

    /// Deliver pending events to listeners in order and return them.
    pub fn flush_events(&mut self) -> Vec<PhysicsEvent> {
        let mut events = std::mem::take(&mut self.pending_events);
        events.sort();
        for listener in self.listeners.values_mut() {
            for event in &events {
                dispatch(listener.as_mut(), event);
            }
        }
        events
    }

    /// Number of events waiting for the next flush.
    pub fn pending_event_count(&self) -> usize {
        self.pending_events.len()
    }
}

impl CollisionNotification for CollisionNotifier {
    fn add_collision_listener(&mut self, listener: Box<dyn CollisionListener>) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.insert(id, listener);
        id
    }

    fn remove_collision_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    fn get_collisions_for_entity(&self, entity: EntityId) -> Vec<CollisionInfo> {
        self.entities
            .get(&entity)
            .map(|t| t.contacts.values().cloned().collect())
            .unwrap_or_default()
    }

    fn is_grounded(&self, entity: EntityId) -> bool {
        self.ground_phase(entity) == Some(GroundPhase::Grounded)
    }

    fn get_ground_normal(&self, entity: EntityId) -> Option<Vec2> {
        self.entities
            .get(&entity)
            .filter(|t| t.ground.phase == GroundPhase::Grounded)
            .map(|t| t.ground.normal)
    }

    fn get_coyote_time_remaining(&self, entity: EntityId) -> Seconds {
        self.entities
            .get(&entity)
            .map(|t| coyote_remaining(&t.ground, self.config.coyote_time, self.now))
            .unwrap_or(0.0)
    }

    fn get_ground_info(&self, entity: EntityId) -> Option<GroundInfo> {
        self.entities
            .get(&entity)
            .map(|t| ground_info(entity, &t.ground, &self.config, self.now))
    }

    fn can_jump(&self, entity: EntityId) -> bool {
        self.entities.get(&entity).is_some_and(|t| match t.ground.phase {
            GroundPhase::Grounded => true,
            GroundPhase::CoyoteWindow { .. } => {
                coyote_remaining(&t.ground, self.config.coyote_time, self.now) > 0.0
            }
            GroundPhase::Airborne => false,
        })
    }

    fn predict_collisions(
        &self,
        entity: EntityId,
        bounds: &Aabb,
        velocity: Vec2,
        dt: Seconds,
    ) -> Vec<CollisionInfo> {
        let moved = bounds.translated(velocity * dt as f32);
        let swept = Aabb::from_min_max(bounds.min().min(moved.min()), bounds.max().max(moved.max()));
        let mut predicted = Vec::new();

        for collider in self.world.query(&swept, 0.0) {
            if !swept.intersects(&collider.bounds) {
                continue;
            }
            let (normal, _) = contact_normal(bounds, &collider.bounds, bounds.overlap(&collider.bounds));
            if collider.kind == ColliderKind::OneWay && (normal != UP || velocity.y < 0.0) {
                continue;
            }
            let penetration = match moved.overlap(&collider.bounds) {
                o if normal.x != 0.0 => o.x,
                o => o.y,
            };
            let collision_type = self.classify(normal, collider);
            predicted.push(CollisionInfo {
                entity_a: entity,
                entity_b: collision_type.sentinel(),
                collider: Some(collider.id),
                contact_point: collider.bounds.closest_point(moved.center),
                normal,
                penetration,
                separation: normal * penetration.max(0.0),
                collision_type,
                surface: collider.surface.clone(),
                timestamp: self.now + dt,
                active: false,
                impact_velocity: (-velocity.dot(normal)).max(0.0),
            });
        }
        predicted
    }
}

/// Normal (from `other` toward `body`) and signed depth along the axis the
/// boxes are least overlapped on.
fn contact_normal(body: &Aabb, other: &Aabb, raw: Vec2) -> (Vec2, f32) {
    if raw.x < raw.y {
        let sign = if body.center.x < other.center.x { -1.0 } else { 1.0 };
        (Vec2::new(sign, 0.0), raw.x)
    } else {
        let sign = if body.center.y < other.center.y { -1.0 } else { 1.0 };
        (Vec2::new(0.0, sign), raw.y)
    }
}

fn coyote_remaining(ground: &GroundTracker, coyote_time: Seconds, now: Seconds) -> Seconds {
    match ground.phase {
        GroundPhase::Grounded => coyote_time,
        GroundPhase::CoyoteWindow { left_at } => {
            let elapsed = now - left_at;
            if elapsed + TIME_EPSILON >= coyote_time {
                0.0
            } else {
                coyote_time - elapsed
            }
        }
        GroundPhase::Airborne => 0.0,
    }
}

fn ground_info(entity: EntityId, ground: &GroundTracker, config: &CollisionConfig, now: Seconds) -> GroundInfo {
    GroundInfo {
        entity,
        grounded: ground.phase == GroundPhase::Grounded,
        ground_normal: ground.normal,
        last_grounded_at: ground.last_grounded_at,
        coyote_time_remaining: coyote_remaining(ground, config.coyote_time, now),
        surface: ground.surface.clone(),
        was_grounded: ground.was_grounded,
        platform_velocity: ground.platform_velocity,
        platform_stable: ground.platform_velocity == Vec2::ZERO,
    }
}
