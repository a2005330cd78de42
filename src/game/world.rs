//! Physics world wrapper
//!
//! Each match owns one `PhysicsWorld` exclusively; no other task touches it.
//! Rigid bodies and colliders come from rapier; collision events are drained
//! once per tick through a channel collector. Colliders carry a `BodyTag` in
//! their user data so contact processing can map handles back to entities.

use crossbeam_channel::Receiver;
use rapier2d::prelude::*;

use crate::game::constants::{projectile, tank, world as world_consts};
use crate::util::vec2::Vec2;

/// Entity tag stored in collider user data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyTag {
    Tank(u32),
    Projectile(u32),
    Crate(u32),
    AmmoBox(u32),
    Wall,
}

impl BodyTag {
    pub fn encode(self) -> u128 {
        match self {
            BodyTag::Tank(id) => (1u128 << 64) | id as u128,
            BodyTag::Projectile(id) => (2u128 << 64) | id as u128,
            BodyTag::Crate(id) => (3u128 << 64) | id as u128,
            BodyTag::AmmoBox(id) => (4u128 << 64) | id as u128,
            BodyTag::Wall => 5u128 << 64,
        }
    }

    pub fn decode(raw: u128) -> Option<Self> {
        let id = raw as u32;
        match raw >> 64 {
            1 => Some(BodyTag::Tank(id)),
            2 => Some(BodyTag::Projectile(id)),
            3 => Some(BodyTag::Crate(id)),
            4 => Some(BodyTag::AmmoBox(id)),
            5 => Some(BodyTag::Wall),
            _ => None,
        }
    }
}

pub struct PhysicsWorld {
    pipeline: PhysicsPipeline,
    integration_parameters: IntegrationParameters,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    pub bodies: RigidBodySet,
    pub colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    gravity: Vector<Real>,
    event_handler: ChannelEventCollector,
    collision_rx: Receiver<CollisionEvent>,
    _contact_force_rx: Receiver<ContactForceEvent>,
}

impl PhysicsWorld {
    /// Top-down world: no gravity, fixed `dt`
    pub fn new(dt: f32) -> Self {
        let (collision_tx, collision_rx) = crossbeam_channel::unbounded();
        let (force_tx, contact_force_rx) = crossbeam_channel::unbounded();
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = dt;

        Self {
            pipeline: PhysicsPipeline::new(),
            integration_parameters,
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            gravity: vector![0.0, 0.0],
            event_handler: ChannelEventCollector::new(collision_tx, force_tx),
            collision_rx,
            _contact_force_rx: contact_force_rx,
        }
    }

    /// Advance the simulation by one fixed step
    pub fn step(&mut self) {
        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            None,
            &(),
            &self.event_handler,
        );
    }

    /// Collision events produced by the last step, in emission order
    pub fn drain_collision_events(&mut self) -> Vec<CollisionEvent> {
        self.collision_rx.try_iter().collect()
    }

    /// Static boundary walls enclosing `[0, width] x [0, height]`
    pub fn spawn_walls(&mut self, width: f32, height: f32) {
        let t = world_consts::WALL_THICKNESS;
        let walls = [
            // (center, half extents)
            (vector![width / 2.0, -t / 2.0], (width / 2.0 + t, t / 2.0)),
            (vector![width / 2.0, height + t / 2.0], (width / 2.0 + t, t / 2.0)),
            (vector![-t / 2.0, height / 2.0], (t / 2.0, height / 2.0 + t)),
            (vector![width + t / 2.0, height / 2.0], (t / 2.0, height / 2.0 + t)),
        ];
        for (center, (hx, hy)) in walls {
            self.colliders.insert(
                ColliderBuilder::cuboid(hx, hy)
                    .translation(center)
                    .user_data(BodyTag::Wall.encode())
                    .build(),
            );
        }
    }

    /// Tank hull: dynamic cuboid with a turret disc on the same body. The
    /// turret itself is simulated kinematically; the disc only contributes
    /// mass and a hit surface.
    pub fn spawn_tank(
        &mut self,
        entity_id: u32,
        position: Vec2,
        angle: f32,
        hull_density: f32,
        turret_density: f32,
    ) -> RigidBodyHandle {
        let body = RigidBodyBuilder::dynamic()
            .translation(vector![position.x, position.y])
            .rotation(angle)
            .linear_damping(tank::LINEAR_DAMPING)
            .angular_damping(tank::ANGULAR_DAMPING)
            .build();
        let handle = self.bodies.insert(body);

        let hull = ColliderBuilder::cuboid(tank::HULL_HALF_LENGTH, tank::HULL_HALF_WIDTH)
            .density(hull_density)
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .user_data(BodyTag::Tank(entity_id).encode())
            .build();
        self.colliders.insert_with_parent(hull, handle, &mut self.bodies);

        let turret = ColliderBuilder::ball(tank::TURRET_RADIUS)
            .density(turret_density)
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .user_data(BodyTag::Tank(entity_id).encode())
            .build();
        self.colliders.insert_with_parent(turret, handle, &mut self.bodies);

        handle
    }

    /// Shell: small fast ball with CCD so it cannot tunnel through hulls
    pub fn spawn_projectile(
        &mut self,
        projectile_id: u32,
        position: Vec2,
        velocity: Vec2,
        density: f32,
    ) -> RigidBodyHandle {
        let body = RigidBodyBuilder::dynamic()
            .translation(vector![position.x, position.y])
            .linvel(vector![velocity.x, velocity.y])
            .ccd_enabled(true)
            .build();
        let handle = self.bodies.insert(body);

        let collider = ColliderBuilder::ball(projectile::RADIUS)
            .density(density)
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .user_data(BodyTag::Projectile(projectile_id).encode())
            .build();
        self.colliders
            .insert_with_parent(collider, handle, &mut self.bodies);

        handle
    }

    /// Pushable obstacle crate
    pub fn spawn_crate(&mut self, crate_id: u32, position: Vec2, angle: f32) -> RigidBodyHandle {
        let body = RigidBodyBuilder::dynamic()
            .translation(vector![position.x, position.y])
            .rotation(angle)
            .linear_damping(2.0)
            .angular_damping(2.0)
            .build();
        let handle = self.bodies.insert(body);

        let collider = ColliderBuilder::cuboid(
            world_consts::CRATE_HALF_EXTENT,
            world_consts::CRATE_HALF_EXTENT,
        )
        .density(world_consts::CRATE_DENSITY)
        .user_data(BodyTag::Crate(crate_id).encode())
        .build();
        self.colliders
            .insert_with_parent(collider, handle, &mut self.bodies);

        handle
    }

    /// Ammo box pickup zone: a static sensor, no physical response
    pub fn spawn_ammo_box(&mut self, box_id: u32, position: Vec2) -> ColliderHandle {
        self.colliders.insert(
            ColliderBuilder::cuboid(
                world_consts::AMMO_BOX_HALF_EXTENT,
                world_consts::AMMO_BOX_HALF_EXTENT,
            )
            .translation(vector![position.x, position.y])
            .sensor(true)
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .user_data(BodyTag::AmmoBox(box_id).encode())
            .build(),
        )
    }

    /// Remove a body and everything attached to it
    pub fn remove_body(&mut self, handle: RigidBodyHandle) {
        self.bodies.remove(
            handle,
            &mut self.islands,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
    }

    pub fn body(&self, handle: RigidBodyHandle) -> Option<&RigidBody> {
        self.bodies.get(handle)
    }

    pub fn body_mut(&mut self, handle: RigidBodyHandle) -> Option<&mut RigidBody> {
        self.bodies.get_mut(handle)
    }

    pub fn body_position(&self, handle: RigidBodyHandle) -> Option<(Vec2, f32)> {
        let body = self.bodies.get(handle)?;
        let translation = body.translation();
        Some((
            Vec2::new(translation.x, translation.y),
            body.rotation().angle(),
        ))
    }

    pub fn body_velocity(&self, handle: RigidBodyHandle) -> Option<Vec2> {
        let body = self.bodies.get(handle)?;
        let v = body.linvel();
        Some(Vec2::new(v.x, v.y))
    }

    /// Entity tag of a collider, if it carries one
    pub fn tag_of(&self, handle: ColliderHandle) -> Option<BodyTag> {
        self.colliders
            .get(handle)
            .and_then(|c| BodyTag::decode(c.user_data))
    }

    /// World-space contact normal between two colliders from the last step.
    /// Callers orient the normal themselves; `None` when the narrow phase has
    /// no manifold (sensor contacts, already-separated pairs).
    pub fn contact_normal(&self, a: ColliderHandle, b: ColliderHandle) -> Option<Vec2> {
        let pair = self.narrow_phase.contact_pair(a, b)?;
        let manifold = pair.manifolds.first()?;
        let n = manifold.data.normal;
        if n.norm_squared() > 0.0 {
            Some(Vec2::new(n.x, n.y))
        } else {
            None
        }
    }
}
