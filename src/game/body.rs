//! Physics body boundary
//!
//! The core never steps physics itself. It reads a world-space translation
//! from a body driven elsewhere: a browser's rigid body reporting poses over
//! the socket, or a headless wander body used by bots.

use glam::Vec3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Body read failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BodyError {
    #[error("Physics body has not reported a pose yet")]
    NotReady,

    #[error("Physics body reported a non-finite translation")]
    NonFinite,
}

/// An externally driven rigid body
pub trait PhysicsBody: Send {
    /// Current world-space translation
    fn translation(&self) -> Result<Vec3, BodyError>;

    /// Advance one frame. Bodies simulated elsewhere ignore this.
    fn step(&mut self, _dt: f32) {}

    /// Accept a pose from an external simulation
    fn report(&mut self, _translation: Vec3) {}
}

/// Body whose pose is reported by a remote client
#[derive(Debug, Default)]
pub struct RemoteBody {
    translation: Option<Vec3>,
}

impl PhysicsBody for RemoteBody {
    fn translation(&self) -> Result<Vec3, BodyError> {
        let translation = self.translation.ok_or(BodyError::NotReady)?;
        if !translation.is_finite() {
            return Err(BodyError::NonFinite);
        }
        Ok(translation)
    }

    fn report(&mut self, translation: Vec3) {
        self.translation = Some(translation);
    }
}

/// Movement constants for wander bodies
#[derive(Debug, Clone, Copy)]
pub struct WanderStats {
    /// Maximum ground speed
    pub max_speed: f32,
    /// Acceleration along the heading
    pub acceleration: f32,
    /// Velocity multiplier applied per step
    pub drag: f32,
    /// Turn rate in radians per second
    pub turn_rate: f32,
    /// Distance from the origin the body stays within
    pub arena_radius: f32,
}

impl Default for WanderStats {
    fn default() -> Self {
        Self {
            max_speed: 4.0,
            acceleration: 10.0,
            drag: 0.92,
            turn_rate: 2.5,
            arena_radius: 12.0,
        }
    }
}

/// Random-walk body on a horizontal plane, for headless participants
pub struct WanderBody {
    position: Vec3,
    velocity: Vec3,
    heading: f32,
    stats: WanderStats,
    rng: ChaCha8Rng,
}

impl WanderBody {
    pub fn new(seed: u64, start: Vec3, stats: WanderStats) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Self {
            position: start,
            velocity: Vec3::ZERO,
            heading: rng.gen_range(0.0..std::f32::consts::TAU),
            stats,
            rng,
        }
    }
}

impl PhysicsBody for WanderBody {
    fn translation(&self) -> Result<Vec3, BodyError> {
        Ok(self.position)
    }

    fn step(&mut self, dt: f32) {
        let steer: f32 = self.rng.gen_range(-1.0..=1.0);
        self.heading = (self.heading + steer * self.stats.turn_rate * dt)
            .rem_euclid(std::f32::consts::TAU);

        let thrust = Vec3::new(self.heading.cos(), 0.0, self.heading.sin());
        self.velocity = ((self.velocity + thrust * self.stats.acceleration * dt)
            * self.stats.drag)
            .clamp_length_max(self.stats.max_speed);
        self.position += self.velocity * dt;

        // Outside the arena: turn back toward the centre and pull in.
        let ground = Vec3::new(self.position.x, 0.0, self.position.z);
        if ground.length() > self.stats.arena_radius {
            let inside = ground.clamp_length_max(self.stats.arena_radius);
            self.position.x = inside.x;
            self.position.z = inside.z;
            self.heading = (-inside.z).atan2(-inside.x);
            self.velocity = Vec3::ZERO;
        }
    }
}
