//! Particle and constraint physics for the sandbox.
//!
//! Everything is owned by a [`SimulationWorld`] and advanced with
//! [`SimulationWorld::step`]. There is no ECS here; the `sandbox_physics`
//! crate wraps the world in a Bevy plugin.
//!
//! ```ignore
//! let mut world = SimulationWorld::new(WorldConfig::default())?;
//! let crate_box = world.spawn_body(RigidBodyDesc::cube(Vec3::new(0.0, 10.0, 0.0), 1.0, 2.0))?;
//! world.spawn_tether(TetherDesc::new(Vec3::new(0.0, 14.0, 0.0), crate_box, TetherKind::spring()))?;
//! for _ in 0..500 {
//!     world.step(0.02);
//! }
//! ```

pub mod cloth;
pub mod collision;
pub mod config;
pub mod error;
pub mod forces;
pub mod fracture;
pub mod observer;
pub mod particle;
pub mod rigid_body;
pub mod tension;
pub mod world;

pub use cloth::{Cloth, ClothConfig, ClothStatus};
pub use collision::CollisionEvent;
pub use config::{SandboxConfig, WorldConfig};
pub use error::{ConfigError, ConfigResult};
pub use forces::DragParams;
pub use fracture::{AssemblyConfig, AssemblyState, FractureGrid, FragmentableAssembly, GridFractureConfig, GridLayout};
pub use observer::{BreakEvent, EventRecorder, Fault, LogObserver, NoOpObserver, PhysicsObserver, StepSummary};
pub use particle::Particle;
pub use rigid_body::{Aabb, MotionState, RigidBody, RigidBodyDesc, Shape};
pub use tension::{TensionConstraint, TensionSample, TensionState, TetherDesc, TetherKind};
pub use world::{AssemblyId, BodyId, ClothId, GridId, SimulationWorld, TetherId};
