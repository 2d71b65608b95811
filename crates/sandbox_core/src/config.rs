//! Simulation configuration.
//!
//! The numbers here are scene tuning values carried over from the sandbox
//! scenes (drop heights, stiffness, thresholds). They are defaults, not
//! physical constants, and every one of them can be overridden from a JSON
//! file through [`SandboxConfig::load`].
//!
//! ```ignore
//! let config = SandboxConfig::load("sandbox.json")?;
//! let mut world = SimulationWorld::new(config.world.clone())?;
//! world.spawn_cloth(config.cloth.clone())?;
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cloth::ClothConfig;
use crate::error::{check_length, check_unit, ConfigError, ConfigResult};
use crate::forces::DragParams;
use crate::fracture::{AssemblyConfig, GridFractureConfig};
use crate::tension::TetherKind;

/// Global parameters for a [`SimulationWorld`](crate::world::SimulationWorld).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Gravity magnitude, applied along -Y.
    pub gravity: f32,
    /// Height of the ground plane.
    pub ground_height: f32,
    /// Fixed tick length used by [`advance`](crate::world::SimulationWorld::advance).
    pub fixed_timestep: f32,
    /// Catch-up cap so a long frame cannot spiral.
    pub max_steps_per_frame: u32,
    /// Rigid body speed clamp.
    pub max_speed: f32,
    /// Per-step angular velocity multiplier while spinning.
    pub angular_damping: f32,
    /// Horizontal speed above which a ground contact induces rolling.
    pub rolling_threshold: f32,
    /// Vertical speed below which a bounce is zeroed.
    pub rest_threshold: f32,
    /// Linear air resistance `-v * friction * m` on rigid bodies.
    pub enable_air_resistance: bool,
    /// Aerodynamic `|v|^2` drag on rigid bodies; `None` disables it.
    pub aero_drag: Option<DragParams>,
    /// Global switch for ground and pairwise collisions.
    pub enable_collisions: bool,
    /// Seed for fracture randomness.
    pub seed: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            gravity: 9.81,
            ground_height: 0.0,
            fixed_timestep: 0.02,
            max_steps_per_frame: 8,
            max_speed: 50.0,
            angular_damping: 0.95,
            rolling_threshold: 0.5,
            rest_threshold: 0.1,
            enable_air_resistance: false,
            aero_drag: None,
            enable_collisions: true,
            seed: 0x5EED,
        }
    }
}

impl WorldConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.gravity.is_finite() {
            return Err(ConfigError::Negative {
                what: "gravity",
                value: self.gravity,
            });
        }
        if !self.ground_height.is_finite() {
            return Err(ConfigError::Negative {
                what: "ground height",
                value: self.ground_height,
            });
        }
        check_length("fixed timestep", self.fixed_timestep)?;
        check_length("max speed", self.max_speed)?;
        check_unit("angular damping", self.angular_damping)?;
        if let Some(drag) = &self.aero_drag {
            drag.validate()?;
        }
        Ok(())
    }
}

/// Everything the demo driver needs to build its scenes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub world: WorldConfig,
    pub tether: TetherKind,
    pub cloth: ClothConfig,
    pub rubik: AssemblyConfig,
    pub cube_fracture: GridFractureConfig,
    /// Partial JSON for this section fills gaps from the cube preset, so
    /// override it as a whole.
    pub plate_fracture: GridFractureConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            world: WorldConfig::default(),
            tether: TetherKind::default(),
            cloth: ClothConfig::default(),
            rubik: AssemblyConfig::default(),
            cube_fracture: GridFractureConfig::cube(),
            plate_fracture: GridFractureConfig::plate(),
        }
    }
}

impl SandboxConfig {
    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: SandboxConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.world.validate()?;
        self.tether.validate()?;
        self.cloth.validate()?;
        self.rubik.validate()?;
        self.cube_fracture.validate()?;
        self.plate_fracture.validate()?;
        Ok(())
    }
}
