//! Destructible structures.
//!
//! - [`assembly`]: rigid composite that shatters all at once
//! - [`grid`]: spring lattice that cracks one edge at a time

pub mod assembly;
pub mod grid;

pub use assembly::{AssemblyConfig, AssemblyState, FragmentableAssembly};
pub use grid::{FractureGrid, GridBlock, GridEdge, GridFractureConfig, GridLayout, GridStepReport, Obstacle, ReleaseStyle};
