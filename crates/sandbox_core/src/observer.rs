//! Hook points the world calls while stepping.
//!
//! Physics code never logs. Anything that wants to watch a step (logging,
//! telemetry, tests) implements [`PhysicsObserver`] and is passed to
//! [`SimulationWorld::step_with`](crate::world::SimulationWorld::step_with).

use bevy::log::{debug, info, warn};

use crate::collision::CollisionEvent;
use crate::world::{AssemblyId, BodyId, ClothId, GridId, TetherId};

/// Something snapped this step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BreakEvent {
    Tether { tether: TetherId },
    /// Assembly shattered; `energy` is the kinetic energy that drove it.
    Assembly { assembly: AssemblyId, energy: f32 },
    /// Lattice edge snapped; `energy` is what it had stored.
    GridEdge { grid: GridId, edge: usize, energy: f32 },
}

/// Numerical trouble that was detected and recovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    ClothReset { cloth: ClothId },
    GridReset { grid: GridId },
    BodyReset { body: BodyId },
}

/// Summary emitted once per completed step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepSummary {
    /// Steps completed so far, including this one.
    pub step: u64,
    pub dt: f32,
    pub active_bodies: usize,
    pub collisions: usize,
    pub breaks: usize,
    pub total_energy: f32,
}

/// Callbacks invoked at defined points of a step. All default to no-ops.
pub trait PhysicsObserver {
    fn on_collision(&mut self, _event: &CollisionEvent) {}

    fn on_break(&mut self, _event: &BreakEvent) {}

    fn on_fault(&mut self, _fault: &Fault) {}

    /// Called after everything else in the step.
    fn on_step(&mut self, _summary: &StepSummary) {}
}

/// Ignores everything.
pub struct NoOpObserver;

impl PhysicsObserver for NoOpObserver {}

/// Logs breaks and faults, and optionally hard collisions and a periodic
/// energy line.
#[derive(Debug, Clone)]
pub struct LogObserver {
    /// Collisions slower than this are not logged.
    pub min_impact_speed: f32,
    /// Log a summary every this many steps; 0 disables it.
    pub summary_interval: u64,
}

impl Default for LogObserver {
    fn default() -> Self {
        Self {
            min_impact_speed: 2.0,
            summary_interval: 50,
        }
    }
}

impl LogObserver {
    fn logs_collision(&self, event: &CollisionEvent) -> bool {
        event.impact_speed >= self.min_impact_speed
    }

    fn logs_summary(&self, step: u64) -> bool {
        self.summary_interval > 0 && step % self.summary_interval == 0
    }
}

impl PhysicsObserver for LogObserver {
    fn on_collision(&mut self, event: &CollisionEvent) {
        if self.logs_collision(event) {
            debug!(
                "Collision {:?} <-> {:?}: impact {:.2} m/s, impulse {:.2}",
                event.a,
                event.b,
                event.impact_speed,
                event.impulse.length()
            );
        }
    }

    fn on_break(&mut self, event: &BreakEvent) {
        match *event {
            BreakEvent::Tether { tether } => info!("Tether {:?} snapped", tether),
            BreakEvent::Assembly { assembly, energy } => {
                info!("Assembly {:?} shattered with {:.1} J", assembly, energy)
            }
            BreakEvent::GridEdge { grid, edge, energy } => {
                debug!("Lattice {:?} edge {} broke releasing {:.3} J", grid, edge, energy)
            }
        }
    }

    fn on_fault(&mut self, fault: &Fault) {
        warn!("Non-finite state recovered: {:?}", fault);
    }

    fn on_step(&mut self, summary: &StepSummary) {
        if self.logs_summary(summary.step) {
            info!(
                "Step {}: {} active bodies, total energy {:.2} J",
                summary.step, summary.active_bodies, summary.total_energy
            );
        }
    }
}

/// Keeps every event it sees.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    pub collisions: Vec<CollisionEvent>,
    pub breaks: Vec<BreakEvent>,
    pub faults: Vec<Fault>,
    pub steps: Vec<StepSummary>,
}

impl EventRecorder {
    pub fn clear(&mut self) {
        self.collisions.clear();
        self.breaks.clear();
        self.faults.clear();
        self.steps.clear();
    }
}

impl PhysicsObserver for EventRecorder {
    fn on_collision(&mut self, event: &CollisionEvent) {
        self.collisions.push(*event);
    }

    fn on_break(&mut self, event: &BreakEvent) {
        self.breaks.push(*event);
    }

    fn on_fault(&mut self, fault: &Fault) {
        self.faults.push(*fault);
    }

    fn on_step(&mut self, summary: &StepSummary) {
        self.steps.push(*summary);
    }
}

impl<T: PhysicsObserver + ?Sized> PhysicsObserver for &mut T {
    fn on_collision(&mut self, event: &CollisionEvent) {
        (**self).on_collision(event);
    }

    fn on_break(&mut self, event: &BreakEvent) {
        (**self).on_break(event);
    }

    fn on_fault(&mut self, fault: &Fault) {
        (**self).on_fault(fault);
    }

    fn on_step(&mut self, summary: &StepSummary) {
        (**self).on_step(summary);
    }
}

/// Forwards every hook to two observers.
impl<A: PhysicsObserver, B: PhysicsObserver> PhysicsObserver for (A, B) {
    fn on_collision(&mut self, event: &CollisionEvent) {
        self.0.on_collision(event);
        self.1.on_collision(event);
    }

    fn on_break(&mut self, event: &BreakEvent) {
        self.0.on_break(event);
        self.1.on_break(event);
    }

    fn on_fault(&mut self, fault: &Fault) {
        self.0.on_fault(fault);
        self.1.on_fault(fault);
    }

    fn on_step(&mut self, summary: &StepSummary) {
        self.0.on_step(summary);
        self.1.on_step(summary);
    }
}
