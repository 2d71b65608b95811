//! Tethers between a kinematic anchor and a rigid body.
//!
//! Two flavours share one state machine:
//!
//! - **Spring**: Hooke spring with damping and optional velocity-squared air
//!   drag. Pushes when compressed.
//! - **Chain**: near-inextensible rope. Only pulls once stretched past its
//!   maximum length; never pushes.
//!
//! Neither acts while the attachment point is above the anchor (the body has
//! been thrown up past it), which is the `Slack` state.

use bevy::math::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::{check_length, check_non_negative, ConfigResult};
use crate::forces::{spring_potential_energy, velocity_squared_drag};
use crate::world::BodyId;

/// Below this anchor-to-body distance the tether direction is undefined.
pub const MIN_TETHER_LENGTH: f32 = 0.01;

/// Tether flavour and its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TetherKind {
    Spring {
        rest_length: f32,
        stiffness: f32,
        damping: f32,
        air_drag: f32,
    },
    Chain {
        max_length: f32,
        stiffness: f32,
        damping: f32,
    },
}

impl Default for TetherKind {
    fn default() -> Self {
        Self::spring()
    }
}

impl TetherKind {
    /// Spring with the sandbox scene tuning.
    pub fn spring() -> Self {
        TetherKind::Spring {
            rest_length: 3.0,
            stiffness: 120.0,
            damping: 8.0,
            air_drag: 0.1,
        }
    }

    /// Chain with the sandbox scene tuning.
    pub fn chain() -> Self {
        TetherKind::Chain {
            max_length: 3.0,
            stiffness: 5000.0,
            damping: 5.0,
        }
    }

    /// Length at which the tether exerts no elastic force.
    pub fn rest_length(&self) -> f32 {
        match *self {
            TetherKind::Spring { rest_length, .. } => rest_length,
            TetherKind::Chain { max_length, .. } => max_length,
        }
    }

    pub fn stiffness(&self) -> f32 {
        match *self {
            TetherKind::Spring { stiffness, .. } | TetherKind::Chain { stiffness, .. } => stiffness,
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        match *self {
            TetherKind::Spring {
                rest_length,
                stiffness,
                damping,
                air_drag,
            } => {
                check_length("spring rest length", rest_length)?;
                check_non_negative("spring stiffness", stiffness)?;
                check_non_negative("spring damping", damping)?;
                check_non_negative("spring air drag", air_drag)?;
            }
            TetherKind::Chain {
                max_length,
                stiffness,
                damping,
            } => {
                check_length("chain max length", max_length)?;
                check_non_negative("chain stiffness", stiffness)?;
                check_non_negative("chain damping", damping)?;
            }
        }
        Ok(())
    }
}

/// Spawn request for a tether.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TetherDesc {
    pub anchor: Vec3,
    pub body: BodyId,
    pub kind: TetherKind,
    /// Snap permanently once `|len - rest| / rest` exceeds this.
    pub break_ratio: Option<f32>,
}

impl TetherDesc {
    pub fn new(anchor: Vec3, body: BodyId, kind: TetherKind) -> Self {
        Self {
            anchor,
            body,
            kind,
            break_ratio: None,
        }
    }

    pub fn with_break_ratio(mut self, ratio: f32) -> Self {
        self.break_ratio = Some(ratio);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensionState {
    /// Exerting force.
    Taut,
    /// Attachment above the anchor, or a chain shorter than its max length.
    Slack,
    /// Anchor and attachment coincide.
    Degenerate,
}

/// One evaluation of a tether.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TensionSample {
    /// Force on the body.
    pub force: Vec3,
    pub state: TensionState,
    /// Anchor-to-attachment distance.
    pub length: f32,
    /// Elastic energy currently stored.
    pub energy: f32,
}

impl TensionSample {
    fn inactive(state: TensionState, length: f32) -> Self {
        Self {
            force: Vec3::ZERO,
            state,
            length,
            energy: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TensionConstraint {
    pub anchor: Vec3,
    /// Velocity of the anchor, zero unless something drags it around.
    pub anchor_velocity: Vec3,
    pub body: BodyId,
    pub kind: TetherKind,
    pub break_ratio: Option<f32>,
    broken: bool,
    last: Option<TensionSample>,
}

impl TensionConstraint {
    pub fn new(desc: TetherDesc) -> ConfigResult<Self> {
        desc.kind.validate()?;
        if let Some(ratio) = desc.break_ratio {
            check_length("tether break ratio", ratio)?;
        }
        Ok(Self {
            anchor: desc.anchor,
            anchor_velocity: Vec3::ZERO,
            body: desc.body,
            kind: desc.kind,
            break_ratio: desc.break_ratio,
            broken: false,
            last: None,
        })
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Sample recorded by the most recent step.
    pub fn last_sample(&self) -> Option<TensionSample> {
        self.last
    }

    /// Evaluate the tether for a body attached at `attachment` moving with
    /// `body_velocity`. Pure; does not update the broken flag.
    pub fn sample(&self, attachment: Vec3, body_velocity: Vec3) -> TensionSample {
        if self.broken {
            return TensionSample::inactive(TensionState::Slack, (attachment - self.anchor).length());
        }

        let delta = attachment - self.anchor;
        let length = delta.length();
        if length < MIN_TETHER_LENGTH {
            return TensionSample::inactive(TensionState::Degenerate, length);
        }

        let direction = delta / length;
        let relative_velocity = body_velocity - self.anchor_velocity;

        match self.kind {
            TetherKind::Spring {
                rest_length,
                stiffness,
                damping,
                air_drag,
            } => {
                let drag = velocity_squared_drag(body_velocity, air_drag);
                if attachment.y > self.anchor.y {
                    let mut sample = TensionSample::inactive(TensionState::Slack, length);
                    sample.force = drag;
                    return sample;
                }

                let extension = length - rest_length;
                let spring = -stiffness * extension * direction;
                let damper = -damping * relative_velocity.dot(direction) * direction;
                TensionSample {
                    force: spring + damper + drag,
                    state: TensionState::Taut,
                    length,
                    energy: spring_potential_energy(stiffness, extension),
                }
            }
            TetherKind::Chain {
                max_length,
                stiffness,
                damping,
            } => {
                if attachment.y > self.anchor.y || length <= max_length {
                    return TensionSample::inactive(TensionState::Slack, length);
                }

                let extension = length - max_length;
                let spring = -stiffness * extension * direction;
                let damper = -damping * relative_velocity.dot(direction) * direction;
                TensionSample {
                    force: spring + damper,
                    state: TensionState::Taut,
                    length,
                    energy: spring_potential_energy(stiffness, extension),
                }
            }
        }
    }

    /// Evaluate and record the sample, snapping the tether if it is
    /// overstretched. Returns the force to apply (zero once broken) and
    /// whether this call broke it.
    pub(crate) fn update(&mut self, attachment: Vec3, body_velocity: Vec3) -> (Vec3, bool) {
        let sample = self.sample(attachment, body_velocity);
        self.last = Some(sample);
        if self.broken {
            return (Vec3::ZERO, false);
        }

        if let Some(ratio) = self.break_ratio {
            let rest = self.kind.rest_length();
            if sample.state != TensionState::Degenerate && (sample.length - rest).abs() / rest > ratio {
                self.broken = true;
                return (Vec3::ZERO, true);
            }
        }

        (sample.force, false)
    }

    /// Stored elastic energy at the last step.
    pub fn potential_energy(&self) -> f32 {
        self.last.map_or(0.0, |s| s.energy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tether(kind: TetherKind) -> TensionConstraint {
        TensionConstraint::new(TetherDesc::new(Vec3::new(0.0, 6.0, 0.0), BodyId(0), kind)).unwrap()
    }

    #[test]
    fn test_rejects_bad_parameters() {
        let bad = TetherKind::Spring {
            rest_length: 0.0,
            stiffness: 1.0,
            damping: 0.0,
            air_drag: 0.0,
        };
        assert!(TensionConstraint::new(TetherDesc::new(Vec3::ZERO, BodyId(0), bad)).is_err());
    }

    #[test]
    fn test_stretched_spring_pulls_up() {
        let t = tether(TetherKind::spring());
        let sample = t.sample(Vec3::new(0.0, 2.0, 0.0), Vec3::ZERO);

        // 4m long, rest 3: 120 N upward
        assert_eq!(sample.state, TensionState::Taut);
        assert!((sample.force.y - 120.0).abs() < 1e-3, "got {:?}", sample.force);
        assert!((sample.energy - 60.0).abs() < 1e-3);
    }

    #[test]
    fn test_compressed_spring_pushes_down() {
        let t = tether(TetherKind::spring());
        let sample = t.sample(Vec3::new(0.0, 5.0, 0.0), Vec3::ZERO);
        assert!(sample.force.y < 0.0, "compressed spring pushes the body away");
    }

    #[test]
    fn test_chain_never_pushes() {
        let t = tether(TetherKind::chain());
        for y in [5.5, 4.0, 3.01, 3.0] {
            let sample = t.sample(Vec3::new(0.0, y, 0.0), Vec3::new(0.0, 3.0, 0.0));
            assert_eq!(sample.force, Vec3::ZERO, "chain within max length at y={}", y);
            assert_eq!(sample.state, TensionState::Slack);
        }

        let sample = t.sample(Vec3::new(0.0, 2.9, 0.0), Vec3::ZERO);
        assert_eq!(sample.state, TensionState::Taut);
        assert!(sample.force.y > 0.0, "taut chain only pulls toward the anchor");
    }

    #[test]
    fn test_slack_when_above_anchor() {
        for kind in [TetherKind::spring(), TetherKind::chain()] {
            let t = tether(kind);
            let sample = t.sample(Vec3::new(0.0, 10.0, 0.0), Vec3::ZERO);
            assert_eq!(sample.state, TensionState::Slack);
            assert_eq!(sample.force, Vec3::ZERO);
        }
    }

    #[test]
    fn test_degenerate_when_coincident() {
        let t = tether(TetherKind::spring());
        let sample = t.sample(Vec3::new(0.0, 6.005, 0.0), Vec3::ZERO);
        assert_eq!(sample.state, TensionState::Degenerate);
        assert_eq!(sample.force, Vec3::ZERO);
    }

    #[test]
    fn test_spring_force_grows_with_extension() {
        let t = tether(TetherKind::spring());
        let mut previous = f32::MIN;
        for i in 0..20 {
            let y = 2.9 - i as f32 * 0.1;
            let force = t.sample(Vec3::new(0.0, y, 0.0), Vec3::ZERO).force.y;
            assert!(force > previous, "force must increase with stretch at y={}", y);
            previous = force;
        }
    }

    #[test]
    fn test_break_ratio_snaps_permanently() {
        let mut t = TensionConstraint::new(
            TetherDesc::new(Vec3::new(0.0, 6.0, 0.0), BodyId(0), TetherKind::spring()).with_break_ratio(0.5),
        )
        .unwrap();

        let (force, snapped) = t.update(Vec3::new(0.0, 2.0, 0.0), Vec3::ZERO);
        assert!(!snapped);
        assert!(force.y > 0.0);

        // 5m against rest 3: ratio 0.67
        let (force, snapped) = t.update(Vec3::new(0.0, 1.0, 0.0), Vec3::ZERO);
        assert!(snapped);
        assert_eq!(force, Vec3::ZERO);

        let (force, snapped) = t.update(Vec3::new(0.0, 2.0, 0.0), Vec3::ZERO);
        assert!(t.is_broken(), "broken must stay broken");
        assert!(!snapped, "break is reported once");
        assert_eq!(force, Vec3::ZERO);
    }
}
