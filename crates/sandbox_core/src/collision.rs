//! Pairwise rigid body collision.
//!
//! Narrow phase only: every pair is tested, there is no broad phase.
//! Detection dispatches on the shape pair; response is a single impulse
//! along the centre-to-centre normal with restitution, Coulomb friction and
//! a torque approximation that treats every body as a solid cube.

use bevy::math::Vec3;

use crate::rigid_body::{RigidBody, Shape};
use crate::world::BodyId;

/// Tangential speed below which friction is skipped.
const MIN_TANGENT_SPEED: f32 = 0.01;

/// Overlap between two bodies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    /// Unit normal pointing from the second body to the first.
    pub normal: Vec3,
    /// Overlap depth along `normal`, never negative.
    pub penetration: f32,
}

/// Impulse exchanged by a resolved contact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactImpulse {
    /// Closing speed along the normal before the response.
    pub impact_speed: f32,
    /// Total impulse applied to the first body (normal plus friction).
    pub impulse: Vec3,
}

/// A resolved collision between two world bodies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionEvent {
    pub a: BodyId,
    pub b: BodyId,
    pub impact_speed: f32,
    pub impulse: Vec3,
}

/// Test two bodies for overlap.
///
/// Box/box uses the bounding boxes, sphere/sphere the centre distance and
/// box/sphere the closest point of the box to the sphere centre. Composite
/// shapes collide as boxes.
pub fn detect(a: &RigidBody, b: &RigidBody) -> Option<Contact> {
    let overlapping = match (a.shape(), b.shape()) {
        (Shape::Sphere { radius: ra }, Shape::Sphere { radius: rb }) => {
            a.position.distance_squared(b.position) < (ra + rb) * (ra + rb)
        }
        (Shape::Sphere { radius }, _) => {
            let closest = b.bounds().closest_point(a.position);
            closest.distance_squared(a.position) < radius * radius
        }
        (_, Shape::Sphere { radius }) => {
            let closest = a.bounds().closest_point(b.position);
            closest.distance_squared(b.position) < radius * radius
        }
        _ => a.bounds().intersects(&b.bounds()),
    };

    if !overlapping {
        return None;
    }

    let delta = a.position - b.position;
    let distance = delta.length();
    let normal = if distance > f32::EPSILON {
        delta / distance
    } else {
        Vec3::Y
    };
    let penetration = a.shape().support(normal) + b.shape().support(normal) - distance;

    Some(Contact {
        normal,
        penetration: penetration.max(0.0),
    })
}

/// Push the bodies apart and exchange impulses.
///
/// Positions are corrected 50/50 along the normal. Returns `None` when the
/// bodies are already separating, in which case only the positions moved.
pub fn resolve(a: &mut RigidBody, b: &mut RigidBody, contact: Contact) -> Option<ContactImpulse> {
    let n = contact.normal;
    let correction = n * contact.penetration * 0.5;
    a.position += correction;
    b.position -= correction;

    let relative_velocity = a.velocity - b.velocity;
    let normal_speed = relative_velocity.dot(n);
    if normal_speed > 0.0 {
        return None;
    }

    let inv_a = 1.0 / a.mass();
    let inv_b = 1.0 / b.mass();
    let inv_sum = inv_a + inv_b;

    let restitution = a.bounciness.min(b.bounciness);
    let j = -(1.0 + restitution) * normal_speed / inv_sum;
    let mut impulse = j * n;

    let tangent_velocity = relative_velocity - normal_speed * n;
    let tangent_speed = tangent_velocity.length();
    if tangent_speed > MIN_TANGENT_SPEED {
        let mu = a.friction.min(b.friction);
        let tangent = tangent_velocity / tangent_speed;
        let friction_magnitude = (mu * tangent_speed / inv_sum).min(mu * j);
        impulse -= tangent * friction_magnitude;
    }

    a.velocity += impulse * inv_a;
    b.velocity -= impulse * inv_b;

    // Torque about each centre from the impulse acting at the midpoint
    let contact_point = (a.position + b.position) * 0.5;
    let torque_a = (contact_point - a.position).cross(impulse);
    let torque_b = (contact_point - b.position).cross(-impulse);
    a.angular_velocity += torque_a / cube_inertia(a);
    b.angular_velocity += torque_b / cube_inertia(b);

    Some(ContactImpulse {
        impact_speed: -normal_speed,
        impulse,
    })
}

/// Scalar inertia of a solid cube with the body's average edge length.
fn cube_inertia(body: &RigidBody) -> f32 {
    let size = body.shape().average_size();
    body.mass() * size * size / 6.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rigid_body::RigidBodyDesc;

    fn sphere(x: f32, vx: f32, mass: f32) -> RigidBody {
        RigidBody::new(
            RigidBodyDesc::sphere(Vec3::new(x, 2.0, 0.0), 0.5, mass)
                .with_velocity(Vec3::new(vx, 0.0, 0.0))
                .with_material(1.0, 0.0),
        )
        .unwrap()
    }

    #[test]
    fn test_separated_bodies_do_not_collide() {
        let a = sphere(0.0, 0.0, 1.0);
        let b = sphere(1.5, 0.0, 1.0);
        assert!(detect(&a, &b).is_none());
    }

    #[test]
    fn test_box_sphere_detection() {
        let cube = RigidBody::new(RigidBodyDesc::cube(Vec3::ZERO, 1.0, 1.0)).unwrap();
        let near = RigidBody::new(RigidBodyDesc::sphere(Vec3::new(0.8, 0.0, 0.0), 0.4, 1.0)).unwrap();
        let far = RigidBody::new(RigidBodyDesc::sphere(Vec3::new(0.8, 0.8, 0.0), 0.4, 1.0)).unwrap();

        assert!(detect(&cube, &near).is_some());
        assert!(detect(&near, &cube).is_some());
        assert!(detect(&cube, &far).is_none(), "corner gap is wider than the radius");
    }

    #[test]
    fn test_elastic_head_on_swaps_velocities() {
        let mut a = sphere(0.0, 2.0, 1.0);
        let mut b = sphere(0.9, -2.0, 1.0);

        let momentum_before = a.velocity * a.mass() + b.velocity * b.mass();
        let energy_before = a.kinetic_energy() + b.kinetic_energy();

        let contact = detect(&a, &b).expect("overlapping");
        assert_eq!(contact.normal, Vec3::new(-1.0, 0.0, 0.0));
        let response = resolve(&mut a, &mut b, contact).expect("approaching");

        assert!((response.impact_speed - 4.0).abs() < 1e-5);
        assert!((a.velocity.x + 2.0).abs() < 1e-5, "got {:?}", a.velocity);
        assert!((b.velocity.x - 2.0).abs() < 1e-5, "got {:?}", b.velocity);

        let momentum_after = a.velocity * a.mass() + b.velocity * b.mass();
        let energy_after = a.kinetic_energy() + b.kinetic_energy();
        assert!((momentum_after - momentum_before).length() < 1e-4);
        assert!((energy_after - energy_before).abs() < 1e-3);
    }

    #[test]
    fn test_unequal_masses_conserve_momentum() {
        let mut a = sphere(0.0, 3.0, 2.0);
        let mut b = sphere(0.95, 0.0, 0.5);
        a.bounciness = 0.3;
        b.bounciness = 0.6;

        let momentum_before = a.velocity * a.mass() + b.velocity * b.mass();
        let energy_before = a.kinetic_energy() + b.kinetic_energy();

        let contact = detect(&a, &b).unwrap();
        resolve(&mut a, &mut b, contact).unwrap();

        let momentum_after = a.velocity * a.mass() + b.velocity * b.mass();
        let energy_after = a.kinetic_energy() + b.kinetic_energy();
        assert!((momentum_after - momentum_before).length() < 1e-4);
        assert!(energy_after <= energy_before + 1e-4, "inelastic contact must not add energy");
    }

    #[test]
    fn test_separating_bodies_only_get_pushed_apart() {
        let mut a = sphere(0.0, -1.0, 1.0);
        let mut b = sphere(0.8, 1.0, 1.0);

        let contact = detect(&a, &b).unwrap();
        assert!(resolve(&mut a, &mut b, contact).is_none());
        assert_eq!(a.velocity.x, -1.0);
        assert_eq!(b.velocity.x, 1.0);
        assert!((b.position.x - a.position.x - 1.0).abs() < 1e-5, "overlap removed");
    }

    #[test]
    fn test_coincident_centres_use_up_normal() {
        let a = RigidBody::new(RigidBodyDesc::cube(Vec3::ONE, 1.0, 1.0)).unwrap();
        let b = RigidBody::new(RigidBodyDesc::cube(Vec3::ONE, 1.0, 1.0)).unwrap();
        let contact = detect(&a, &b).unwrap();
        assert_eq!(contact.normal, Vec3::Y);
        assert!((contact.penetration - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_friction_spins_bodies() {
        let mut a = RigidBody::new(
            RigidBodyDesc::cube(Vec3::new(0.0, 0.9, 0.0), 1.0, 1.0)
                .with_velocity(Vec3::new(2.0, -1.0, 0.0))
                .with_material(0.2, 0.5),
        )
        .unwrap();
        let mut b = RigidBody::new(RigidBodyDesc::cube(Vec3::ZERO, 1.0, 1.0).with_material(0.2, 0.5)).unwrap();

        let contact = detect(&a, &b).unwrap();
        let response = resolve(&mut a, &mut b, contact).unwrap();

        assert!(response.impulse.x < 0.0, "friction opposes sliding");
        assert!(a.velocity.x < 2.0);
        assert!(a.angular_velocity.length() > 0.0);
        assert!(b.angular_velocity.length() > 0.0);
    }
}
