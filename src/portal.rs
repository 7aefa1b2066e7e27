//! Portal placement and teleportation transforms.
//!
//! A portal is a flat elliptical surface embedded in a wall. Two portals are
//! linked as a pair; each one owns the rigid transform (`teleport`) that
//! re-expresses the world as seen through itself in its partner's reference
//! frame. The rendering side uses that transform to build nested views, and
//! the player side uses its inverse to move the camera when it crosses the
//! portal plane.
//!
//! Portals only rotate about the world Y axis (they are fired at vertical
//! walls), so all angle bookkeeping is a signed yaw.

use glam::{Mat4, Vec3, Vec4};

/// Local-space footprint of the portal surface the crossing test uses.
/// Deliberately tight on z: it detects the camera crossing the plane, not
/// general proximity.
const HALF_WIDTH: f32 = 0.5;
const HALF_HEIGHT: f32 = 0.9;
const PLANE_EPSILON: f32 = 0.001;

/// How far the décor mesh is pushed off the wall it is embedded in, so it
/// never z-fights the wall surface.
const WALL_OFFSET: f32 = 0.01;

/// One half of a linked portal pair.
#[derive(Clone, Debug)]
pub struct Portal {
    position: Vec3,
    facing: Vec3,
    /// Accumulated yaw rotation from the initial +z facing.
    rotation: Mat4,
    model: Mat4,
    model_inverse: Mat4,
    teleport: Mat4,
    teleport_inverse: Mat4,
    /// Signed yaw between this portal and its partner, plus half a turn;
    /// applied to a camera that crosses the portal.
    view_angle: f32,
    linked: bool,
}

impl Portal {
    /// Creates a portal at `position` facing along `facing`.
    ///
    /// `facing` must be a meaningful (non-zero) direction; it is normalized
    /// here. The portal is unusable for teleportation until [`link_to`] has
    /// been called on both members of the pair.
    ///
    /// [`link_to`]: Portal::link_to
    pub fn new(position: Vec3, facing: Vec3) -> Self {
        let mut portal = Self {
            position: Vec3::ZERO,
            facing: Vec3::Z,
            rotation: Mat4::IDENTITY,
            model: Mat4::IDENTITY,
            model_inverse: Mat4::IDENTITY,
            teleport: Mat4::IDENTITY,
            teleport_inverse: Mat4::IDENTITY,
            view_angle: 0.0,
            linked: false,
        };
        portal.place(position, facing);
        portal
    }

    /// Signed yaw from the current facing to `new_dir`.
    ///
    /// Magnitude from the dot product; handedness from the y sign of the
    /// cross product (negative y means a left-handed turn).
    fn signed_angle_to(&self, new_dir: Vec3) -> f32 {
        let angle = self.facing.dot(new_dir).clamp(-1.0, 1.0).acos();
        if self.facing.cross(new_dir).y < 0.0 {
            -angle
        } else {
            angle
        }
    }

    /// Re-places the portal, rebuilding its model transform.
    ///
    /// The stored position is offset slightly along `facing` so the décor
    /// mesh sits in front of the wall instead of coplanar with it.
    pub fn place(&mut self, position: Vec3, facing: Vec3) {
        let facing = facing.normalize();
        self.position = position + facing * WALL_OFFSET;

        let angle = self.signed_angle_to(facing);
        self.facing = facing;

        self.rotation = Mat4::from_rotation_y(angle) * self.rotation;
        self.model = Mat4::from_translation(self.position) * self.rotation;
        self.model_inverse = self.model.inverse();
    }

    /// Derives the teleportation matrix that maps the world seen through this
    /// portal into `other`'s frame. Returns the magnitude of the angle
    /// between the two portals (the compositor derives its recursion depth
    /// from it).
    ///
    /// Must be called on both portals of a pair, in both directions, after
    /// any placement change.
    pub fn link_to(&mut self, other: &Portal) -> f32 {
        let angle = self.signed_angle_to(other.facing);

        // Align the partner's frame to ours, then turn half a circle so
        // walking "into" one portal continues "out of" the other instead of
        // mirroring.
        let rotation =
            Mat4::from_rotation_y(-angle) * Mat4::from_rotation_y(std::f32::consts::PI);

        self.view_angle = angle + std::f32::consts::PI;

        // Where the partner ends up once the whole world is rotated; the
        // translation then drags that point onto our own position.
        let new_pos = (rotation * other.position.extend(1.0)).truncate();
        self.teleport = Mat4::from_translation(self.position - new_pos) * rotation;
        self.teleport_inverse = self.teleport.inverse();
        self.linked = true;

        angle.abs()
    }

    /// Transforms a world point as if seen through the portal into the
    /// partner's frame. Used for camera re-centring on crossing and for
    /// picking through portals.
    ///
    /// # Panics
    ///
    /// Panics if the portal was never linked; an unset pair transform is a
    /// programming error, not a recoverable state.
    pub fn teleport_point(&self, p: Vec4) -> Vec3 {
        assert!(self.linked, "portal used before link_to()");
        (self.teleport_inverse * p).truncate()
    }

    /// The world-as-seen-through-this-portal transform.
    ///
    /// # Panics
    ///
    /// Panics if the portal was never linked.
    pub fn teleport_matrix(&self) -> Mat4 {
        assert!(self.linked, "portal used before link_to()");
        self.teleport
    }

    /// Whether a world point is essentially at or behind the portal plane,
    /// within the visible ellipse. This is the camera-crossing trigger.
    pub fn is_colliding(&self, p: Vec3) -> bool {
        let local = (self.model_inverse * p.extend(1.0)).truncate();
        local.x.abs() < HALF_WIDTH && local.y.abs() < HALF_HEIGHT && local.z < PLANE_EPSILON
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn facing(&self) -> Vec3 {
        self.facing
    }

    /// World transform of the portal's décor mesh.
    pub fn model_matrix(&self) -> Mat4 {
        self.model
    }

    /// Yaw correction applied to a camera that crosses this portal.
    pub fn view_angle(&self) -> f32 {
        self.view_angle
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }
}

/// Local-space vertex positions of the portal's elliptical décor surface.
/// The disk sits at z = -0.01 so the stamped silhouette and the translucent
/// surface share one footprint.
#[rustfmt::skip]
pub const DISK_POSITIONS: [[f32; 3]; 46] = [
    [-0.340215,  0.748323, -0.01],
    [-0.234344,  0.831492, -0.01],
    [ 0.340215,  0.748323, -0.01],
    [-0.119468,  0.882707, -0.01],
    [ 0.000000,  0.900000, -0.01],
    [ 0.119468,  0.882707, -0.01],
    [ 0.234345,  0.831492, -0.01],
    [ 0.340215,  0.748323, -0.01],
    [-0.234344,  0.831492, -0.01],
    [-0.119468,  0.882707, -0.01],
    [ 0.234345,  0.831492, -0.01],
    [ 0.433012,  0.636396, -0.01],
    [-0.433012,  0.636396, -0.01],
    [ 0.509168,  0.500013, -0.01],
    [-0.509168,  0.500013, -0.01],
    [ 0.565757,  0.344415, -0.01],
    [ 0.600605,  0.175581, -0.01],
    [-0.565757,  0.344415, -0.01],
    [-0.509168,  0.500013, -0.01],
    [ 0.612371,  0.000000, -0.01],
    [-0.612371,  0.000000, -0.01],
    [ 0.600605, -0.175581, -0.01],
    [-0.600605, -0.175581, -0.01],
    [ 0.565757, -0.344415, -0.01],
    [ 0.509168, -0.500013, -0.01],
    [-0.565757, -0.344415, -0.01],
    [ 0.433012, -0.636396, -0.01],
    [-0.433012, -0.636396, -0.01],
    [ 0.340215, -0.748323, -0.01],
    [-0.340215, -0.748323, -0.01],
    [ 0.234344, -0.831492, -0.01],
    [ 0.119468, -0.882707, -0.01],
    [-0.234344, -0.831492, -0.01],
    [-0.340215, -0.748323, -0.01],
    [ 0.234344, -0.831492, -0.01],
    [-0.234344, -0.831492, -0.01],
    [ 0.119468, -0.882707, -0.01],
    [ 0.000000, -0.900000, -0.01],
    [-0.119467, -0.882707, -0.01],
    [-0.433012, -0.636396, -0.01],
    [ 0.433012, -0.636396, -0.01],
    [-0.509167, -0.500013, -0.01],
    [ 0.509168, -0.500013, -0.01],
    [-0.600605,  0.175581, -0.01],
    [-0.433012,  0.636396, -0.01],
    [ 0.433012,  0.636396, -0.01],
];

/// Triangle indices for [`DISK_POSITIONS`].
#[rustfmt::skip]
pub const DISK_INDICES: [u32; 90] = [
    0, 1, 2,    3, 4, 5,    5, 6, 3,    6, 7, 8,    9, 10, 1,
    7, 11, 12,  11, 13, 14, 13, 15, 14, 15, 16, 17, 18, 15, 17,
    16, 19, 20, 19, 21, 22, 21, 23, 22, 23, 24, 25, 22, 23, 25,
    24, 26, 27, 26, 28, 29, 28, 30, 29, 30, 31, 32, 33, 34, 35,
    36, 37, 38, 38, 35, 36, 33, 39, 40, 39, 41, 42, 41, 25, 24,
    22, 20, 19, 20, 43, 16, 43, 17, 16, 18, 44, 45, 44, 0, 2,
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::{FRAC_PI_2, PI};

    fn facing_pair(gap: f32) -> (Portal, Portal) {
        // Two portals `gap` apart on the z axis, facing each other.
        let a = Portal::new(Vec3::new(0.0, 1.0, 0.0), Vec3::Z);
        let b = Portal::new(Vec3::new(0.0, 1.0, -gap), Vec3::NEG_Z);
        (a, b)
    }

    #[test]
    fn teleport_round_trips() {
        let (mut a, mut b) = facing_pair(10.0);
        let b_snapshot = b.clone();
        a.link_to(&b_snapshot);
        b.link_to(&a);

        for p in [
            Vec3::new(0.3, 1.2, -0.5),
            Vec3::new(-2.0, 0.5, -8.0),
            Vec3::new(5.0, 3.0, 2.0),
        ] {
            let through = a.teleport_point(p.extend(1.0));
            let back = b.teleport_point(through.extend(1.0));
            assert!((back - p).length() < 1e-4, "{p:?} -> {through:?} -> {back:?}");
        }
    }

    #[test]
    fn link_angle_is_magnitude_symmetric() {
        let mut a = Portal::new(Vec3::new(0.0, 1.0, 0.0), Vec3::Z);
        let mut b = Portal::new(Vec3::new(4.0, 1.0, -3.0), Vec3::X);
        let ab = a.link_to(&b.clone());
        let ba = b.link_to(&a);
        assert!((ab - ba).abs() < 1e-5);
        assert!((ab - FRAC_PI_2).abs() < 1e-5);
    }

    #[test]
    fn colliding_at_own_position_only() {
        let (a, _) = facing_pair(10.0);
        assert!(a.is_colliding(a.position()));
        assert!(!a.is_colliding(a.position() + a.facing() * 10.0));
    }

    #[test]
    fn crossing_test_is_tight_on_the_plane() {
        let (a, _) = facing_pair(10.0);
        // Just in front of the plane, inside the ellipse: no collision yet.
        assert!(!a.is_colliding(a.position() + a.facing() * 0.05));
        // At/behind the plane, inside the ellipse: collision.
        assert!(a.is_colliding(a.position() - a.facing() * 0.05));
        // Behind the plane but outside the ellipse: no collision.
        assert!(!a.is_colliding(a.position() - a.facing() * 0.05 + Vec3::new(0.8, 0.0, 0.0)));
    }

    #[test]
    fn antiparallel_portals_carry_camera_straight_through() {
        let (mut a, b) = facing_pair(10.0);
        let angle = a.link_to(&b);
        // Facing each other: |angle| is pi, so sin(angle) ~ 0.
        assert!((angle - PI).abs() < 1e-5);

        // A's plane maps onto B's plane, preserving the sideways offset, so
        // motion into A continues out of B instead of mirroring.
        let at_plane = a.position() + Vec3::new(0.25, 0.0, 0.0);
        let out = a.teleport_point(at_plane.extend(1.0));
        let expected = b.position() + Vec3::new(0.25, 0.0, 0.0);
        assert!((out - expected).length() < 1e-3, "{out:?} vs {expected:?}");
    }

    #[test]
    fn placement_offsets_off_the_wall() {
        let p = Portal::new(Vec3::new(0.0, 1.0, -15.0), Vec3::Z);
        assert!((p.position().z - (-15.0 + 0.01)).abs() < 1e-6);
    }

    #[test]
    #[should_panic(expected = "before link_to")]
    fn unlinked_teleport_fails_fast() {
        let (a, _) = facing_pair(10.0);
        let _ = a.teleport_point(Vec4::new(0.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn replacing_preserves_crossing_footprint() {
        let mut p = Portal::new(Vec3::new(0.0, 1.0, -15.0), Vec3::Z);
        p.place(Vec3::new(3.0, 1.0, -2.0), Vec3::X);
        assert!(p.is_colliding(p.position()));
        assert!(!p.is_colliding(p.position() + Vec3::new(10.0, 0.0, 0.0)));
        assert!((p.facing() - Vec3::X).length() < 1e-6);
    }
}
