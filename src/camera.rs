//! Camera rigs: first-person, fixed, mounted, and rail.
//!
//! The active rig is a tagged enum rather than a trait object; the app
//! switches between variants with function keys and every variant answers
//! the same two questions, "where is the eye" and "what is the view
//! matrix". Only the first-person and mounted rigs react to the mouse.

use crate::spline::Spline;
use glam::{Mat4, Vec3};

/// Vertical field of view of the projection, in radians.
pub const FOV_Y: f32 = std::f32::consts::FRAC_PI_3;
pub const Z_NEAR: f32 = 0.05;
pub const Z_FAR: f32 = 500.0;

const MOUSE_SENSITIVITY: f32 = 0.002;
// Just shy of straight up/down so the view matrix never degenerates.
const PITCH_LIMIT: f32 = 1.55;

/// Shared projection for every rig.
pub fn projection(aspect: f32) -> Mat4 {
    Mat4::perspective_rh(FOV_Y, aspect, Z_NEAR, Z_FAR)
}

/// Mouse-look camera with a world position, used for the player's eye.
///
/// Yaw 0 faces -z; positive yaw turns left. The facing vector is
/// `rotY(yaw) * -Z`, the same rotation convention the portal transforms
/// use, so a portal's view angle can be applied directly to `yaw`.
#[derive(Clone, Copy, Debug)]
pub struct FirstPersonCamera {
    pub position: Vec3,
    yaw: f32,
    pitch: f32,
}

impl FirstPersonCamera {
    pub fn new(position: Vec3, yaw: f32) -> Self {
        Self {
            position,
            yaw,
            pitch: 0.0,
        }
    }

    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    /// Full look direction, including pitch.
    pub fn facing(&self) -> Vec3 {
        Vec3::new(
            -self.yaw.sin() * self.pitch.cos(),
            self.pitch.sin(),
            -self.yaw.cos() * self.pitch.cos(),
        )
    }

    /// Look direction flattened onto the ground plane. Movement and portal
    /// crossing use this so looking up does not slow the player down.
    pub fn flat_facing(&self) -> Vec3 {
        Vec3::new(-self.yaw.sin(), 0.0, -self.yaw.cos())
    }

    pub fn right(&self) -> Vec3 {
        self.flat_facing().cross(Vec3::Y)
    }

    pub fn handle_mouse(&mut self, dx: f32, dy: f32) {
        self.yaw -= dx * MOUSE_SENSITIVITY;
        self.pitch = (self.pitch - dy * MOUSE_SENSITIVITY).clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }

    /// Rotates the view in place, as crossing a portal does to the player.
    pub fn rotate_view(&mut self, angle: f32) {
        self.yaw += angle;
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.facing(), Vec3::Y)
    }
}

/// The camera rig currently driving the view.
pub enum CameraRig {
    /// The player's eye, driven by mouse look and the movement keys.
    FirstPerson(FirstPersonCamera),
    /// A static observer at a fixed point, aimed once at setup.
    Fixed { position: Vec3, target: Vec3 },
    /// Rides an entity; the anchor is refreshed from the entity's transform
    /// each frame, mouse look still applies.
    Mounted {
        anchor: Vec3,
        camera: FirstPersonCamera,
    },
    /// Follows a closed spline, looking along the direction of travel.
    Rail { spline: Spline, speed: f32 },
}

impl CameraRig {
    const MOUNT_EYE_OFFSET: Vec3 = Vec3::new(0.0, 0.75, 0.0);

    pub fn eye(&self, time: f32) -> Vec3 {
        match self {
            CameraRig::FirstPerson(cam) => cam.position,
            CameraRig::Fixed { position, .. } => *position,
            CameraRig::Mounted { anchor, .. } => *anchor + Self::MOUNT_EYE_OFFSET,
            CameraRig::Rail { spline, speed } => spline.position(time * speed),
        }
    }

    pub fn view_matrix(&self, time: f32) -> Mat4 {
        match self {
            CameraRig::FirstPerson(cam) => cam.view_matrix(),
            CameraRig::Fixed { position, target } => {
                Mat4::look_at_rh(*position, *target, Vec3::Y)
            }
            CameraRig::Mounted { anchor, camera } => {
                let eye = *anchor + Self::MOUNT_EYE_OFFSET;
                Mat4::look_at_rh(eye, eye + camera.facing(), Vec3::Y)
            }
            CameraRig::Rail { spline, speed } => {
                let t = time * speed;
                let eye = spline.position(t);
                let along = spline.tangent(t).normalize_or_zero();
                Mat4::look_at_rh(eye, eye + along, Vec3::Y)
            }
        }
    }

    /// Mouse input; fixed and rail rigs ignore it.
    pub fn handle_mouse(&mut self, dx: f32, dy: f32) {
        match self {
            CameraRig::FirstPerson(cam) => cam.handle_mouse(dx, dy),
            CameraRig::Mounted { camera, .. } => camera.handle_mouse(dx, dy),
            CameraRig::Fixed { .. } | CameraRig::Rail { .. } => {}
        }
    }

    /// Moves the mounted rig's anchor; no-op for the others.
    pub fn set_anchor(&mut self, position: Vec3) {
        if let CameraRig::Mounted { anchor, .. } = self {
            *anchor = position;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_yaw_faces_negative_z() {
        let cam = FirstPersonCamera::new(Vec3::ZERO, 0.0);
        assert!((cam.facing() - Vec3::NEG_Z).length() < 1e-6);
        assert!((cam.flat_facing() - Vec3::NEG_Z).length() < 1e-6);
    }

    #[test]
    fn pitch_is_clamped() {
        let mut cam = FirstPersonCamera::new(Vec3::ZERO, 0.0);
        cam.handle_mouse(0.0, -1e6);
        assert!(cam.pitch() <= PITCH_LIMIT);
        cam.handle_mouse(0.0, 1e6);
        assert!(cam.pitch() >= -PITCH_LIMIT);
    }

    #[test]
    fn rotate_view_half_turn_reverses_facing() {
        let mut cam = FirstPersonCamera::new(Vec3::ZERO, 0.3);
        let before = cam.flat_facing();
        cam.rotate_view(std::f32::consts::PI);
        assert!((cam.flat_facing() + before).length() < 1e-5);
    }

    #[test]
    fn view_matrix_inverse_recovers_eye() {
        let cam = FirstPersonCamera::new(Vec3::new(2.0, 1.75, -4.0), 0.7);
        let eye = cam.view_matrix().inverse().w_axis.truncate();
        assert!((eye - cam.position).length() < 1e-4);
    }

    #[test]
    fn rail_rig_rides_the_spline() {
        let spline = Spline::new(vec![
            Vec3::new(0.0, 2.0, 0.0),
            Vec3::new(4.0, 2.0, 0.0),
            Vec3::new(4.0, 2.0, 4.0),
            Vec3::new(0.0, 2.0, 4.0),
        ]);
        let rig = CameraRig::Rail {
            spline: spline.clone(),
            speed: 1.0,
        };
        assert!((rig.eye(1.0) - spline.position(1.0)).length() < 1e-6);
        // The view matrix places the spline point at the eye.
        let eye = rig.view_matrix(1.0).inverse().w_axis.truncate();
        assert!((eye - spline.position(1.0)).length() < 1e-4);
    }

    #[test]
    fn mounted_rig_tracks_its_anchor() {
        let mut rig = CameraRig::Mounted {
            anchor: Vec3::ZERO,
            camera: FirstPersonCamera::new(Vec3::ZERO, 0.0),
        };
        rig.set_anchor(Vec3::new(1.0, 2.0, 3.0));
        assert!((rig.eye(0.0) - (Vec3::new(1.0, 2.0, 3.0) + CameraRig::MOUNT_EYE_OFFSET)).length() < 1e-6);
    }
}
