//! First-person movement: walking, gravity, jumping, and portal crossing.
//!
//! The controller owns only the vertical velocity and the last point of
//! solid ground; position and orientation live in the camera it drives.
//! Per frame the update runs in a fixed order: horizontal movement from the
//! keys, then portal crossing, then the floor query and vertical
//! integration. Crossing first means the floor is always sampled on the
//! side of the portal the player ended up on.

use crate::camera::FirstPersonCamera;
use crate::intersect::{Ray, TriMesh};
use crate::portal::Portal;
use glam::Vec3;

const GRAVITY: f32 = 10.0;
const EYE_HEIGHT: f32 = 1.75;
const WALK_SPEED: f32 = 3.0;
const RUN_MULTIPLIER: f32 = 2.0;
const JUMP_VELOCITY: f32 = 3.5;
/// Largest snap-up distance when standing on remembered ground; bigger gaps
/// mean the player really is falling.
const FALL_SNAP: f32 = 0.1;

/// Movement keys held this frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct MoveInput {
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
    pub run: bool,
}

/// Walking-physics state for the first-person camera.
#[derive(Clone, Copy, Debug)]
pub struct PlayerController {
    velocity: f32,
    /// Last floor point that was directly underfoot. When the floor query
    /// misses (overhangs, mesh seams), the player is held over this point
    /// instead of falling through the world.
    last_ground: Vec3,
}

impl PlayerController {
    pub fn new(spawn_ground: Vec3) -> Self {
        Self {
            velocity: 0.0,
            last_ground: spawn_ground,
        }
    }

    /// Starts a jump. Deliberately unconditional, as in most simple FPS
    /// controllers; the caller decides whether to gate it on key repeat.
    pub fn jump(&mut self) {
        self.velocity = JUMP_VELOCITY;
    }

    pub fn vertical_velocity(&self) -> f32 {
        self.velocity
    }

    /// Advances the player one frame.
    pub fn update(
        &mut self,
        camera: &mut FirstPersonCamera,
        input: MoveInput,
        dt: f32,
        floor: &TriMesh,
        blue: &Portal,
        orange: &Portal,
    ) {
        self.walk(camera, input, dt);
        self.cross_portals(camera, blue, orange);
        self.fall(camera, dt, floor);
    }

    fn walk(&self, camera: &mut FirstPersonCamera, input: MoveInput, dt: f32) {
        let mut wish = Vec3::ZERO;
        if input.forward {
            wish += camera.flat_facing();
        }
        if input.backward {
            wish -= camera.flat_facing();
        }
        if input.right {
            wish += camera.right();
        }
        if input.left {
            wish -= camera.right();
        }

        let wish = wish.normalize_or_zero();
        let speed = if input.run {
            WALK_SPEED * RUN_MULTIPLIER
        } else {
            WALK_SPEED
        };
        camera.position += wish * speed * dt;
    }

    fn cross_portals(&mut self, camera: &mut FirstPersonCamera, blue: &Portal, orange: &Portal) {
        let crossed = if blue.is_colliding(camera.position) {
            Some(blue)
        } else if orange.is_colliding(camera.position) {
            Some(orange)
        } else {
            None
        };

        if let Some(portal) = crossed {
            camera.position = portal.teleport_point(camera.position.extend(1.0));
            camera.rotate_view(portal.view_angle());
            // Ground memory belongs to the side we left.
            self.last_ground = camera.position - Vec3::Y * EYE_HEIGHT;
            log::debug!(
                "crossed portal, now at {:?} yaw {:.3}",
                camera.position,
                camera.yaw()
            );
        }
    }

    fn fall(&mut self, camera: &mut FirstPersonCamera, dt: f32, floor: &TriMesh) {
        let ray = Ray::new(camera.position, Vec3::NEG_Y);
        let new_y = camera.position.y + self.velocity * dt - GRAVITY * dt * dt;
        self.velocity -= GRAVITY * dt;

        match floor.nearest_hit(&ray) {
            Some(hit) => {
                let ground_y = hit.point.y + EYE_HEIGHT;
                if new_y < ground_y {
                    camera.position.y = ground_y;
                    self.velocity = 0.0;
                } else {
                    camera.position.y = new_y;
                }
                self.last_ground = hit.point;
            }
            None => {
                // Off the edge of the walkable mesh: hold the player over the
                // last known ground point rather than dropping them forever.
                log::debug!("no floor under {:?}, using last ground", camera.position);
                let ground_y = self.last_ground.y + EYE_HEIGHT;
                if new_y < ground_y && ground_y - new_y < FALL_SNAP {
                    camera.position.y = ground_y;
                    self.velocity = 0.0;
                } else {
                    camera.position.y = new_y;
                }
                camera.position.x = self.last_ground.x;
                camera.position.z = self.last_ground.z;
            }
        }
    }
}
