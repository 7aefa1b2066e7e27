//! The demo room: procedural geometry, props, portals, and portal firing.
//!
//! Everything visible is either static room geometry (floor, walls, the
//! portal-accepting wall panels) or an entity in the hecs world carrying a
//! [`Transform`] and a [`RenderMesh`]. The floor and the portal walls keep
//! [`TriMesh`] collision shadows; the rest is render-only.

use glam::{Quat, Vec3, Vec4};
use hecs::{Entity, World};

use crate::assets::{Assets, MeshId, TextureId};
use crate::compositor::PortalSide;
use crate::gpu::GpuContext;
use crate::intersect::{Ray, TriMesh};
use crate::mesh::{Geometry, Transform};
use crate::portal::Portal;
use crate::spline::Spline;
use crate::texture::Texture;

/// Half-extent of the room in x.
const ROOM_HALF_WIDTH: f32 = 12.0;
/// Room runs from z = -ROOM_NEAR_Z to z = ROOM_FAR_Z... front and back.
const ROOM_NEAR_Z: f32 = 10.0;
const ROOM_FAR_Z: f32 = -20.0;
const WALL_HEIGHT: f32 = 5.0;

/// Vertical band a fired portal's centre may occupy, keeping the whole
/// ellipse on the wall.
const PORTAL_MIN_Y: f32 = 1.0;
const PORTAL_MAX_Y: f32 = WALL_HEIGHT - 1.0;

/// Renderable component: which mesh, which texture, what tint.
#[derive(Clone, Copy, Debug)]
pub struct RenderMesh {
    pub mesh: MeshId,
    pub texture: Option<TextureId>,
    pub color: Vec4,
}

/// Marker for the translucent prop, drawn after everything it blends over.
pub struct Translucent;

/// Marker for props the player can mount the camera on.
pub struct Pickable;

/// Component that moves an entity along a closed spline.
pub struct SplinePath {
    pub spline: Spline,
    pub speed: f32,
}

/// One static surface: a GPU mesh plus its texture.
#[derive(Clone, Copy)]
pub struct Surface {
    pub mesh: MeshId,
    pub texture: TextureId,
}

pub struct Scene {
    pub world: World,
    pub assets: Assets,

    pub floor: Surface,
    pub walls: Surface,
    /// Silhouette mesh shared by both portals, in portal-local space.
    pub portal_disk: MeshId,

    pub floor_collision: TriMesh,
    /// Collision shadow of the portal-accepting panels only; ordinary walls
    /// reject portal shots by simply not being in this mesh.
    pub portal_wall_collision: TriMesh,

    pub blue: Portal,
    pub orange: Portal,
    /// Magnitude of the yaw between the linked portals, fed to the
    /// compositor for its recursion depth.
    pub portal_angle: f32,

    /// Loop for the rail camera.
    pub rail: Spline,
}

impl Scene {
    pub fn new(gpu: &GpuContext) -> Self {
        let mut assets = Assets::new();
        let mut world = World::new();

        let tiles = assets.add_texture(Texture::tiles(gpu, 128, 11));
        let concrete = assets.add_texture(Texture::concrete(gpu, 128, 47));

        // Floor: 24 x 30, centred between the near and far walls.
        let floor_geometry = Geometry::plane(24.0).transformed(
            glam::Mat4::from_translation(Vec3::new(0.0, 0.0, (ROOM_NEAR_Z + ROOM_FAR_Z) * 0.5))
                * glam::Mat4::from_scale(Vec3::new(1.0, 1.0, (ROOM_NEAR_Z - ROOM_FAR_Z) / 24.0)),
        );
        let floor_collision = floor_geometry.tri_mesh();
        let floor = Surface {
            mesh: assets.add_geometry(gpu, &floor_geometry),
            texture: tiles,
        };

        // Portal-accepting panels: the far wall facing +z and the near wall
        // facing -z.
        let mut portal_walls = Geometry::wall(2.0 * ROOM_HALF_WIDTH, WALL_HEIGHT)
            .transformed(glam::Mat4::from_translation(Vec3::new(0.0, 0.0, ROOM_FAR_Z)));
        portal_walls.merge(
            &Geometry::wall(2.0 * ROOM_HALF_WIDTH, WALL_HEIGHT).transformed(
                glam::Mat4::from_translation(Vec3::new(0.0, 0.0, ROOM_NEAR_Z))
                    * glam::Mat4::from_rotation_y(std::f32::consts::PI),
            ),
        );
        let portal_wall_collision = portal_walls.tri_mesh();

        // Side walls, portal-proof.
        let depth = ROOM_NEAR_Z - ROOM_FAR_Z;
        let mid_z = (ROOM_NEAR_Z + ROOM_FAR_Z) * 0.5;
        let mut wall_geometry = Geometry::wall(depth, WALL_HEIGHT).transformed(
            glam::Mat4::from_translation(Vec3::new(-ROOM_HALF_WIDTH, 0.0, mid_z))
                * glam::Mat4::from_rotation_y(std::f32::consts::FRAC_PI_2),
        );
        wall_geometry.merge(
            &Geometry::wall(depth, WALL_HEIGHT).transformed(
                glam::Mat4::from_translation(Vec3::new(ROOM_HALF_WIDTH, 0.0, mid_z))
                    * glam::Mat4::from_rotation_y(-std::f32::consts::FRAC_PI_2),
            ),
        );
        wall_geometry.merge(&portal_walls);
        let walls = Surface {
            mesh: assets.add_geometry(gpu, &wall_geometry),
            texture: concrete,
        };

        let portal_disk = assets.add_geometry(gpu, &Geometry::portal_disk());

        // Props.
        let sphere = assets.add_geometry(gpu, &Geometry::sphere(32, 16));
        let cube = assets.add_geometry(gpu, &Geometry::cube());

        world.spawn((
            Transform::from_position(Vec3::new(-4.0, 0.5, -8.0)),
            RenderMesh {
                mesh: sphere,
                texture: None,
                color: Vec4::new(0.85, 0.3, 0.25, 1.0),
            },
            Pickable,
        ));
        world.spawn((
            Transform::from_position(Vec3::new(4.0, 0.5, -10.0)),
            RenderMesh {
                mesh: cube,
                texture: None,
                color: Vec4::new(0.3, 0.65, 0.3, 1.0),
            },
            Pickable,
        ));
        world.spawn((
            Transform::from_position(Vec3::new(4.0, 1.25, -10.0))
                .uniform_scale(0.5)
                .rotation(Quat::from_rotation_y(0.6)),
            RenderMesh {
                mesh: cube,
                texture: None,
                color: Vec4::new(0.8, 0.75, 0.25, 1.0),
            },
        ));

        // A sphere circling the room on a closed spline.
        world.spawn((
            Transform::from_position(Vec3::new(0.0, 1.5, -5.0)).uniform_scale(0.8),
            RenderMesh {
                mesh: sphere,
                texture: None,
                color: Vec4::new(0.4, 0.45, 0.9, 1.0),
            },
            SplinePath {
                spline: Spline::new(vec![
                    Vec3::new(-7.0, 1.5, -5.0),
                    Vec3::new(0.0, 2.5, -14.0),
                    Vec3::new(7.0, 1.5, -5.0),
                    Vec3::new(0.0, 1.2, 2.0),
                ]),
                speed: 0.25,
            },
            Pickable,
        ));

        // The transparent prop.
        world.spawn((
            Transform::from_position(Vec3::new(0.0, 1.0, -3.0)).uniform_scale(1.5),
            RenderMesh {
                mesh: cube,
                texture: None,
                color: Vec4::new(0.4, 0.7, 0.9, 0.35),
            },
            Translucent,
        ));

        // Opposed portals on the far and near walls: a straight corridor.
        let mut blue = Portal::new(Vec3::new(-3.0, 1.0, ROOM_FAR_Z), Vec3::Z);
        let mut orange = Portal::new(Vec3::new(3.0, 1.0, ROOM_NEAR_Z), Vec3::NEG_Z);
        let portal_angle = blue.link_to(&orange);
        orange.link_to(&blue);

        let rail = Spline::new(vec![
            Vec3::new(-9.0, 3.0, 5.0),
            Vec3::new(-9.0, 3.5, -16.0),
            Vec3::new(9.0, 3.0, -16.0),
            Vec3::new(9.0, 3.5, 5.0),
        ]);

        Self {
            world,
            assets,
            floor,
            walls,
            portal_disk,
            floor_collision,
            portal_wall_collision,
            blue,
            orange,
            portal_angle,
            rail,
        }
    }

    /// Advances the spline followers.
    pub fn update(&mut self, time: f32) {
        for (_entity, (transform, path)) in self.world.query_mut::<(&mut Transform, &SplinePath)>()
        {
            let t = time * path.speed * path.spline.len() as f32;
            transform.position = path.spline.position(t);
            let along = path.spline.tangent(t);
            if along.length_squared() > 1e-8 {
                transform.rotation = Quat::from_rotation_y(f32::atan2(along.x, along.z));
            }
        }
    }

    /// Fires one portal along `ray`. Only the portal-accepting panels take a
    /// shot; a hit re-places that portal and re-links the pair. Returns the
    /// new angle between the portals when the shot landed.
    pub fn fire_portal(&mut self, side: PortalSide, ray: &Ray) -> Option<f32> {
        let hit = self.portal_wall_collision.nearest_hit(ray)?;
        let position = Vec3::new(
            hit.point.x.clamp(
                -ROOM_HALF_WIDTH + 1.0,
                ROOM_HALF_WIDTH - 1.0,
            ),
            hit.point.y.clamp(PORTAL_MIN_Y, PORTAL_MAX_Y),
            hit.point.z,
        );

        match side {
            PortalSide::Blue => self.blue.place(position, hit.normal),
            PortalSide::Orange => self.orange.place(position, hit.normal),
        }
        self.portal_angle = self.blue.link_to(&self.orange);
        self.orange.link_to(&self.blue);

        log::info!(
            "{side:?} portal placed at {position:?}, pair angle {:.3}",
            self.portal_angle
        );
        Some(self.portal_angle)
    }

    /// Props the camera can be mounted on, in a stable order for stamping.
    pub fn pickables(&self) -> Vec<Entity> {
        let mut entities: Vec<Entity> = self
            .world
            .query::<&Pickable>()
            .iter()
            .map(|(entity, _)| entity)
            .collect();
        entities.sort();
        entities
    }

    /// World position of an entity, if it still exists and has a transform.
    pub fn entity_position(&self, entity: Entity) -> Option<Vec3> {
        self.world
            .get::<&Transform>(entity)
            .ok()
            .map(|t| t.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Scene::new needs a GPU; the collision and portal logic is testable
    // without one by rebuilding the same geometry.

    fn portal_walls() -> TriMesh {
        let mut g = Geometry::wall(24.0, WALL_HEIGHT)
            .transformed(glam::Mat4::from_translation(Vec3::new(0.0, 0.0, ROOM_FAR_Z)));
        g.merge(
            &Geometry::wall(24.0, WALL_HEIGHT).transformed(
                glam::Mat4::from_translation(Vec3::new(0.0, 0.0, ROOM_NEAR_Z))
                    * glam::Mat4::from_rotation_y(std::f32::consts::PI),
            ),
        );
        g.tri_mesh()
    }

    #[test]
    fn portal_shot_hits_the_far_wall() {
        let walls = portal_walls();
        let ray = Ray::new(Vec3::new(0.0, 1.75, 0.0), Vec3::new(0.1, 0.0, -1.0));
        let hit = walls.nearest_hit(&ray).expect("far wall in the way");
        assert!((hit.point.z - ROOM_FAR_Z).abs() < 1e-4);
        assert!((hit.normal - Vec3::Z).length() < 1e-5);
    }

    #[test]
    fn portal_shot_through_the_side_misses() {
        let walls = portal_walls();
        let ray = Ray::new(Vec3::new(0.0, 1.75, 0.0), Vec3::X);
        assert!(walls.nearest_hit(&ray).is_none());
    }

    #[test]
    fn opposed_panels_face_each_other() {
        let walls = portal_walls();
        let back = Ray::new(Vec3::new(0.0, 2.0, 0.0), Vec3::Z);
        let hit = walls.nearest_hit(&back).expect("near wall behind");
        assert!((hit.point.z - ROOM_NEAR_Z).abs() < 1e-4);
        // The near panel's normal passes through a rotation, so it carries
        // float error.
        assert!((hit.normal - Vec3::NEG_Z).length() < 1e-5);
    }
}
