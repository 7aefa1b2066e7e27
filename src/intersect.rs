//! Ray–triangle intersection queries against CPU-side meshes.
//!
//! Rendering geometry lives on the GPU, but floor support, portal placement
//! and picking all need to ask "where does this ray hit that mesh?". Meshes
//! that answer such queries keep a [`TriMesh`] shadow: positions, triangle
//! indices and per-vertex normals in mesh-local space. Callers transform the
//! ray into local space first; this module never sees a transform.
//!
//! The single-triangle test is Möller–Trumbore. Degenerate configurations
//! (ray parallel to the triangle plane, hits behind the origin) are simply
//! "no hit" — collision callers must tolerate an absent result.

use glam::Vec3;

const EPSILON: f32 = 1e-7;

/// A ray with an origin and a direction.
///
/// The direction is normalized on construction so hit distances are in world
/// units.
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin: Vec3,
    pub dir: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, dir: Vec3) -> Self {
        Self {
            origin,
            dir: dir.normalize_or_zero(),
        }
    }

    /// Point along the ray at distance `t` from the origin.
    #[inline]
    pub fn point_at(&self, t: f32) -> Vec3 {
        self.origin + self.dir * t
    }
}

/// A surface point found by a ray query.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hit {
    /// Intersection point, in the space the query ran in.
    pub point: Vec3,
    /// Normal of the first vertex of the hit triangle (flat-shaded
    /// approximation, not interpolated).
    pub normal: Vec3,
}

/// Möller–Trumbore intersection of a ray with one triangle.
///
/// Returns the intersection point, or `None` when the ray is parallel to the
/// triangle plane, misses the barycentric bounds, or the hit lies behind the
/// origin.
pub fn intersect_triangle(ray: &Ray, v0: Vec3, v1: Vec3, v2: Vec3) -> Option<Vec3> {
    let edge1 = v1 - v0;
    let edge2 = v2 - v0;

    let h = ray.dir.cross(edge2);
    let det = edge1.dot(h);

    // Near-zero determinant: ray lies in (or parallel to) the triangle plane.
    if det.abs() < EPSILON {
        return None;
    }

    let inv_det = 1.0 / det;
    let s = ray.origin - v0;

    let u = inv_det * s.dot(h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(edge1);
    let v = inv_det * ray.dir.dot(q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = inv_det * edge2.dot(q);
    if t > EPSILON {
        Some(ray.point_at(t))
    } else {
        None
    }
}

/// An indexed triangle soup for intersection queries.
#[derive(Clone, Debug, Default)]
pub struct TriMesh {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    /// Triangle index triples, `indices.len() % 3 == 0`.
    pub indices: Vec<u32>,
}

impl TriMesh {
    pub fn new(positions: Vec<Vec3>, normals: Vec<Vec3>, indices: Vec<u32>) -> Self {
        debug_assert_eq!(indices.len() % 3, 0);
        debug_assert_eq!(positions.len(), normals.len());
        Self {
            positions,
            normals,
            indices,
        }
    }

    /// Finds the intersection nearest to the ray origin, scanning every
    /// triangle linearly.
    pub fn nearest_hit(&self, ray: &Ray) -> Option<Hit> {
        let mut nearest: Option<Hit> = None;
        let mut nearest_d2 = f32::INFINITY;

        for tri in self.indices.chunks_exact(3) {
            let v0 = self.positions[tri[0] as usize];
            let v1 = self.positions[tri[1] as usize];
            let v2 = self.positions[tri[2] as usize];

            if let Some(point) = intersect_triangle(ray, v0, v1, v2) {
                let d2 = (point - ray.origin).length_squared();
                if d2 < nearest_d2 {
                    nearest_d2 = d2;
                    nearest = Some(Hit {
                        point,
                        normal: self.normals[tri[0] as usize],
                    });
                }
            }
        }

        nearest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_triangle() -> (Vec3, Vec3, Vec3) {
        (
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        )
    }

    #[test]
    fn hits_known_point() {
        let (v0, v1, v2) = unit_triangle();
        let target = Vec3::new(0.25, 0.25, 0.0);
        let origin = Vec3::new(0.25, 0.25, 5.0);
        let ray = Ray::new(origin, target - origin);

        let hit = intersect_triangle(&ray, v0, v1, v2).expect("should hit");
        assert!((hit - target).length() < 1e-5);
    }

    #[test]
    fn misses_outside_barycentric_bounds() {
        let (v0, v1, v2) = unit_triangle();
        let ray = Ray::new(Vec3::new(0.9, 0.9, 1.0), Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(intersect_triangle(&ray, v0, v1, v2), None);
    }

    #[test]
    fn rejects_parallel_ray() {
        let (v0, v1, v2) = unit_triangle();
        let ray = Ray::new(Vec3::new(0.0, 0.0, 1.0), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(intersect_triangle(&ray, v0, v1, v2), None);
    }

    #[test]
    fn rejects_hit_behind_origin() {
        let (v0, v1, v2) = unit_triangle();
        // Triangle is behind the origin for this direction.
        let ray = Ray::new(Vec3::new(0.25, 0.25, -1.0), Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(intersect_triangle(&ray, v0, v1, v2), None);
    }

    fn two_quads() -> TriMesh {
        // Two parallel quads facing +z, one at z=0 and one at z=-2.
        let positions = vec![
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::new(1.0, -1.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(-1.0, 1.0, 0.0),
            Vec3::new(-1.0, -1.0, -2.0),
            Vec3::new(1.0, -1.0, -2.0),
            Vec3::new(1.0, 1.0, -2.0),
            Vec3::new(-1.0, 1.0, -2.0),
        ];
        let normals = vec![Vec3::Z; 8];
        let indices = vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4];
        TriMesh::new(positions, normals, indices)
    }

    #[test]
    fn nearest_hit_prefers_closer_surface() {
        let mesh = two_quads();
        let ray = Ray::new(Vec3::new(0.0, 0.0, 3.0), Vec3::new(0.0, 0.0, -1.0));
        let hit = mesh.nearest_hit(&ray).expect("should hit front quad");
        assert!((hit.point - Vec3::new(0.0, 0.0, 0.0)).length() < 1e-5);
        assert_eq!(hit.normal, Vec3::Z);
    }

    #[test]
    fn nearest_hit_none_when_aimed_away() {
        let mesh = two_quads();
        let ray = Ray::new(Vec3::new(0.0, 0.0, 3.0), Vec3::new(0.0, 0.0, 1.0));
        assert!(mesh.nearest_hit(&ray).is_none());
    }
}
