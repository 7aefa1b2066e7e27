//! Recursive portal composition over a visibility mask.
//!
//! The nested-portal illusion is built in a single framebuffer: instead of
//! rendering each portal view to its own off-screen target, every draw is
//! restricted by an 8-bit per-pixel mask (the stencil plane on the GPU). The
//! compositor owns the *ordering* of stamp/draw/recurse operations and the
//! stamp-id bookkeeping; the actual drawing goes through the [`MaskedDraw`]
//! trait, implemented by the wgpu renderer for real frames and by a recording
//! backend in tests.
//!
//! Id allocation: the blue portal's subtree stamps 1, 2, 3, …, the orange
//! subtree 10, 11, 12, …. A child's id is always exactly one more than its
//! parent's, and with recursion bounded at 6 the two ranges never meet.

use glam::{Mat4, Vec3};

use crate::portal::Portal;

/// Base stamp id of the blue portal's recursion branch.
pub const BLUE_BASE_ID: u8 = 1;
/// Base stamp id of the orange portal's recursion branch.
pub const ORANGE_BASE_ID: u8 = 10;

/// Which portal silhouette a stamp operation rasterizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortalSide {
    Blue,
    Orange,
}

/// The visibility-mask drawing surface the compositor drives.
///
/// Stamp operations write the mask without touching color or depth; restrict
/// operations gate where subsequent color draws land; the draw operations
/// render scene content under the current restriction. `view` is the full
/// cumulative view matrix for the draw (including any portal teleportations);
/// `eye` is the matching camera position, used for lighting.
pub trait MaskedDraw {
    /// Rasterizes the portal silhouette, unconditionally overwriting the mask
    /// with `id`. Depth writes stay off.
    fn stamp_first(&mut self, portal: PortalSide, mvp: Mat4, id: u8);

    /// Rasterizes the portal silhouette, incrementing the mask to `id` only
    /// where it currently holds `id - 1`. Depth writes stay off.
    fn stamp_increment(&mut self, portal: PortalSide, mvp: Mat4, id: u8);

    /// Arms the next ordinary draw to also overwrite the mask with `id` as a
    /// side effect (no draw is issued here).
    fn stamp_with_current(&mut self, id: u8);

    /// Subsequent draws only land where the mask equals `id`.
    fn restrict_exact(&mut self, id: u8);

    /// Subsequent draws land where the mask holds `id` or anything deeper
    /// (stored >= id). Content in front of a window draws over it and lets
    /// the depth test resolve against what the recursion put inside.
    fn restrict_at_least(&mut self, id: u8);

    /// Floor geometry.
    fn draw_floor(&mut self, eye: Vec3, view: Mat4);

    /// Room walls, including the portal-accepting wall panels.
    fn draw_walls(&mut self, eye: Vec3, view: Mat4);

    /// The freely placed scene props (order-independent content).
    fn draw_props(&mut self, eye: Vec3, view: Mat4);

    /// Skybox/backdrop for one distinct view.
    fn draw_sky(&mut self, view: Mat4);

    /// The portal's translucent animated surface.
    fn draw_portal_surface(&mut self, portal: PortalSide, view: Mat4);

    /// The transparent prop, drawn after everything it blends against.
    fn draw_transparent(&mut self, eye: Vec3, view: Mat4);
}

/// Chooses how deep the portal-in-portal recursion goes for a given angle
/// between the linked portals.
///
/// Parallel portals (angle ~ 0) show no useful recursion; exactly opposed
/// portals (sin ~ 0) form a stable corridor worth six levels; anything else
/// shrinks too fast to see past two.
pub fn iterations_for_angle(angle: f32) -> u32 {
    if angle < 1e-6 {
        1
    } else if angle.sin().abs() < 1e-6 {
        6
    } else {
        2
    }
}

/// Drives the per-frame sequence of stamp/draw/recurse operations.
pub struct Compositor {
    iterations: u32,
}

impl Default for Compositor {
    fn default() -> Self {
        Self { iterations: 1 }
    }
}

impl Compositor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-derives the recursion depth after a portal placement change.
    pub fn set_portal_angle(&mut self, angle: f32) {
        self.iterations = iterations_for_angle(angle);
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Composites one frame.
    ///
    /// `view`/`proj` belong to the active camera, `eye` is its world
    /// position. Both portals must be linked.
    pub fn compose(
        &self,
        out: &mut impl MaskedDraw,
        blue: &Portal,
        orange: &Portal,
        eye: Vec3,
        view: Mat4,
        proj: Mat4,
    ) {
        assert!(
            blue.is_linked() && orange.is_linked(),
            "compositor needs a linked portal pair"
        );

        // Carve both portal windows out of the mask before anything draws.
        let pv = proj * view;
        out.stamp_first(PortalSide::Blue, pv * blue.model_matrix(), BLUE_BASE_ID);
        out.stamp_first(PortalSide::Orange, pv * orange.model_matrix(), ORANGE_BASE_ID);

        // Base view: everything outside the windows.
        out.restrict_exact(0);
        if eye.y < 0.0 {
            // Falling below ground level the floor is all that remains in
            // view; let its draw repair the mask so the windows cannot leak.
            out.stamp_with_current(0);
        }
        out.draw_floor(eye, view);
        out.restrict_exact(0);
        out.draw_walls(eye, view);
        // Props may stand in front of a window; they draw over it and their
        // depth occludes the recursion content drawn inside.
        out.restrict_at_least(0);
        out.draw_props(eye, view);

        // The nested views inside each window.
        self.render_inside(out, blue, PortalSide::Blue, view, proj, BLUE_BASE_ID, self.iterations);
        self.render_inside(
            out,
            orange,
            PortalSide::Orange,
            view,
            proj,
            ORANGE_BASE_ID,
            self.iterations,
        );

        // Backdrop last, once per distinct view: drawn earlier it would be
        // overwritten by the recursion, so it fills in under the same masks.
        out.restrict_exact(ORANGE_BASE_ID);
        out.draw_sky(view * orange.teleport_matrix());
        out.restrict_exact(BLUE_BASE_ID);
        out.draw_sky(view * blue.teleport_matrix());
        out.restrict_exact(0);
        out.draw_sky(view);

        // Translucent portal surfaces and the transparent prop for the base
        // view composite over whatever the recursion produced, so they must
        // pass on their own window pixels, not just mask 0.
        out.restrict_at_least(0);
        out.draw_portal_surface(PortalSide::Blue, view);
        out.draw_portal_surface(PortalSide::Orange, view);
        out.draw_transparent(eye, view);
    }

    /// Renders the view through one portal, recursing while iterations
    /// remain. `view` is the parent level's cumulative view.
    #[allow(clippy::too_many_arguments)]
    fn render_inside(
        &self,
        out: &mut impl MaskedDraw,
        portal: &Portal,
        side: PortalSide,
        view: Mat4,
        proj: Mat4,
        stamp_id: u8,
        iterations: u32,
    ) {
        // The teleportation applies on the world side of the view matrix so
        // lighting keeps working in world coordinates.
        let portal_view = view * portal.teleport_matrix();
        let eye = portal.teleport_point(camera_position(view).extend(1.0));

        if iterations <= 1 {
            // Innermost level: no deeper stamp, just fill the window.
            out.restrict_exact(stamp_id);
            out.draw_walls(eye, portal_view);
            out.draw_floor(eye, portal_view);
            out.draw_props(eye, portal_view);
        } else {
            // Stamp the next-deeper window inside this one, then draw this
            // level around it.
            out.stamp_increment(
                side,
                proj * portal_view * portal.model_matrix(),
                stamp_id + 1,
            );

            out.restrict_exact(stamp_id);
            out.draw_walls(eye, portal_view);
            out.draw_floor(eye, portal_view);

            // Props of this level may stand in front of the deeper window.
            out.restrict_at_least(stamp_id);
            out.draw_props(eye, portal_view);

            self.render_inside(out, portal, side, portal_view, proj, stamp_id + 1, iterations - 1);
        }

        // This level's own portal surface composites against whatever the
        // deeper levels produced inside it.
        out.restrict_at_least(stamp_id);
        out.draw_portal_surface(side, portal_view);

        // A single-level composite never stamped anything deeper, so the
        // transparent prop must stay strictly inside this window.
        if self.iterations == 1 {
            out.restrict_exact(stamp_id);
        }
        out.draw_transparent(eye, portal_view);
    }
}

/// Recovers the camera's world position from a view matrix.
///
/// For a rigid view transform `V = R·T`, the eye is `-Rᵀ·t`.
pub fn camera_position(view: Mat4) -> Vec3 {
    let inv = view.inverse();
    inv.w_axis.truncate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[derive(Clone, Debug, PartialEq)]
    enum Op {
        StampFirst(PortalSide, u8),
        StampIncrement(PortalSide, u8),
        StampWithCurrent(u8),
        RestrictExact(u8),
        RestrictAtLeast(u8),
        Floor,
        Walls,
        Props,
        Sky,
        PortalSurface(PortalSide),
        Transparent,
    }

    #[derive(Default)]
    struct Recorder {
        ops: Vec<Op>,
        floor_eyes: Vec<Vec3>,
    }

    impl MaskedDraw for Recorder {
        fn stamp_first(&mut self, portal: PortalSide, _mvp: Mat4, id: u8) {
            self.ops.push(Op::StampFirst(portal, id));
        }
        fn stamp_increment(&mut self, portal: PortalSide, _mvp: Mat4, id: u8) {
            self.ops.push(Op::StampIncrement(portal, id));
        }
        fn stamp_with_current(&mut self, id: u8) {
            self.ops.push(Op::StampWithCurrent(id));
        }
        fn restrict_exact(&mut self, id: u8) {
            self.ops.push(Op::RestrictExact(id));
        }
        fn restrict_at_least(&mut self, id: u8) {
            self.ops.push(Op::RestrictAtLeast(id));
        }
        fn draw_floor(&mut self, eye: Vec3, _view: Mat4) {
            self.ops.push(Op::Floor);
            self.floor_eyes.push(eye);
        }
        fn draw_walls(&mut self, _eye: Vec3, _view: Mat4) {
            self.ops.push(Op::Walls);
        }
        fn draw_props(&mut self, _eye: Vec3, _view: Mat4) {
            self.ops.push(Op::Props);
        }
        fn draw_sky(&mut self, _view: Mat4) {
            self.ops.push(Op::Sky);
        }
        fn draw_portal_surface(&mut self, portal: PortalSide, _view: Mat4) {
            self.ops.push(Op::PortalSurface(portal));
        }
        fn draw_transparent(&mut self, _eye: Vec3, _view: Mat4) {
            self.ops.push(Op::Transparent);
        }
    }

    fn linked_pair(blue_facing: Vec3, orange_facing: Vec3) -> (Portal, Portal, f32) {
        let mut blue = Portal::new(Vec3::new(0.0, 1.0, -15.0), blue_facing);
        let mut orange = Portal::new(Vec3::new(0.0, 1.0, -5.0), orange_facing);
        let angle = blue.link_to(&orange.clone());
        orange.link_to(&blue);
        (blue, orange, angle)
    }

    fn compose_with(iterations_angle: f32, blue_facing: Vec3, orange_facing: Vec3) -> Vec<Op> {
        let (blue, orange, angle) = linked_pair(blue_facing, orange_facing);
        assert!((angle - iterations_angle).abs() < 1e-4);

        let mut comp = Compositor::new();
        comp.set_portal_angle(angle);
        let mut rec = Recorder::default();
        let view = Mat4::look_at_rh(Vec3::new(0.0, 1.75, 0.0), Vec3::new(0.0, 1.75, -1.0), Vec3::Y);
        let proj = Mat4::perspective_rh(60f32.to_radians(), 16.0 / 9.0, 0.05, 500.0);
        comp.compose(&mut rec, &blue, &orange, Vec3::new(0.0, 1.75, 0.0), view, proj);
        rec.ops
    }

    #[test]
    fn depth_from_angle() {
        assert_eq!(iterations_for_angle(0.0), 1);
        assert_eq!(iterations_for_angle(1e-9), 1);
        assert_eq!(iterations_for_angle(std::f32::consts::PI), 6);
        assert_eq!(iterations_for_angle(std::f32::consts::FRAC_PI_2), 2);
        assert_eq!(iterations_for_angle(0.3), 2);
    }

    #[test]
    fn frame_starts_by_carving_both_windows() {
        let ops = compose_with(std::f32::consts::PI, Vec3::Z, Vec3::NEG_Z);
        assert_eq!(ops[0], Op::StampFirst(PortalSide::Blue, BLUE_BASE_ID));
        assert_eq!(ops[1], Op::StampFirst(PortalSide::Orange, ORANGE_BASE_ID));
        // Base scene is restricted to mask 0 right after.
        assert_eq!(ops[2], Op::RestrictExact(0));
    }

    #[test]
    fn stamp_ids_increment_by_one_within_a_branch() {
        let ops = compose_with(std::f32::consts::PI, Vec3::Z, Vec3::NEG_Z);

        let mut blue_ids = vec![BLUE_BASE_ID];
        let mut orange_ids = vec![ORANGE_BASE_ID];
        for op in &ops {
            if let Op::StampIncrement(side, id) = op {
                match side {
                    PortalSide::Blue => blue_ids.push(*id),
                    PortalSide::Orange => orange_ids.push(*id),
                }
            }
        }

        // Depth 6 stamps five deeper windows per branch.
        assert_eq!(blue_ids, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(orange_ids, vec![10, 11, 12, 13, 14, 15]);
    }

    #[test]
    fn branch_namespaces_never_overlap() {
        let ops = compose_with(std::f32::consts::PI, Vec3::Z, Vec3::NEG_Z);
        for op in &ops {
            if let Op::StampIncrement(side, id) = op {
                match side {
                    PortalSide::Blue => assert!(*id < ORANGE_BASE_ID),
                    PortalSide::Orange => assert!(*id >= ORANGE_BASE_ID),
                }
            }
        }
    }

    #[test]
    fn parallel_portals_skip_deeper_stamps() {
        // Both facing +z: angle 0, a single iteration, no increments.
        let ops = compose_with(0.0, Vec3::Z, Vec3::Z);
        assert!(!ops.iter().any(|op| matches!(op, Op::StampIncrement(..))));
        // The innermost level still draws the rooms inside both windows.
        assert!(ops.contains(&Op::RestrictExact(BLUE_BASE_ID)));
        assert!(ops.contains(&Op::RestrictExact(ORANGE_BASE_ID)));
    }

    #[test]
    fn sky_is_drawn_once_per_distinct_view_and_last() {
        let ops = compose_with(std::f32::consts::PI, Vec3::Z, Vec3::NEG_Z);
        let sky_count = ops.iter().filter(|op| matches!(op, Op::Sky)).count();
        assert_eq!(sky_count, 3);

        // All sky draws come after every stamp.
        let last_stamp = ops
            .iter()
            .rposition(|op| matches!(op, Op::StampFirst(..) | Op::StampIncrement(..)))
            .unwrap();
        let first_sky = ops.iter().position(|op| matches!(op, Op::Sky)).unwrap();
        assert!(first_sky > last_stamp);

        // Each sky draw is preceded by an exact restriction to its view's id.
        let expected = [ORANGE_BASE_ID, BLUE_BASE_ID, 0];
        let mut seen = vec![];
        for (i, op) in ops.iter().enumerate() {
            if matches!(op, Op::Sky) {
                match ops[i - 1] {
                    Op::RestrictExact(id) => seen.push(id),
                    ref other => panic!("sky not restricted: {other:?}"),
                }
            }
        }
        assert_eq!(seen, expected);
    }

    #[test]
    fn deeper_window_is_stamped_before_level_draws() {
        let ops = compose_with(std::f32::consts::PI, Vec3::Z, Vec3::NEG_Z);
        // Find the first blue increment; the walls draw restricted to the
        // parent id must follow it, never precede it.
        let stamp2 = ops
            .iter()
            .position(|op| *op == Op::StampIncrement(PortalSide::Blue, 2))
            .unwrap();
        let walls_in_blue = ops
            .iter()
            .enumerate()
            .position(|(i, op)| {
                *op == Op::Walls && i > 2 && ops[..i].contains(&Op::RestrictExact(BLUE_BASE_ID))
            })
            .unwrap();
        assert!(stamp2 < walls_in_blue);
    }

    #[test]
    fn below_ground_arms_mask_repair() {
        let (blue, orange, angle) = linked_pair(Vec3::Z, Vec3::NEG_Z);
        let mut comp = Compositor::new();
        comp.set_portal_angle(angle);
        let mut rec = Recorder::default();
        let view = Mat4::look_at_rh(Vec3::new(0.0, -1.0, 0.0), Vec3::new(0.0, -1.0, -1.0), Vec3::Y);
        let proj = Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.05, 500.0);
        comp.compose(&mut rec, &blue, &orange, Vec3::new(0.0, -1.0, 0.0), view, proj);
        assert!(rec.ops.contains(&Op::StampWithCurrent(0)));
    }

    #[test]
    fn unlinked_pair_is_rejected() {
        let blue = Portal::new(Vec3::new(0.0, 1.0, -15.0), Vec3::Z);
        let orange = Portal::new(Vec3::new(0.0, 1.0, -5.0), Vec3::NEG_Z);
        let comp = Compositor::new();
        let mut rec = Recorder::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            comp.compose(
                &mut rec,
                &blue,
                &orange,
                Vec3::ZERO,
                Mat4::IDENTITY,
                Mat4::IDENTITY,
            )
        }));
        assert!(result.is_err());
    }

    #[test]
    fn nested_eye_accumulates_one_teleport_per_level() {
        let (blue, orange, angle) = linked_pair(Vec3::Z, Vec3::NEG_Z);
        let mut comp = Compositor::new();
        comp.set_portal_angle(angle);
        let mut rec = Recorder::default();
        let eye = Vec3::new(0.0, 1.75, 0.0);
        let view = Mat4::look_at_rh(eye, Vec3::new(0.0, 1.75, -1.0), Vec3::Y);
        let proj = Mat4::perspective_rh(60f32.to_radians(), 16.0 / 9.0, 0.05, 500.0);
        comp.compose(&mut rec, &blue, &orange, eye, view, proj);

        // Base floor plus six blue levels before the orange branch; each
        // level's lighting eye is the previous level's eye pushed through the
        // blue teleport once, matching that level's cumulative view.
        assert!((rec.floor_eyes[0] - eye).length() < 1e-4);
        let mut expected = eye;
        for level in 1..=6 {
            expected = blue.teleport_point(expected.extend(1.0));
            assert!((rec.floor_eyes[level] - expected).length() < 1e-3);
        }
    }

    #[test]
    fn camera_position_recovers_eye() {
        let eye = Vec3::new(3.0, 1.75, -7.0);
        let view = Mat4::look_at_rh(eye, Vec3::new(0.0, 1.0, 0.0), Vec3::Y);
        assert!((camera_position(view) - eye).length() < 1e-4);
    }

    /// Simulates the mask state of one pixel that lies inside the blue
    /// window and is also covered by a prop standing in front of it,
    /// applying the stencil rules the renderer's pipelines implement.
    #[derive(Default)]
    struct BluePixel {
        stencil: u8,
        exact: bool,
        reference: u8,
        stamp_on_draw: bool,
        /// References under which a blue surface draw passed the mask test.
        surface_refs: Vec<u8>,
        /// References under which a prop draw passed the mask test.
        prop_refs: Vec<u8>,
    }

    impl BluePixel {
        fn passes(&self) -> bool {
            if self.exact {
                self.stencil == self.reference
            } else {
                // The at-least restriction: reference <= stored.
                self.reference <= self.stencil
            }
        }
    }

    impl MaskedDraw for BluePixel {
        fn stamp_first(&mut self, portal: PortalSide, _mvp: Mat4, id: u8) {
            if portal == PortalSide::Blue {
                self.stencil = id;
            }
        }
        fn stamp_increment(&mut self, portal: PortalSide, _mvp: Mat4, id: u8) {
            if portal == PortalSide::Blue && self.stencil == id - 1 {
                self.stencil = id;
            }
        }
        fn stamp_with_current(&mut self, id: u8) {
            self.exact = true;
            self.reference = id;
            self.stamp_on_draw = true;
        }
        fn restrict_exact(&mut self, id: u8) {
            self.exact = true;
            self.reference = id;
            self.stamp_on_draw = false;
        }
        fn restrict_at_least(&mut self, id: u8) {
            self.exact = false;
            self.reference = id;
            self.stamp_on_draw = false;
        }
        fn draw_floor(&mut self, _eye: Vec3, _view: Mat4) {}
        fn draw_walls(&mut self, _eye: Vec3, _view: Mat4) {}
        fn draw_props(&mut self, _eye: Vec3, _view: Mat4) {
            if self.passes() {
                self.prop_refs.push(self.reference);
                if self.stamp_on_draw {
                    self.stencil = self.reference;
                }
            }
        }
        fn draw_sky(&mut self, _view: Mat4) {}
        fn draw_portal_surface(&mut self, portal: PortalSide, _view: Mat4) {
            if portal == PortalSide::Blue && self.passes() {
                self.surface_refs.push(self.reference);
            }
        }
        fn draw_transparent(&mut self, _eye: Vec3, _view: Mat4) {}
    }

    fn composed_blue_pixel() -> BluePixel {
        let (blue, orange, angle) = linked_pair(Vec3::Z, Vec3::NEG_Z);
        let mut comp = Compositor::new();
        comp.set_portal_angle(angle);
        let mut pixel = BluePixel::default();
        let eye = Vec3::new(0.0, 1.75, 0.0);
        let view = Mat4::look_at_rh(eye, Vec3::new(0.0, 1.75, -1.0), Vec3::Y);
        let proj = Mat4::perspective_rh(60f32.to_radians(), 16.0 / 9.0, 0.05, 500.0);
        comp.compose(&mut pixel, &blue, &orange, eye, view, proj);
        pixel
    }

    #[test]
    fn portal_surface_covers_its_own_window() {
        let pixel = composed_blue_pixel();

        // The antiparallel corridor stamps the pixel all the way down.
        assert_eq!(pixel.stencil, 6);

        // Every level's surface passes inside its own window as the
        // recursion unwinds, and the base-view surface (reference 0) passes
        // over the fully stamped pixel last.
        assert_eq!(pixel.surface_refs, vec![6, 5, 4, 3, 2, 1, 0]);
    }

    #[test]
    fn props_in_front_of_a_window_are_not_clipped() {
        let pixel = composed_blue_pixel();

        // Base-view props draw on the window pixel (depth decides the rest),
        // and each recursion level's props can reach its deeper window.
        assert_eq!(pixel.prop_refs, vec![0, 1, 2, 3, 4, 5, 6]);
    }
}
