//! Closed-loop Catmull-Rom splines.
//!
//! Used to drive the rail camera and spline-following props. The spline is a
//! pure function of time: `position(t)` and `tangent(t)` over a cyclic
//! control-point sequence, where the integer part of `t` selects the segment
//! and the fractional part interpolates within it. One unit of time spans one
//! segment, so the curve repeats every `len()` time units.

use glam::Vec3;

/// A cyclic Catmull-Rom spline through a set of control points.
#[derive(Clone, Debug, Default)]
pub struct Spline {
    points: Vec<Vec3>,
}

impl Spline {
    /// Creates a spline from its control points.
    ///
    /// Needs at least four points to produce a meaningful curve; fewer points
    /// still evaluate (indexing wraps) but collapse toward the points given.
    pub fn new(points: Vec<Vec3>) -> Self {
        Self { points }
    }

    /// Appends one control point at the end of the loop.
    pub fn push(&mut self, point: Vec3) {
        self.points.push(point);
    }

    /// Number of control points (and the period of the curve in time units).
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The four segment neighbours for a given time, with the fractional
    /// remainder of `t` within the segment.
    fn segment(&self, time: f32) -> (Vec3, Vec3, Vec3, Vec3, f32) {
        let n = self.points.len() as isize;
        // Shift by one period so slightly negative times stay in range,
        // matching the cyclic wrap-around.
        let i = time.floor() as isize + n;
        let t = time - time.floor();

        let at = |k: isize| self.points[(k.rem_euclid(n)) as usize];
        (at(i - 1), at(i), at(i + 1), at(i + 2), t)
    }

    /// Position on the curve at `time`.
    pub fn position(&self, time: f32) -> Vec3 {
        let (p0, p1, p2, p3, t) = self.segment(time);

        let t2 = t * t;
        let t3 = t * t2;

        0.5 * (p0 * (-t3 + 2.0 * t2 - t)
            + p1 * (3.0 * t3 - 5.0 * t2 + 2.0)
            + p2 * (-3.0 * t3 + 4.0 * t2 + t)
            + p3 * (t3 - t2))
    }

    /// Tangent of the curve at `time`.
    ///
    /// Not normalized; callers that need a facing direction normalize it
    /// themselves.
    pub fn tangent(&self, time: f32) -> Vec3 {
        let (p0, p1, p2, p3, t) = self.segment(time);

        let t2 = t * t;

        0.5 * (p0 * (-3.0 * t2 + 4.0 * t - 1.0)
            + p1 * (9.0 * t2 - 10.0 * t)
            + p2 * (-9.0 * t2 + 8.0 * t + 1.0)
            + p3 * (3.0 * t2 - 2.0 * t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Spline {
        Spline::new(vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(0.0, 0.0, 1.0),
        ])
    }

    #[test]
    fn passes_through_control_points() {
        let s = square();
        for (i, expected) in [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(0.0, 0.0, 1.0),
        ]
        .iter()
        .enumerate()
        {
            let p = s.position(i as f32);
            assert!((p - *expected).length() < 1e-5, "point {i}: {p:?}");
        }
    }

    #[test]
    fn position_is_periodic() {
        let s = square();
        let n = s.len() as f32;
        for t in [0.0, 0.25, 1.5, 2.75, 3.999] {
            let a = s.position(t);
            let b = s.position(t + n);
            assert!((a - b).length() < 1e-4, "t={t}: {a:?} vs {b:?}");
        }
    }

    #[test]
    fn tangent_is_periodic() {
        let s = square();
        let n = s.len() as f32;
        for t in [0.1, 1.9, 3.5] {
            let a = s.tangent(t);
            let b = s.tangent(t + n);
            assert!((a - b).length() < 1e-4);
        }
    }

    #[test]
    fn tangent_points_along_travel() {
        let s = square();
        // Mid first segment the curve moves in +x.
        let d = s.tangent(0.5);
        assert!(d.x > 0.0);
        assert!(d.x.abs() > d.z.abs());
    }

    #[test]
    fn push_extends_the_loop() {
        let mut s = square();
        s.push(Vec3::new(-1.0, 0.0, 0.5));
        assert_eq!(s.len(), 5);
        let p = s.position(4.0);
        assert!((p - Vec3::new(-1.0, 0.0, 0.5)).length() < 1e-5);
    }
}
