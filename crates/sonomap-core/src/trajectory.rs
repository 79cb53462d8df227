//! Motion profiles for moving focus grids and moving sources
//!
//! Static, linear, waypoint and circular motion in Cartesian coordinates.
//! Time-domain beamformers use these to translate (and optionally rotate)
//! their focus grid along the path of a moving source.

use serde::{Deserialize, Serialize};

use crate::cache::ContentHasher;
use crate::geometry::Point3;
use crate::types::{BeamError, BeamResult};

/// Position and velocity of a moving entity at a given time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectoryState {
    pub position: Point3,
    pub velocity: Point3,
    pub time_s: f64,
}

/// Trajectory definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Trajectory {
    /// Fixed position
    Static { position: Point3 },
    /// Constant velocity from a start position
    Linear { start: Point3, velocity: Point3 },
    /// Piecewise linear path through timestamped waypoints
    Waypoints {
        /// (time_s, position), strictly increasing in time
        points: Vec<(f64, Point3)>,
    },
    /// Circular motion around `center` in the plane z = center.z
    Circular {
        center: Point3,
        radius_m: f64,
        /// Angular velocity in rad/s (positive = counterclockwise seen from +z)
        omega_rad_s: f64,
        /// Angle at t = 0, radians from the +x axis
        initial_angle_rad: f64,
    },
}

impl Trajectory {
    /// Waypoint trajectory, validated for time ordering.
    pub fn waypoints(points: Vec<(f64, Point3)>) -> BeamResult<Self> {
        if points.is_empty() {
            return Err(BeamError::config("waypoint trajectory needs at least one point"));
        }
        if points.windows(2).any(|w| w[1].0 <= w[0].0) {
            return Err(BeamError::config(
                "waypoint times must be strictly increasing",
            ));
        }
        Ok(Trajectory::Waypoints { points })
    }

    /// Get position and velocity at time t
    pub fn state_at(&self, t: f64) -> TrajectoryState {
        let (position, velocity) = match self {
            Trajectory::Static { position } => (*position, Point3::origin()),
            Trajectory::Linear { start, velocity } => (*start + *velocity * t, *velocity),
            Trajectory::Waypoints { points } => waypoint_state(points, t),
            Trajectory::Circular {
                center,
                radius_m,
                omega_rad_s,
                initial_angle_rad,
            } => {
                let angle = initial_angle_rad + omega_rad_s * t;
                let (s, c) = angle.sin_cos();
                let position = *center + Point3::new(radius_m * c, radius_m * s, 0.0);
                let velocity = Point3::new(
                    -radius_m * omega_rad_s * s,
                    radius_m * omega_rad_s * c,
                    0.0,
                );
                (position, velocity)
            }
        };
        TrajectoryState {
            position,
            velocity,
            time_s: t,
        }
    }

    pub fn position(&self, t: f64) -> Point3 {
        self.state_at(t).position
    }

    /// Highest speed along the trajectory, m/s.
    pub fn max_speed(&self) -> f64 {
        match self {
            Trajectory::Static { .. } => 0.0,
            Trajectory::Linear { velocity, .. } => velocity.norm(),
            Trajectory::Waypoints { points } => points
                .windows(2)
                .map(|w| w[1].1.distance_to(&w[0].1) / (w[1].0 - w[0].0))
                .fold(0.0, f64::max),
            Trajectory::Circular {
                radius_m,
                omega_rad_s,
                ..
            } => (radius_m * omega_rad_s).abs(),
        }
    }

    pub fn digest(&self) -> String {
        let h = ContentHasher::new("Trajectory");
        match self {
            Trajectory::Static { position } => h.field("static", position).finish(),
            Trajectory::Linear { start, velocity } => h
                .field("linear.start", start)
                .field("linear.velocity", velocity)
                .finish(),
            Trajectory::Waypoints { points } => {
                let times: Vec<f64> = points.iter().map(|p| p.0).collect();
                let positions: Vec<Point3> = points.iter().map(|p| p.1).collect();
                h.field("waypoints.t", &times)
                    .field("waypoints.p", &positions)
                    .finish()
            }
            Trajectory::Circular {
                center,
                radius_m,
                omega_rad_s,
                initial_angle_rad,
            } => h
                .field("circular.center", center)
                .field("circular.radius", radius_m)
                .field("circular.omega", omega_rad_s)
                .field("circular.angle", initial_angle_rad)
                .finish(),
        }
    }
}

fn waypoint_state(points: &[(f64, Point3)], t: f64) -> (Point3, Point3) {
    let (first, last) = match (points.first(), points.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => return (Point3::origin(), Point3::origin()),
    };
    if points.len() == 1 || t <= first.0 {
        return (first.1, Point3::origin());
    }
    if t >= last.0 {
        return (last.1, Point3::origin());
    }
    // Find segment
    let idx = points.iter().position(|(pt, _)| *pt > t).unwrap_or(points.len()) - 1;
    let (t0, p0) = points[idx];
    let (t1, p1) = points[idx + 1];
    let dt = t1 - t0;
    let frac = (t - t0) / dt;
    let velocity = (p1 - p0) * (1.0 / dt);
    (p0 + (p1 - p0) * frac, velocity)
}

/// Orthonormal frame moving with a trajectory.
///
/// The first axis points along the direction of motion, the second along
/// `rvec × dx`, the third completes the right-handed frame. Returns `None`
/// when the entity is at rest or `rvec` is parallel to the motion.
pub fn moving_frame(velocity: &Point3, rvec: &Point3) -> Option<[Point3; 3]> {
    let dx = velocity.normalized();
    let dy = rvec.cross(&dx).normalized();
    if dx.norm() == 0.0 || dy.norm() == 0.0 {
        return None;
    }
    let dz = dx.cross(&dy);
    Some([dx, dy, dz])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_static_trajectory() {
        let traj = Trajectory::Static {
            position: Point3::new(1.0, 2.0, 3.0),
        };
        let s0 = traj.state_at(0.0);
        let s1 = traj.state_at(10.0);
        assert_eq!(s0.position, s1.position);
        assert_eq!(s0.velocity.norm(), 0.0);
        assert_eq!(traj.max_speed(), 0.0);
    }

    #[test]
    fn test_linear_trajectory() {
        let traj = Trajectory::Linear {
            start: Point3::new(-1.0, 0.0, 1.0),
            velocity: Point3::new(10.0, 0.0, 0.0),
        };
        let s1 = traj.state_at(0.5);
        assert_relative_eq!(s1.position.x, 4.0);
        assert_relative_eq!(s1.position.z, 1.0);
        assert_relative_eq!(traj.max_speed(), 10.0);
    }

    #[test]
    fn test_waypoints() {
        let traj = Trajectory::waypoints(vec![
            (0.0, Point3::new(0.0, 0.0, 0.0)),
            (1.0, Point3::new(2.0, 0.0, 0.0)),
            (3.0, Point3::new(2.0, 2.0, 0.0)),
        ])
        .unwrap();
        let s = traj.state_at(0.5);
        assert_relative_eq!(s.position.x, 1.0);
        assert_relative_eq!(s.velocity.x, 2.0);
        let s = traj.state_at(2.0);
        assert_relative_eq!(s.position.y, 1.0);
        assert_relative_eq!(s.velocity.y, 1.0);
        // clamped at the ends
        assert_eq!(traj.position(-1.0), Point3::new(0.0, 0.0, 0.0));
        assert_eq!(traj.position(5.0), Point3::new(2.0, 2.0, 0.0));
        assert_relative_eq!(traj.max_speed(), 2.0);

        assert!(Trajectory::waypoints(vec![]).is_err());
        assert!(Trajectory::waypoints(vec![
            (1.0, Point3::origin()),
            (1.0, Point3::origin())
        ])
        .is_err());
    }

    #[test]
    fn test_circular_trajectory() {
        let traj = Trajectory::Circular {
            center: Point3::new(0.0, 0.0, 1.0),
            radius_m: 2.0,
            omega_rad_s: 0.5,
            initial_angle_rad: 0.0,
        };
        let s = traj.state_at(0.0);
        assert_relative_eq!(s.position.x, 2.0);
        assert_relative_eq!(s.velocity.y, 1.0);
        assert_relative_eq!(s.velocity.norm(), 2.0 * 0.5);
        assert_relative_eq!(traj.max_speed(), 1.0);
    }

    #[test]
    fn test_moving_frame() {
        let frame = moving_frame(&Point3::new(5.0, 0.0, 0.0), &Point3::new(0.0, 0.0, 1.0)).unwrap();
        assert_relative_eq!(frame[0].x, 1.0);
        assert_relative_eq!(frame[1].y, 1.0);
        assert_relative_eq!(frame[2].z, 1.0);
        assert!(moving_frame(&Point3::origin(), &Point3::new(0.0, 0.0, 1.0)).is_none());
        assert!(moving_frame(&Point3::new(0.0, 0.0, 1.0), &Point3::new(0.0, 0.0, 1.0)).is_none());
    }

    #[test]
    fn test_digest_distinguishes_variants() {
        let a = Trajectory::Static {
            position: Point3::origin(),
        };
        let b = Trajectory::Linear {
            start: Point3::origin(),
            velocity: Point3::origin(),
        };
        assert_ne!(a.digest(), b.digest());
    }
}
