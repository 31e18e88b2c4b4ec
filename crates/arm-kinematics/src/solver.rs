use crate::{ArmGeometry, Joint, JointAngles, JointLimits, KinematicsError, Point3};
use tracing::debug;

/// Numeric slack on the reach boundary so targets that sit exactly on the
/// envelope edge do not flip between reachable and unreachable.
const REACH_EPS: f64 = 1e-6;

/// Analytic inverse/forward kinematics for the 5-DOF chain.
///
/// Servo frame conventions:
/// - base: 90° points straight ahead along +x, yaw grows toward +y
/// - shoulder: upper-arm elevation above horizontal
/// - elbow: bend angle, 0° = forearm continues the upper-arm line
/// - wrist pitch: 90° keeps the gripper aligned with the forearm
///
/// Solutions always use the elbow-up branch, so a given target resolves to
/// exactly one pose.
#[derive(Debug, Clone)]
pub struct Solver {
    geometry: ArmGeometry,
    limits: JointLimits,
}

impl Solver {
    pub fn new(geometry: ArmGeometry, limits: JointLimits) -> Self {
        Self { geometry, limits }
    }

    pub fn limits(&self) -> &JointLimits {
        &self.limits
    }

    /// Solve for the joint angles that put the gripper contact point at
    /// `target` with the gripper pitched `pitch_deg` from horizontal
    /// (-90 = pointing straight down). `roll_deg` and `gripper_deg` pass
    /// through to their channels.
    ///
    /// Fails with `Unreachable` when the target lies outside the workspace
    /// envelope or any solved angle violates its joint limit. Never returns
    /// a clamped pose.
    pub fn solve(
        &self,
        target: Point3,
        pitch_deg: f64,
        roll_deg: f64,
        gripper_deg: f64,
    ) -> Result<JointAngles, KinematicsError> {
        let g = &self.geometry;
        let unreachable = || KinematicsError::Unreachable {
            x: target.x,
            y: target.y,
            z: target.z,
        };

        let yaw = target.y.atan2(target.x);
        let base = 90.0 + yaw.to_degrees();
        let r = target.x.hypot(target.y);

        // Back the grip link off along the approach direction to get the
        // wrist pitch pivot, then solve the planar two-link chain to it.
        let pitch = pitch_deg.to_radians();
        let rw = r - g.grip * pitch.cos();
        let zw = target.z - g.base_height - g.grip * pitch.sin();

        let d = rw.hypot(zw);
        let max_reach = g.upper_arm + g.forearm;
        let min_reach = (g.upper_arm - g.forearm).abs();
        if d > max_reach + REACH_EPS || d < min_reach - REACH_EPS || d < REACH_EPS {
            debug!(
                "wrist center out of reach: d={:.1} (reach {:.1}..{:.1})",
                d, min_reach, max_reach
            );
            return Err(unreachable());
        }

        // Interior elbow angle via the law of cosines.
        let cos_elbow =
            ((g.upper_arm * g.upper_arm + g.forearm * g.forearm - d * d)
                / (2.0 * g.upper_arm * g.forearm))
                .clamp(-1.0, 1.0);
        let interior = cos_elbow.acos();
        let elbow = 180.0 - interior.to_degrees();

        // Elbow-up: lift the shoulder above the line to the wrist center.
        let cos_offset =
            ((d * d + g.upper_arm * g.upper_arm - g.forearm * g.forearm)
                / (2.0 * g.upper_arm * d))
                .clamp(-1.0, 1.0);
        let shoulder = (zw.atan2(rw) + cos_offset.acos()).to_degrees();

        // Forearm elevation, then the wrist pitch that yields the requested
        // gripper pitch.
        let forearm_dir = shoulder - elbow;
        let wrist = 90.0 + (pitch_deg - forearm_dir);

        let angles = JointAngles([base, shoulder, elbow, wrist, roll_deg, gripper_deg]);
        if let Some((joint, angle)) = self.limits.violation(&angles) {
            debug!(
                "solution violates {:?} limit: {:.1}° for target ({:.1}, {:.1}, {:.1})",
                joint, angle, target.x, target.y, target.z
            );
            return Err(unreachable());
        }

        Ok(angles)
    }

    /// Gripper contact point for a given pose. Inverse of `solve`.
    pub fn forward(&self, angles: &JointAngles) -> Point3 {
        let g = &self.geometry;

        let yaw = (angles[Joint::Base] - 90.0).to_radians();
        let shoulder = angles[Joint::Shoulder].to_radians();
        let forearm_dir = (angles[Joint::Shoulder] - angles[Joint::Elbow]).to_radians();
        let pitch =
            (angles[Joint::WristPitch] - 90.0 + angles[Joint::Shoulder] - angles[Joint::Elbow])
                .to_radians();

        let r = g.upper_arm * shoulder.cos() + g.forearm * forearm_dir.cos() + g.grip * pitch.cos();
        let z = g.base_height
            + g.upper_arm * shoulder.sin()
            + g.forearm * forearm_dir.sin()
            + g.grip * pitch.sin();

        Point3::new(r * yaw.cos(), r * yaw.sin(), z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solver() -> Solver {
        Solver::new(ArmGeometry::default(), JointLimits::default())
    }

    #[test]
    fn test_reachable_target_within_limits() {
        let s = solver();
        let angles = s
            .solve(Point3::new(150.0, 40.0, 20.0), -90.0, 90.0, 40.0)
            .unwrap();
        assert!(s.limits().violation(&angles).is_none());
    }

    #[test]
    fn test_round_trip_forward_matches_target() {
        let s = solver();
        let target = Point3::new(140.0, -30.0, 35.0);
        let angles = s.solve(target, -90.0, 90.0, 40.0).unwrap();
        let back = s.forward(&angles);
        assert!(
            back.distance(target) < 0.5,
            "forward kinematics landed {:.2} mm away: {:?}",
            back.distance(target),
            back
        );
    }

    #[test]
    fn test_deterministic_solution() {
        let s = solver();
        let target = Point3::new(120.0, 60.0, 25.0);
        let a = s.solve(target, -90.0, 90.0, 40.0).unwrap();
        let b = s.solve(target, -90.0, 90.0, 40.0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_elbow_up_branch() {
        let s = solver();
        // A target below the shoulder still solves with the shoulder lifted
        // above the straight line to the wrist center.
        let angles = s
            .solve(Point3::new(160.0, 0.0, 10.0), -90.0, 90.0, 40.0)
            .unwrap();
        assert!(angles[Joint::Shoulder] > 0.0);
        assert!(angles[Joint::Elbow] > 0.0);
    }

    #[test]
    fn test_too_far_is_unreachable() {
        let s = solver();
        let err = s
            .solve(Point3::new(500.0, 0.0, 20.0), -90.0, 90.0, 40.0)
            .unwrap_err();
        assert!(matches!(err, KinematicsError::Unreachable { .. }));
    }

    #[test]
    fn test_too_close_is_unreachable() {
        let s = solver();
        // Wrist center lands a few millimeters from the shoulder pivot,
        // inside the two-link annulus hole.
        let err = s
            .solve(Point3::new(95.0, 0.0, 72.0), 0.0, 90.0, 40.0)
            .unwrap_err();
        assert!(matches!(err, KinematicsError::Unreachable { .. }));
    }

    #[test]
    fn test_behind_base_violates_yaw_limit() {
        let s = solver();
        // Behind the arm needs a base yaw beyond the 0..180 servo range.
        let err = s
            .solve(Point3::new(-140.0, -20.0, 20.0), -90.0, 90.0, 40.0)
            .unwrap_err();
        assert!(matches!(err, KinematicsError::Unreachable { .. }));
    }

    #[test]
    fn test_straight_reach_has_zero_elbow() {
        let g = ArmGeometry {
            base_height: 0.0,
            upper_arm: 100.0,
            forearm: 100.0,
            grip: 0.0,
        };
        let s = Solver::new(g, JointLimits::default());
        // Wrist center exactly at full extension along +x, gripper level.
        let angles = s.solve(Point3::new(200.0, 0.0, 0.0), 0.0, 90.0, 40.0).unwrap();
        assert!(angles[Joint::Elbow].abs() < 1e-6);
        assert!(angles[Joint::Shoulder].abs() < 1e-6);
    }
}
