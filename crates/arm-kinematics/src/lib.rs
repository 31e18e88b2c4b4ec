mod solver;

pub use solver::Solver;

use serde::{Deserialize, Serialize};

/// Number of actuated channels: five arm joints plus the gripper.
pub const JOINT_COUNT: usize = 6;

/// Actuated joints of the arm, in servo channel order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Joint {
    Base,
    Shoulder,
    Elbow,
    WristPitch,
    WristRoll,
    Gripper,
}

impl Joint {
    pub const ALL: [Joint; JOINT_COUNT] = [
        Joint::Base,
        Joint::Shoulder,
        Joint::Elbow,
        Joint::WristPitch,
        Joint::WristRoll,
        Joint::Gripper,
    ];

    /// PWM channel index on the servo driver board.
    pub fn channel(self) -> usize {
        self as usize
    }
}

/// One servo angle per joint, in degrees, ordered by channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointAngles(pub [f64; JOINT_COUNT]);

impl JointAngles {
    pub fn get(&self, joint: Joint) -> f64 {
        self.0[joint.channel()]
    }

    pub fn set(&mut self, joint: Joint, angle: f64) {
        self.0[joint.channel()] = angle;
    }

    /// Largest per-joint angular distance to `other`, in degrees.
    pub fn max_abs_delta(&self, other: &JointAngles) -> f64 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

impl std::ops::Index<Joint> for JointAngles {
    type Output = f64;

    fn index(&self, joint: Joint) -> &f64 {
        &self.0[joint.channel()]
    }
}

/// A point in arm-space: millimeters, origin at the base axis,
/// x forward, y left, z up from the mounting surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Same point shifted vertically by `dz` millimeters.
    pub fn offset_z(self, dz: f64) -> Self {
        Self { z: self.z + dz, ..self }
    }

    pub fn distance(self, other: Point3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Allowed angle range for one joint, degrees.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct JointLimit {
    pub min_deg: f64,
    pub max_deg: f64,
}

impl JointLimit {
    pub const fn new(min_deg: f64, max_deg: f64) -> Self {
        Self { min_deg, max_deg }
    }

    pub fn contains(&self, angle: f64) -> bool {
        angle >= self.min_deg && angle <= self.max_deg
    }

    pub fn clamp(&self, angle: f64) -> f64 {
        angle.clamp(self.min_deg, self.max_deg)
    }
}

/// Per-joint angle ranges, ordered by channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct JointLimits(pub [JointLimit; JOINT_COUNT]);

impl Default for JointLimits {
    /// Full hobby-servo travel on every channel.
    fn default() -> Self {
        Self([JointLimit::new(0.0, 180.0); JOINT_COUNT])
    }
}

impl JointLimits {
    pub fn get(&self, joint: Joint) -> JointLimit {
        self.0[joint.channel()]
    }

    /// First joint whose angle falls outside its range, if any.
    pub fn violation(&self, angles: &JointAngles) -> Option<(Joint, f64)> {
        Joint::ALL.iter().find_map(|&j| {
            let a = angles[j];
            if self.get(j).contains(a) {
                None
            } else {
                Some((j, a))
            }
        })
    }

    /// Every joint clamped into its range. Used only to bound interpolation
    /// steps; solver output is validated, never clamped.
    pub fn clamp(&self, angles: &JointAngles) -> JointAngles {
        let mut out = *angles;
        for &j in &Joint::ALL {
            out.set(j, self.get(j).clamp(angles[j]));
        }
        out
    }
}

/// Link lengths of the kinematic chain, millimeters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ArmGeometry {
    /// Height of the shoulder pivot above the mounting surface.
    pub base_height: f64,
    /// Shoulder pivot to elbow pivot.
    pub upper_arm: f64,
    /// Elbow pivot to wrist pitch pivot.
    pub forearm: f64,
    /// Wrist pitch pivot to the gripper contact point.
    pub grip: f64,
}

impl Default for ArmGeometry {
    /// Measurements of the 5-DOF desktop arm this firmware was built for.
    fn default() -> Self {
        Self {
            base_height: 72.0,
            upper_arm: 105.0,
            forearm: 98.0,
            grip: 92.0,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum KinematicsError {
    #[error("target ({x:.1}, {y:.1}, {z:.1}) mm is outside the workspace envelope")]
    Unreachable { x: f64, y: f64, z: f64 },
}
