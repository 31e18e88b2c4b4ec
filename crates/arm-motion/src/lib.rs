mod controller;
mod driver;
mod task;

pub use controller::{CommandHandle, CommandStatus, JointPhase, MotionConfig, MotionController};
pub use driver::{DriveError, ServoDriver, SimulatedDriver};
pub use task::{spawn_motion_task, MotionHandle};

use arm_kinematics::Joint;

#[derive(Debug, Clone, thiserror::Error)]
pub enum MotionError {
    #[error("a motion command is already in flight")]
    Busy,

    #[error("controller is faulted ({0}), reset required")]
    Faulted(String),

    #[error("target angle {angle:.1}° is outside the {joint:?} limit")]
    OutOfRange { joint: Joint, angle: f64 },

    #[error("motion needs {required_ms} ms at the configured rate, {requested_ms} ms requested")]
    DurationTooShort { required_ms: u64, requested_ms: u64 },

    #[error("motion task is not running")]
    TaskGone,
}
