mod board;
mod coordinator;
mod layout;
pub mod strategy;

pub use board::{Board, Cell};
pub use coordinator::{Coordinator, Phase, SessionConfig};
pub use layout::{BoardLayout, StorageRack};

use arm_motion::MotionError;
use arm_vision::VisionError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("recovery exhausted after {attempts} re-homing attempts")]
    Unrecoverable { attempts: u32 },

    #[error("vision: {0}")]
    Vision(#[from] VisionError),

    #[error("motion: {0}")]
    Motion(#[from] MotionError),
}
