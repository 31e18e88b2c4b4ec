use crate::{MotionError, ServoDriver};
use arm_kinematics::{Joint, JointAngles, JointLimits, JOINT_COUNT};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

/// Angles closer than this are treated as already on target.
const ANGLE_EPS: f64 = 1e-3;

/// Interpolation and timing parameters for the controller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MotionConfig {
    /// Interval between interpolation ticks.
    pub tick_period: Duration,
    /// Hardware protection: no joint may be commanded to jump further than
    /// this many degrees in one tick.
    pub max_delta_per_tick: f64,
    /// Dwell after the last tick, letting mechanical oscillation damp
    /// before the pose is trusted.
    pub settle: Duration,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_millis(50),
            max_delta_per_tick: 5.0,
            settle: Duration::from_millis(300),
        }
    }
}

impl MotionConfig {
    fn settle_ticks(&self) -> u64 {
        let period = self.tick_period.as_millis().max(1);
        (self.settle.as_millis() as u64).div_ceil(period as u64)
    }
}

/// Opaque reference to an enqueued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandStatus {
    Pending,
    Running,
    Done,
    Faulted,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CommandStatus::Done | CommandStatus::Faulted)
    }
}

/// Where a joint is in its Idle → Moving → Settling → Idle cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointPhase {
    Idle,
    Moving,
    Settling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Pending,
    Moving,
    Settling,
}

#[derive(Debug)]
struct ActiveCommand {
    id: u64,
    target: JointAngles,
    involved: [bool; JOINT_COUNT],
    stage: Stage,
    ticks_taken: u64,
    deadline_ticks: u64,
    settle_left: u64,
}

/// Interpolating servo command queue with single-command-in-flight
/// discipline.
///
/// The controller is driven by `tick`, which steps every involved joint
/// toward its target by at most `max_delta_per_tick` degrees and writes the
/// new angles to the driver. A command whose driver write is not
/// acknowledged faults the whole controller; nothing moves again until
/// `reset` is called. A faulted motion is never retried on its own.
pub struct MotionController {
    config: MotionConfig,
    limits: JointLimits,
    current: JointAngles,
    active: Option<ActiveCommand>,
    retired: HashMap<u64, CommandStatus>,
    fault: Option<String>,
    next_id: u64,
}

impl MotionController {
    /// `start` is the pose the arm is physically in at startup (the servos
    /// are not readable, so it must be supplied).
    pub fn new(config: MotionConfig, limits: JointLimits, start: JointAngles) -> Self {
        Self {
            config,
            limits,
            current: limits.clamp(&start),
            active: None,
            retired: HashMap::new(),
            fault: None,
            next_id: 0,
        }
    }

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    /// Pose the controller believes the arm is in.
    pub fn current(&self) -> JointAngles {
        self.current
    }

    pub fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }

    /// Queue a motion toward `target`, to complete within `duration`.
    ///
    /// Fails with `Busy` while another command is in flight, `OutOfRange`
    /// if any target angle violates its joint limit, `DurationTooShort` if
    /// the rate limit cannot cover the distance in time, and `Faulted`
    /// until the controller is reset after a fault.
    pub fn enqueue(
        &mut self,
        target: JointAngles,
        duration: Duration,
    ) -> Result<CommandHandle, MotionError> {
        if let Some(reason) = &self.fault {
            return Err(MotionError::Faulted(reason.clone()));
        }
        if let Some((joint, angle)) = self.limits.violation(&target) {
            return Err(MotionError::OutOfRange { joint, angle });
        }
        if self.active.is_some() {
            return Err(MotionError::Busy);
        }

        let mut involved = [false; JOINT_COUNT];
        for &j in &Joint::ALL {
            involved[j.channel()] = (target[j] - self.current[j]).abs() > ANGLE_EPS;
        }

        let travel_ticks =
            (self.current.max_abs_delta(&target) / self.config.max_delta_per_tick).ceil() as u64;
        let required = self.config.tick_period * travel_ticks as u32;
        if required > duration {
            return Err(MotionError::DurationTooShort {
                required_ms: required.as_millis() as u64,
                requested_ms: duration.as_millis() as u64,
            });
        }

        let id = self.next_id;
        self.next_id += 1;
        let deadline_ticks = (duration.as_millis() as u64)
            .div_ceil(self.config.tick_period.as_millis().max(1) as u64)
            + self.config.settle_ticks();

        info!(
            "motion #{}: {:?} -> {:?} ({} ticks)",
            id, self.current.0, target.0, travel_ticks
        );
        self.active = Some(ActiveCommand {
            id,
            target,
            involved,
            stage: Stage::Pending,
            ticks_taken: 0,
            deadline_ticks,
            settle_left: self.config.settle_ticks(),
        });
        Ok(CommandHandle(id))
    }

    /// Advance the in-flight command by one tick, writing stepped angles to
    /// the driver.
    pub fn tick(&mut self, driver: &mut dyn ServoDriver) {
        if self.fault.is_some() {
            return;
        }
        let Some(cmd) = self.active.as_mut() else {
            return;
        };

        if cmd.stage == Stage::Pending {
            cmd.stage = Stage::Moving;
        }
        cmd.ticks_taken += 1;

        match cmd.stage {
            Stage::Moving => {
                let max_step = self.config.max_delta_per_tick;
                let mut all_on_target = true;
                for &j in &Joint::ALL {
                    if !cmd.involved[j.channel()] {
                        continue;
                    }
                    let remaining = cmd.target[j] - self.current[j];
                    let step = remaining.clamp(-max_step, max_step);
                    let next = if remaining.abs() <= max_step {
                        cmd.target[j]
                    } else {
                        self.current[j] + step
                    };
                    if let Err(e) = driver.drive(j.channel(), next) {
                        let id = cmd.id;
                        warn!("motion #{} faulted: {}", id, e);
                        self.active = None;
                        self.retired.insert(id, CommandStatus::Faulted);
                        self.fault = Some(e.to_string());
                        return;
                    }
                    self.current.set(j, next);
                    if (cmd.target[j] - next).abs() > ANGLE_EPS {
                        all_on_target = false;
                    }
                }
                if all_on_target {
                    cmd.stage = Stage::Settling;
                }
            }
            Stage::Settling => {
                cmd.settle_left = cmd.settle_left.saturating_sub(1);
                if cmd.settle_left == 0 {
                    let id = cmd.id;
                    info!("motion #{} done", id);
                    self.active = None;
                    self.retired.insert(id, CommandStatus::Done);
                    return;
                }
            }
            Stage::Pending => unreachable!(),
        }

        let cmd = self.active.as_ref().expect("command still active");
        if cmd.ticks_taken > cmd.deadline_ticks {
            let id = cmd.id;
            warn!(
                "motion #{} missed its completion deadline ({} ticks)",
                id, cmd.deadline_ticks
            );
            self.active = None;
            self.retired.insert(id, CommandStatus::Faulted);
            self.fault = Some("missed completion deadline".into());
        }
    }

    /// Retarget the in-flight command to hold the current pose. The command
    /// still completes normally through its settle phase; the arm is never
    /// left unpowered mid-motion.
    pub fn hold(&mut self) {
        if let Some(cmd) = self.active.as_mut() {
            if cmd.stage != Stage::Settling {
                info!("motion #{}: holding current pose", cmd.id);
                cmd.target = self.current;
            }
        }
    }

    /// Clear a fault so new commands are accepted again. The caller is
    /// responsible for re-homing before trusting the pose.
    pub fn reset(&mut self) {
        if let Some(reason) = self.fault.take() {
            info!("controller reset after fault: {}", reason);
        }
    }

    /// Lifecycle state of `handle`. `None` for handles this controller
    /// never issued. Terminal states never change on repeated calls.
    pub fn status(&self, handle: CommandHandle) -> Option<CommandStatus> {
        if let Some(cmd) = &self.active {
            if cmd.id == handle.0 {
                return Some(match cmd.stage {
                    Stage::Pending => CommandStatus::Pending,
                    Stage::Moving | Stage::Settling => CommandStatus::Running,
                });
            }
        }
        self.retired.get(&handle.0).copied()
    }

    pub fn joint_phase(&self, joint: Joint) -> JointPhase {
        match &self.active {
            Some(cmd) if cmd.involved[joint.channel()] => match cmd.stage {
                Stage::Pending | Stage::Moving => JointPhase::Moving,
                Stage::Settling => JointPhase::Settling,
            },
            _ => JointPhase::Idle,
        }
    }
}
