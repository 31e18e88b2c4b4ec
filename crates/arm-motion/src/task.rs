use crate::{CommandHandle, CommandStatus, MotionController, MotionError, ServoDriver};
use arm_kinematics::JointAngles;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

enum Request {
    Enqueue {
        target: JointAngles,
        duration: Duration,
        reply: oneshot::Sender<Result<CommandHandle, MotionError>>,
    },
    Status {
        handle: CommandHandle,
        reply: oneshot::Sender<Option<CommandStatus>>,
    },
    Hold {
        reply: oneshot::Sender<()>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
    Current {
        reply: oneshot::Sender<JointAngles>,
    },
}

/// Client side of the motion task. Cheap to clone; all requests funnel
/// through the task's queue, so the driver has exactly one writer.
#[derive(Clone)]
pub struct MotionHandle {
    tx: mpsc::Sender<Request>,
    poll_interval: Duration,
}

impl MotionHandle {
    pub async fn enqueue(
        &self,
        target: JointAngles,
        duration: Duration,
    ) -> Result<CommandHandle, MotionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Enqueue {
                target,
                duration,
                reply,
            })
            .await
            .map_err(|_| MotionError::TaskGone)?;
        rx.await.map_err(|_| MotionError::TaskGone)?
    }

    pub async fn status(&self, handle: CommandHandle) -> Result<Option<CommandStatus>, MotionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Status { handle, reply })
            .await
            .map_err(|_| MotionError::TaskGone)?;
        rx.await.map_err(|_| MotionError::TaskGone)
    }

    /// Poll until `handle` reaches a terminal state and return it.
    pub async fn wait(&self, handle: CommandHandle) -> Result<CommandStatus, MotionError> {
        loop {
            match self.status(handle).await? {
                Some(status) if status.is_terminal() => return Ok(status),
                Some(_) => tokio::time::sleep(self.poll_interval).await,
                None => return Err(MotionError::TaskGone),
            }
        }
    }

    /// Convenience: enqueue and wait for completion.
    pub async fn run(
        &self,
        target: JointAngles,
        duration: Duration,
    ) -> Result<CommandStatus, MotionError> {
        let handle = self.enqueue(target, duration).await?;
        self.wait(handle).await
    }

    /// Ask the in-flight command to hold the current pose.
    pub async fn hold(&self) -> Result<(), MotionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Hold { reply })
            .await
            .map_err(|_| MotionError::TaskGone)?;
        rx.await.map_err(|_| MotionError::TaskGone)
    }

    /// Clear a fault so the controller accepts commands again.
    pub async fn reset(&self) -> Result<(), MotionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Reset { reply })
            .await
            .map_err(|_| MotionError::TaskGone)?;
        rx.await.map_err(|_| MotionError::TaskGone)
    }

    pub async fn current(&self) -> Result<JointAngles, MotionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Current { reply })
            .await
            .map_err(|_| MotionError::TaskGone)?;
        rx.await.map_err(|_| MotionError::TaskGone)
    }
}

/// Spawn the motion task: the sole owner of the servo driver, ticking the
/// controller at its configured rate and serving handle requests from a
/// bounded queue.
pub fn spawn_motion_task(
    mut controller: MotionController,
    mut driver: Box<dyn ServoDriver>,
    queue_depth: usize,
) -> MotionHandle {
    let (tx, mut rx) = mpsc::channel(queue_depth);
    let tick_period = controller.config().tick_period;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("motion task started, tick {:?}", tick_period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    controller.tick(driver.as_mut());
                }
                req = rx.recv() => {
                    let Some(req) = req else {
                        break;
                    };
                    match req {
                        Request::Enqueue { target, duration, reply } => {
                            let _ = reply.send(controller.enqueue(target, duration));
                        }
                        Request::Status { handle, reply } => {
                            let _ = reply.send(controller.status(handle));
                        }
                        Request::Hold { reply } => {
                            controller.hold();
                            let _ = reply.send(());
                        }
                        Request::Reset { reply } => {
                            controller.reset();
                            let _ = reply.send(());
                        }
                        Request::Current { reply } => {
                            let _ = reply.send(controller.current());
                        }
                    }
                }
            }
        }
        info!("motion task stopped (all handles dropped)");
    });

    MotionHandle { tx, poll_interval: tick_period }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MotionConfig, SimulatedDriver};
    use arm_kinematics::{Joint, JointLimits, JOINT_COUNT};

    fn fast_config() -> MotionConfig {
        MotionConfig {
            tick_period: Duration::from_millis(2),
            max_delta_per_tick: 5.0,
            settle: Duration::from_millis(4),
        }
    }

    fn spawn() -> MotionHandle {
        let controller = MotionController::new(
            fast_config(),
            JointLimits::default(),
            JointAngles([90.0; JOINT_COUNT]),
        );
        spawn_motion_task(controller, Box::new(SimulatedDriver::new()), 8)
    }

    #[tokio::test]
    async fn test_enqueue_and_wait_done() {
        let motion = spawn();
        let mut target = JointAngles([90.0; JOINT_COUNT]);
        target.set(Joint::Base, 110.0);

        let status = motion.run(target, Duration::from_secs(1)).await.unwrap();
        assert_eq!(status, CommandStatus::Done);
        assert_eq!(motion.current().await.unwrap()[Joint::Base], 110.0);
    }

    #[tokio::test]
    async fn test_hold_completes_short_of_target() {
        // Slow ticks so the hold lands well before the motion finishes.
        let controller = MotionController::new(
            MotionConfig {
                tick_period: Duration::from_millis(10),
                max_delta_per_tick: 5.0,
                settle: Duration::from_millis(10),
            },
            JointLimits::default(),
            JointAngles([90.0; JOINT_COUNT]),
        );
        let motion = spawn_motion_task(controller, Box::new(SimulatedDriver::new()), 8);

        let mut target = JointAngles([90.0; JOINT_COUNT]);
        target.set(Joint::Base, 0.0);
        let handle = motion.enqueue(target, Duration::from_secs(1)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        motion.hold().await.unwrap();

        assert_eq!(motion.wait(handle).await.unwrap(), CommandStatus::Done);
        let parked = motion.current().await.unwrap()[Joint::Base];
        assert!(parked > 0.0, "hold should stop before the target, got {}", parked);
    }

    #[tokio::test]
    async fn test_busy_while_in_flight() {
        let motion = spawn();
        let mut target = JointAngles([90.0; JOINT_COUNT]);
        target.set(Joint::Base, 10.0);
        let handle = motion.enqueue(target, Duration::from_secs(1)).await.unwrap();

        let mut other = JointAngles([90.0; JOINT_COUNT]);
        other.set(Joint::Elbow, 120.0);
        let err = motion.enqueue(other, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, MotionError::Busy));

        assert_eq!(motion.wait(handle).await.unwrap(), CommandStatus::Done);
    }
}
