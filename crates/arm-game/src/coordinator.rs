use crate::{strategy, Board, BoardLayout, Cell, SessionError, StorageRack};
use arm_kinematics::{Joint, JointAngles, KinematicsError, Point3, Solver};
use arm_link::{GameStatus, LinkError, LinkMessage, LinkTransport};
use arm_motion::{CommandStatus, MotionError, MotionHandle};
use arm_vision::Localizer;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Session-level timing, retry, and bench-layout parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Completion deadline handed to each motion command.
    pub move_duration: Duration,
    /// How long to wait for the opponent's declared move before aborting.
    pub turn_timeout: Duration,
    /// Re-observations of a mismatched board before the turn is abandoned.
    pub detect_retries: u32,
    pub detect_interval: Duration,
    /// Re-homing attempts after a motion fault before the session is
    /// declared unrecoverable.
    pub recovery_budget: u32,
    /// Height above a target for approach and retreat poses, millimeters.
    pub approach_clearance: f64,
    pub grip_open_deg: f64,
    pub grip_closed_deg: f64,
    pub wrist_roll_deg: f64,
    /// Safe pose the arm parks in between turns and on shutdown.
    pub home: JointAngles,
    pub board: BoardLayout,
    /// First rack slot holding the robot's pieces.
    pub rack_origin: Point3,
    pub rack_pitch: f64,
    pub rack_slots: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            move_duration: Duration::from_secs(2),
            turn_timeout: Duration::from_secs(60),
            detect_retries: 5,
            detect_interval: Duration::from_secs(1),
            recovery_budget: 3,
            approach_clearance: 40.0,
            grip_open_deg: 40.0,
            grip_closed_deg: 7.0,
            wrist_roll_deg: 90.0,
            home: JointAngles([90.0, 60.0, 90.0, 60.0, 90.0, 40.0]),
            board: BoardLayout::default(),
            rack_origin: Point3::new(50.0, -100.0, 12.0),
            rack_pitch: 25.0,
            rack_slots: 5,
        }
    }
}

/// Where the session loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    WaitingForTurn,
    Detecting,
    Planning,
    Executing,
    Confirming,
    Recovering,
    GameOver(GameStatus),
}

/// Binds game turns to arm actions: polls the link for the opponent's
/// declared move, confirms the physical board with the localizer, plans a
/// reply through the solver, and executes it through the motion task.
///
/// The board is mutated only after the motion controller reports a
/// placement `Done`. A motion fault enters `Recovering`, which re-homes a
/// bounded number of times before the session is declared unrecoverable —
/// the one place a physical retry is allowed, because it acts on a
/// controller-confirmed fault rather than an unconfirmed motion.
pub struct Coordinator<T> {
    link: LinkTransport<T>,
    motion: MotionHandle,
    localizer: Localizer,
    frames: watch::Receiver<Option<Arc<RgbaImage>>>,
    solver: Solver,
    config: SessionConfig,
    board: Board,
    rack: StorageRack,
    phase: Phase,
    pending_move: Option<(usize, usize)>,
    plan: Vec<JointAngles>,
    planned_cell: Option<(usize, usize)>,
    recovery_attempts: u32,
}

impl<T: AsyncRead + AsyncWrite> Coordinator<T> {
    pub fn new(
        link: LinkTransport<T>,
        motion: MotionHandle,
        localizer: Localizer,
        frames: watch::Receiver<Option<Arc<RgbaImage>>>,
        solver: Solver,
        config: SessionConfig,
    ) -> Self {
        let rack = StorageRack::new(config.rack_origin, config.rack_pitch, config.rack_slots);
        Self {
            link,
            motion,
            localizer,
            frames,
            solver,
            config,
            board: Board::new(),
            rack,
            phase: Phase::WaitingForTurn,
            pending_move: None,
            plan: Vec::new(),
            planned_cell: None,
            recovery_attempts: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Run the session to completion. Whatever the outcome, the arm is
    /// parked in its home pose before this returns.
    pub async fn run(&mut self) -> Result<GameStatus, SessionError> {
        let result = self.drive().await;

        if let Err(e) = self.park().await {
            warn!("failed to park the arm: {}", e);
        }

        match &result {
            Ok(status) => {
                let report = LinkMessage::GameState {
                    cells: self.board.to_wire(),
                    status: *status,
                };
                if let Err(e) = self.link.send(report).await {
                    warn!("final game state not delivered: {}", e);
                }
            }
            Err(e) => {
                let report = LinkMessage::Error {
                    message: e.to_string(),
                };
                if let Err(e) = self.link.send(report).await {
                    warn!("failure report not delivered: {}", e);
                }
            }
        }

        result
    }

    async fn drive(&mut self) -> Result<GameStatus, SessionError> {
        info!("session started, moving to home pose");
        if !self.go_home().await? {
            self.phase = Phase::Recovering;
        }

        loop {
            match self.phase {
                Phase::WaitingForTurn => self.wait_for_turn().await?,
                Phase::Detecting => self.detect().await?,
                Phase::Planning => self.plan_turn().await?,
                Phase::Executing => self.execute().await?,
                Phase::Confirming => self.confirm().await?,
                Phase::Recovering => self.recover().await?,
                Phase::GameOver(status) => {
                    info!("game over: {:?}", status);
                    return Ok(status);
                }
            }
        }
    }

    /// Poll the link until the server declares the opponent's move.
    async fn wait_for_turn(&mut self) -> Result<(), SessionError> {
        let deadline = Instant::now() + self.config.turn_timeout;
        loop {
            match self.link.receive().await {
                Ok(LinkMessage::MoveRequest { row, col }) => {
                    let (row, col) = (row as usize, col as usize);
                    if row > 2 || col > 2 || self.board.get(row, col) != Cell::Empty {
                        warn!("invalid move request ({}, {})", row, col);
                        let _ = self
                            .link
                            .send(LinkMessage::Error {
                                message: format!("invalid move ({}, {})", row, col),
                            })
                            .await;
                        continue;
                    }
                    info!("opponent declared ({}, {})", row, col);
                    self.pending_move = Some((row, col));
                    self.phase = Phase::Detecting;
                    return Ok(());
                }
                Ok(msg) => debug!("ignoring {:?} while waiting for a move", msg),
                Err(LinkError::ReceiveTimeout) => {
                    if Instant::now() >= deadline {
                        warn!(
                            "no opponent move within {:?}, aborting session",
                            self.config.turn_timeout
                        );
                        self.phase = Phase::GameOver(GameStatus::Aborted);
                        return Ok(());
                    }
                }
                Err(e) => {
                    warn!("link lost while waiting for a move: {}", e);
                    self.phase = Phase::GameOver(GameStatus::Aborted);
                    return Ok(());
                }
            }
        }
    }

    /// Confirm with the localizer that the physical board matches the
    /// declared move. Catches tampering and missed placements.
    async fn detect(&mut self) -> Result<(), SessionError> {
        let (row, col) = self
            .pending_move
            .expect("declared move is set before Detecting");
        let expected = self.board.with(row, col, Cell::Player);

        for attempt in 1..=self.config.detect_retries {
            let Some(frame) = self.latest_frame() else {
                debug!("no frame available yet (attempt {})", attempt);
                tokio::time::sleep(self.config.detect_interval).await;
                continue;
            };

            let detections = self.localizer.localize(&frame)?;
            let observed = Board::from_detections(detections, &self.config.board);

            match expected.mismatch(&observed) {
                None => {
                    self.board = expected;
                    self.pending_move = None;
                    info!("confirmed opponent move ({}, {})", row, col);
                    self.phase = match self.board.status() {
                        GameStatus::InProgress => Phase::Planning,
                        finished => Phase::GameOver(finished),
                    };
                    return Ok(());
                }
                Some(report) => {
                    warn!(
                        "board does not match expectation: {} (attempt {}/{})",
                        report, attempt, self.config.detect_retries
                    );
                    tokio::time::sleep(self.config.detect_interval).await;
                }
            }
        }

        warn!("could not confirm the declared move; abandoning this turn");
        let _ = self
            .link
            .send(LinkMessage::Error {
                message: "board state mismatch".into(),
            })
            .await;
        self.pending_move = None;
        self.phase = Phase::WaitingForTurn;
        Ok(())
    }

    /// Pick the robot's reply and solve the pick-and-place waypoints.
    /// An unreachable cell falls through to the next-ranked one.
    async fn plan_turn(&mut self) -> Result<(), SessionError> {
        let Some(slot) = self.rack.next_slot() else {
            warn!("out of robot pieces, aborting session");
            self.phase = Phase::GameOver(GameStatus::Aborted);
            return Ok(());
        };

        for (row, col) in strategy::ranked_moves(&self.board) {
            let target = self.config.board.cell_center(row, col);
            match self.plan_pick_and_place(slot, target) {
                Ok(plan) => {
                    info!("robot will play ({}, {})", row, col);
                    self.plan = plan;
                    self.planned_cell = Some((row, col));
                    self.phase = Phase::Executing;
                    return Ok(());
                }
                Err(e) => {
                    warn!("cell ({}, {}) not plannable: {}; re-planning", row, col, e);
                }
            }
        }

        warn!("no reachable cell to play");
        let _ = self
            .link
            .send(LinkMessage::Error {
                message: "no reachable move".into(),
            })
            .await;
        self.phase = Phase::GameOver(GameStatus::Aborted);
        Ok(())
    }

    /// Waypoint sequence for fetching a piece from `slot` and placing it at
    /// `cell`: approach from above, dip, grip or release, retreat, and
    /// return home.
    fn plan_pick_and_place(
        &self,
        slot: Point3,
        cell: Point3,
    ) -> Result<Vec<JointAngles>, KinematicsError> {
        let cfg = &self.config;
        let up = cfg.approach_clearance;
        let roll = cfg.wrist_roll_deg;
        let open = cfg.grip_open_deg;
        let closed = cfg.grip_closed_deg;

        let above_slot_open = self.solver.solve(slot.offset_z(up), -90.0, roll, open)?;
        let at_slot_open = self.solver.solve(slot, -90.0, roll, open)?;
        let mut at_slot_closed = at_slot_open;
        at_slot_closed.set(Joint::Gripper, closed);
        let mut above_slot_closed = above_slot_open;
        above_slot_closed.set(Joint::Gripper, closed);

        let above_cell_closed = self.solver.solve(cell.offset_z(up), -90.0, roll, closed)?;
        let at_cell_closed = self.solver.solve(cell, -90.0, roll, closed)?;
        let mut at_cell_open = at_cell_closed;
        at_cell_open.set(Joint::Gripper, open);
        let mut above_cell_open = above_cell_closed;
        above_cell_open.set(Joint::Gripper, open);

        Ok(vec![
            above_slot_open,
            at_slot_open,
            at_slot_closed,
            above_slot_closed,
            above_cell_closed,
            at_cell_closed,
            at_cell_open,
            above_cell_open,
            cfg.home,
        ])
    }

    /// Drive the planned waypoints through the motion task. A fault hands
    /// control to recovery; the board is untouched until Confirming.
    async fn execute(&mut self) -> Result<(), SessionError> {
        let plan = std::mem::take(&mut self.plan);
        for (i, target) in plan.iter().enumerate() {
            match self.run_waypoint(*target).await {
                Ok(CommandStatus::Done) => {
                    debug!("waypoint {}/{} done", i + 1, plan.len());
                }
                Ok(status) => {
                    warn!("waypoint {}/{} ended {:?}", i + 1, plan.len(), status);
                    self.phase = Phase::Recovering;
                    return Ok(());
                }
                Err(MotionError::TaskGone) => return Err(MotionError::TaskGone.into()),
                Err(e) => {
                    warn!("waypoint {}/{} failed: {}", i + 1, plan.len(), e);
                    self.phase = Phase::Recovering;
                    return Ok(());
                }
            }
        }
        self.phase = Phase::Confirming;
        Ok(())
    }

    /// The placement is hardware-confirmed: commit it to the board and
    /// report to the server. A link failure here costs only the report.
    async fn confirm(&mut self) -> Result<(), SessionError> {
        let (row, col) = self
            .planned_cell
            .take()
            .expect("planned cell is set before Confirming");

        self.board.set(row, col, Cell::Robot);
        self.rack.consume();
        info!(
            "robot placed at ({}, {}), {} piece(s) left",
            row,
            col,
            self.rack.remaining()
        );

        let status = self.board.status();
        let report = LinkMessage::GameState {
            cells: self.board.to_wire(),
            status,
        };
        if let Err(e) = self.link.send(report).await {
            warn!("could not report the move: {}", e);
        }

        self.recovery_attempts = 0;
        self.phase = match status {
            GameStatus::InProgress => Phase::WaitingForTurn,
            finished => Phase::GameOver(finished),
        };
        Ok(())
    }

    /// Bounded re-homing after a motion fault. Exhausting the budget ends
    /// the session as unrecoverable.
    async fn recover(&mut self) -> Result<(), SessionError> {
        if self.recovery_attempts >= self.config.recovery_budget {
            return Err(SessionError::Unrecoverable {
                attempts: self.recovery_attempts,
            });
        }
        self.recovery_attempts += 1;
        info!(
            "recovery attempt {}/{}: re-homing",
            self.recovery_attempts, self.config.recovery_budget
        );

        self.motion.reset().await?;
        match self.run_waypoint(self.config.home).await {
            Ok(CommandStatus::Done) => {
                info!("recovered; abandoning the interrupted turn");
                self.pending_move = None;
                self.planned_cell = None;
                self.plan.clear();
                self.recovery_attempts = 0;
                self.phase = Phase::WaitingForTurn;
            }
            Ok(status) => warn!("re-homing ended {:?}", status),
            Err(MotionError::TaskGone) => return Err(MotionError::TaskGone.into()),
            Err(e) => warn!("re-homing failed: {}", e),
        }
        Ok(())
    }

    /// Initial move to the home pose. `false` means the motion faulted and
    /// recovery should take over.
    async fn go_home(&mut self) -> Result<bool, SessionError> {
        match self.run_waypoint(self.config.home).await {
            Ok(CommandStatus::Done) => Ok(true),
            Ok(status) => {
                warn!("homing ended {:?}", status);
                Ok(false)
            }
            Err(MotionError::Faulted(reason)) => {
                warn!("homing rejected: controller faulted ({})", reason);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort park on the way out, clearing any fault first.
    async fn park(&mut self) -> Result<(), MotionError> {
        self.motion.reset().await?;
        match self.run_waypoint(self.config.home).await? {
            CommandStatus::Done => {
                info!("arm parked at home");
            }
            status => warn!("parking ended {:?}", status),
        }
        Ok(())
    }

    /// Enqueue one waypoint, waiting out transient `Busy` rejections, and
    /// block until it reaches a terminal status.
    async fn run_waypoint(&self, target: JointAngles) -> Result<CommandStatus, MotionError> {
        for _ in 0..50 {
            match self.motion.enqueue(target, self.config.move_duration).await {
                Ok(handle) => return self.motion.wait(handle).await,
                Err(MotionError::Busy) => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(MotionError::Busy)
    }

    fn latest_frame(&self) -> Option<Arc<RgbaImage>> {
        self.frames.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arm_kinematics::{ArmGeometry, JointLimits, JOINT_COUNT};
    use arm_link::LinkConfig;
    use arm_motion::{spawn_motion_task, MotionConfig, MotionController, SimulatedDriver};
    use arm_vision::{Calibration, Classifier, LabeledRegion, PieceColor};
    use std::sync::Mutex;
    use tokio::io::DuplexStream;

    /// Classifier whose output the test scripts directly.
    #[derive(Clone)]
    struct ScriptedClassifier(Arc<Mutex<Vec<LabeledRegion>>>);

    impl Classifier for ScriptedClassifier {
        fn infer(&self, _frame: &RgbaImage) -> Vec<LabeledRegion> {
            self.0.lock().unwrap().clone()
        }
    }

    fn test_session_config() -> SessionConfig {
        SessionConfig {
            move_duration: Duration::from_secs(2),
            turn_timeout: Duration::from_millis(400),
            detect_retries: 3,
            detect_interval: Duration::from_millis(10),
            recovery_budget: 2,
            ..SessionConfig::default()
        }
    }

    fn fast_motion_config() -> MotionConfig {
        MotionConfig {
            tick_period: Duration::from_millis(2),
            max_delta_per_tick: 5.0,
            settle: Duration::from_millis(4),
        }
    }

    struct Rig {
        coordinator: Coordinator<DuplexStream>,
        peer: LinkTransport<DuplexStream>,
        regions: Arc<Mutex<Vec<LabeledRegion>>>,
    }

    fn rig(driver: SimulatedDriver, start: JointAngles, config: SessionConfig) -> Rig {
        let controller =
            MotionController::new(fast_motion_config(), JointLimits::default(), start);
        let motion = spawn_motion_task(controller, Box::new(driver), 16);

        let regions = Arc::new(Mutex::new(Vec::new()));
        let localizer = Localizer::new(Box::new(ScriptedClassifier(regions.clone())), 0.6)
            .with_calibration(Calibration {
                pixel_to_arm: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
                surface_z: config.board.origin.z,
            });

        // The receiver keeps serving the last frame after the sender drops.
        let (_frame_tx, frame_rx) = watch::channel(Some(Arc::new(RgbaImage::new(4, 4))));

        let (our_io, peer_io) = tokio::io::duplex(8192);
        let link = LinkTransport::new(
            our_io,
            LinkConfig {
                ack_timeout: Duration::from_millis(40),
                retry_budget: 3,
                recv_timeout: Duration::from_millis(50),
            },
        );
        let peer = LinkTransport::new(
            peer_io,
            LinkConfig {
                ack_timeout: Duration::from_millis(200),
                retry_budget: 5,
                recv_timeout: Duration::from_millis(200),
            },
        );

        let solver = Solver::new(ArmGeometry::default(), JointLimits::default());
        let coordinator = Coordinator::new(link, motion, localizer, frame_rx, solver, config);

        Rig {
            coordinator,
            peer,
            regions,
        }
    }

    fn piece_at(color: PieceColor, point: Point3) -> LabeledRegion {
        // The test calibration is the identity, so pixel centroids are
        // arm-space coordinates.
        LabeledRegion {
            color,
            centroid: (point.x, point.y),
            area: 1600,
            confidence: 0.9,
        }
    }

    async fn recv_game_state(
        peer: &mut LinkTransport<DuplexStream>,
    ) -> ([[u8; 3]; 3], GameStatus) {
        for _ in 0..100 {
            match peer.receive().await {
                Ok(LinkMessage::GameState { cells, status }) => return (cells, status),
                Ok(_) => {}
                Err(LinkError::ReceiveTimeout) => {}
                Err(e) => panic!("peer link failed: {}", e),
            }
        }
        panic!("no game state received");
    }

    #[tokio::test]
    async fn test_full_turn_places_robot_piece() {
        let config = test_session_config();
        let home = config.home;
        let mut r = rig(SimulatedDriver::new(), home, config.clone());

        // The physical board will show the player's piece in (0, 0).
        *r.regions.lock().unwrap() =
            vec![piece_at(PieceColor::Blue, config.board.cell_center(0, 0))];

        let mut coordinator = r.coordinator;
        let session = tokio::spawn(async move { coordinator.run().await });

        r.peer
            .send(LinkMessage::MoveRequest { row: 0, col: 0 })
            .await
            .expect("declared move should be accepted");

        // After confirming the move, the robot replies in the center.
        let (cells, status) = recv_game_state(&mut r.peer).await;
        assert_eq!(status, GameStatus::InProgress);
        assert_eq!(cells[0][0], 1);
        assert_eq!(cells[1][1], 2);

        // No further moves arrive; the session times out and aborts.
        let (_, final_status) = recv_game_state(&mut r.peer).await;
        assert_eq!(final_status, GameStatus::Aborted);
        assert_eq!(session.await.unwrap().unwrap(), GameStatus::Aborted);
    }

    #[tokio::test]
    async fn test_recovery_exhaustion_is_unrecoverable() {
        let config = test_session_config();
        // Start away from home so every homing attempt must actually move,
        // against a driver that never acks.
        let start = JointAngles([80.0; JOINT_COUNT]);
        let r = rig(SimulatedDriver::failing_after(0), start, config.clone());

        let mut coordinator = r.coordinator;
        let session = tokio::spawn(async move { coordinator.run().await });

        let err = session.await.unwrap().unwrap_err();
        match err {
            SessionError::Unrecoverable { attempts } => {
                assert_eq!(attempts, config.recovery_budget)
            }
            other => panic!("expected Unrecoverable, got {:?}", other),
        }
        // Keep the peer alive until the session has reported.
        drop(r.peer);
    }

    #[tokio::test]
    async fn test_planning_skips_unreachable_cells() {
        let mut config = test_session_config();
        // Push the board out so the center cell sits beyond the reach
        // envelope while the near corner stays solvable.
        config.board.origin = Point3::new(140.0, -70.0, 12.0);
        config.board.cell_pitch = 70.0;

        let home = config.home;
        let mut r = rig(SimulatedDriver::new(), home, config);

        r.coordinator.plan_turn().await.unwrap();
        assert_eq!(r.coordinator.planned_cell, Some((0, 0)));
        assert_eq!(r.coordinator.phase(), Phase::Executing);
    }
}
