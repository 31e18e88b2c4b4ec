use tracing::debug;

#[derive(Debug, Clone, thiserror::Error)]
#[error("servo driver: {0}")]
pub struct DriveError(pub String);

/// Boundary to the external PWM driver board. Implementations write one
/// channel at a time; returning an error means the write was not
/// acknowledged.
///
/// Only the motion task holds a driver. No other task issues raw servo
/// commands.
pub trait ServoDriver: Send {
    fn drive(&mut self, channel: usize, angle_deg: f64) -> Result<(), DriveError>;
}

/// In-memory driver for tests and hardware-free runs. Records every write
/// and can be scripted to start failing after a given number of them.
#[derive(Debug, Default)]
pub struct SimulatedDriver {
    history: Vec<(usize, f64)>,
    fail_after: Option<usize>,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Driver that acknowledges the first `writes` commands and rejects
    /// everything after.
    pub fn failing_after(writes: usize) -> Self {
        Self {
            history: Vec::new(),
            fail_after: Some(writes),
        }
    }

    /// Last commanded angle on `channel`, if any write reached it.
    pub fn angle(&self, channel: usize) -> Option<f64> {
        self.history
            .iter()
            .rev()
            .find(|(c, _)| *c == channel)
            .map(|(_, a)| *a)
    }

    /// All acknowledged writes to `channel`, in order.
    pub fn writes_to(&self, channel: usize) -> Vec<f64> {
        self.history
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, a)| *a)
            .collect()
    }

    pub fn write_count(&self) -> usize {
        self.history.len()
    }
}

impl ServoDriver for SimulatedDriver {
    fn drive(&mut self, channel: usize, angle_deg: f64) -> Result<(), DriveError> {
        if let Some(limit) = self.fail_after {
            if self.history.len() >= limit {
                return Err(DriveError(format!(
                    "no ack from channel {} (scripted failure)",
                    channel
                )));
            }
        }
        debug!("servo ch{} -> {:.1}°", channel, angle_deg);
        self.history.push((channel, angle_deg));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_driver_records_writes() {
        let mut driver = SimulatedDriver::new();
        driver.drive(0, 90.0).unwrap();
        driver.drive(0, 95.0).unwrap();
        driver.drive(3, 10.0).unwrap();
        assert_eq!(driver.angle(0), Some(95.0));
        assert_eq!(driver.writes_to(0), vec![90.0, 95.0]);
        assert_eq!(driver.angle(7), None);
    }

    #[test]
    fn test_scripted_failure() {
        let mut driver = SimulatedDriver::failing_after(1);
        assert!(driver.drive(0, 90.0).is_ok());
        assert!(driver.drive(0, 91.0).is_err());
    }
}
