use arm_kinematics::Point3;
use serde::{Deserialize, Serialize};

/// Physical placement of the 3x3 board within the arm's workspace.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoardLayout {
    /// Center of cell (0, 0) in arm-space.
    pub origin: Point3,
    /// Center-to-center distance between adjacent cells, millimeters.
    /// Rows grow along +x, columns along +y.
    pub cell_pitch: f64,
    /// How close an observed piece must sit to a cell center to count as
    /// occupying it.
    pub snap_radius: f64,
}

impl Default for BoardLayout {
    fn default() -> Self {
        Self {
            origin: Point3::new(110.0, -36.0, 12.0),
            cell_pitch: 36.0,
            snap_radius: 15.0,
        }
    }
}

impl BoardLayout {
    pub fn cell_center(&self, row: usize, col: usize) -> Point3 {
        Point3::new(
            self.origin.x + row as f64 * self.cell_pitch,
            self.origin.y + col as f64 * self.cell_pitch,
            self.origin.z,
        )
    }

    /// Cell whose center lies within the snap radius of `point`, if any.
    pub fn cell_for(&self, point: Point3) -> Option<(usize, usize)> {
        for row in 0..3 {
            for col in 0..3 {
                let center = self.cell_center(row, col);
                let dx = point.x - center.x;
                let dy = point.y - center.y;
                if (dx * dx + dy * dy).sqrt() <= self.snap_radius {
                    return Some((row, col));
                }
            }
        }
        None
    }
}

/// Supply of new game pieces staged beside the board, consumed in slot
/// order over a session.
#[derive(Debug, Clone)]
pub struct StorageRack {
    slots: Vec<Point3>,
    next: usize,
}

impl StorageRack {
    /// Rack of `count` slots starting at `origin`, spaced `pitch`
    /// millimeters along +x.
    pub fn new(origin: Point3, pitch: f64, count: usize) -> Self {
        let slots = (0..count)
            .map(|i| Point3::new(origin.x + i as f64 * pitch, origin.y, origin.z))
            .collect();
        Self { slots, next: 0 }
    }

    /// Position of the next unused piece, if any remain.
    pub fn next_slot(&self) -> Option<Point3> {
        self.slots.get(self.next).copied()
    }

    /// Mark the current slot as used, after its piece is physically gone.
    pub fn consume(&mut self) {
        if self.next < self.slots.len() {
            self.next += 1;
        }
    }

    pub fn remaining(&self) -> usize {
        self.slots.len() - self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_centers_are_spaced_by_pitch() {
        let layout = BoardLayout::default();
        let a = layout.cell_center(0, 0);
        let b = layout.cell_center(0, 1);
        let c = layout.cell_center(1, 0);
        assert_eq!(b.y - a.y, layout.cell_pitch);
        assert_eq!(c.x - a.x, layout.cell_pitch);
    }

    #[test]
    fn test_cell_for_snaps_within_radius() {
        let layout = BoardLayout::default();
        let near = layout.cell_center(1, 2).offset_z(0.0);
        let shifted = Point3::new(near.x + 8.0, near.y - 5.0, near.z);
        assert_eq!(layout.cell_for(shifted), Some((1, 2)));

        let between = Point3::new(near.x + layout.cell_pitch / 2.0, near.y, near.z);
        assert_eq!(layout.cell_for(between), None);
    }

    #[test]
    fn test_rack_consumes_in_order() {
        let mut rack = StorageRack::new(Point3::new(50.0, -100.0, 12.0), 25.0, 5);
        assert_eq!(rack.remaining(), 5);

        let first = rack.next_slot().unwrap();
        assert_eq!(first.x, 50.0);
        rack.consume();

        let second = rack.next_slot().unwrap();
        assert_eq!(second.x, 75.0);
        assert_eq!(rack.remaining(), 4);

        for _ in 0..4 {
            rack.consume();
        }
        assert!(rack.next_slot().is_none());
        assert_eq!(rack.remaining(), 0);
    }
}
