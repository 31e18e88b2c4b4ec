use crate::layout::BoardLayout;
use arm_link::GameStatus;
use arm_vision::{Detection, PieceColor};
use tracing::warn;

/// Occupancy of one board cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    Empty,
    Player,
    Robot,
}

impl From<PieceColor> for Cell {
    fn from(color: PieceColor) -> Self {
        match color {
            PieceColor::Blue => Cell::Player,
            PieceColor::Red => Cell::Robot,
        }
    }
}

impl Cell {
    /// Wire encoding: 0 = empty, 1 = player, 2 = robot.
    pub fn to_wire(self) -> u8 {
        match self {
            Cell::Empty => 0,
            Cell::Player => 1,
            Cell::Robot => 2,
        }
    }
}

/// The 3x3 game board. Owned by the coordinator and mutated only after a
/// placement is physically confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Board {
    cells: [[Cell; 3]; 3],
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

impl Board {
    pub fn new() -> Self {
        Self {
            cells: [[Cell::Empty; 3]; 3],
        }
    }

    pub fn get(&self, row: usize, col: usize) -> Cell {
        self.cells[row][col]
    }

    pub fn set(&mut self, row: usize, col: usize, cell: Cell) {
        self.cells[row][col] = cell;
    }

    /// Copy of this board with one extra piece placed.
    pub fn with(&self, row: usize, col: usize, cell: Cell) -> Board {
        let mut next = *self;
        next.set(row, col, cell);
        next
    }

    pub fn is_full(&self) -> bool {
        self.cells
            .iter()
            .all(|row| row.iter().all(|&c| c != Cell::Empty))
    }

    /// The side with three in a row, if any.
    pub fn winner(&self) -> Option<Cell> {
        let lines: [[(usize, usize); 3]; 8] = [
            [(0, 0), (0, 1), (0, 2)],
            [(1, 0), (1, 1), (1, 2)],
            [(2, 0), (2, 1), (2, 2)],
            [(0, 0), (1, 0), (2, 0)],
            [(0, 1), (1, 1), (2, 1)],
            [(0, 2), (1, 2), (2, 2)],
            [(0, 0), (1, 1), (2, 2)],
            [(0, 2), (1, 1), (2, 0)],
        ];
        for line in lines {
            let first = self.get(line[0].0, line[0].1);
            if first != Cell::Empty && line.iter().all(|&(r, c)| self.get(r, c) == first) {
                return Some(first);
            }
        }
        None
    }

    pub fn is_draw(&self) -> bool {
        self.is_full() && self.winner().is_none()
    }

    /// Outcome of the game as seen on this board.
    pub fn status(&self) -> GameStatus {
        match self.winner() {
            Some(Cell::Player) => GameStatus::PlayerWin,
            Some(Cell::Robot) => GameStatus::RobotWin,
            _ if self.is_full() => GameStatus::Draw,
            _ => GameStatus::InProgress,
        }
    }

    /// First cell where `observed` disagrees with this board, described for
    /// the log. `None` means the physical board matches expectation.
    pub fn mismatch(&self, observed: &Board) -> Option<String> {
        for row in 0..3 {
            for col in 0..3 {
                let expected = self.get(row, col);
                let seen = observed.get(row, col);
                if expected != seen {
                    return Some(format!(
                        "cell ({}, {}): expected {:?}, observed {:?}",
                        row, col, expected, seen
                    ));
                }
            }
        }
        None
    }

    /// Console rendering: X = player, O = robot.
    pub fn render(&self) -> String {
        let symbol = |c: Cell| match c {
            Cell::Empty => ' ',
            Cell::Player => 'X',
            Cell::Robot => 'O',
        };
        let mut out = String::from("-------------\n");
        for row in 0..3 {
            out.push('|');
            for col in 0..3 {
                out.push(' ');
                out.push(symbol(self.get(row, col)));
                out.push_str(" |");
            }
            out.push_str("\n-------------\n");
        }
        out
    }

    pub fn to_wire(&self) -> [[u8; 3]; 3] {
        let mut out = [[0u8; 3]; 3];
        for row in 0..3 {
            for col in 0..3 {
                out[row][col] = self.get(row, col).to_wire();
            }
        }
        out
    }

    /// Build the board occupancy from one frame's detections. Detections
    /// that land outside every cell's snap radius are ignored; a cell is
    /// never overwritten once claimed by an earlier detection.
    pub fn from_detections<I>(detections: I, layout: &BoardLayout) -> Board
    where
        I: IntoIterator<Item = Detection>,
    {
        let mut board = Board::new();
        for detection in detections {
            let Some((row, col)) = layout.cell_for(detection.world) else {
                warn!(
                    "{} piece at ({:.0}, {:.0}) is not on the board",
                    detection.color, detection.world.x, detection.world.y
                );
                continue;
            };
            let cell = Cell::from(detection.color);
            match board.get(row, col) {
                Cell::Empty => board.set(row, col, cell),
                existing if existing != cell => warn!(
                    "cell ({}, {}) claimed by both colors, keeping {:?}",
                    row, col, existing
                ),
                _ => {}
            }
        }
        board
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arm_kinematics::Point3;

    fn layout() -> BoardLayout {
        BoardLayout::default()
    }

    #[test]
    fn test_row_win() {
        let mut board = Board::new();
        for col in 0..3 {
            board.set(1, col, Cell::Robot);
        }
        assert_eq!(board.winner(), Some(Cell::Robot));
        assert_eq!(board.status(), GameStatus::RobotWin);
    }

    #[test]
    fn test_diagonal_win() {
        let mut board = Board::new();
        board.set(0, 2, Cell::Player);
        board.set(1, 1, Cell::Player);
        board.set(2, 0, Cell::Player);
        assert_eq!(board.winner(), Some(Cell::Player));
    }

    #[test]
    fn test_draw() {
        // X O X / X O O / O X X — full, no line.
        let mut board = Board::new();
        let fill = [
            (0, 0, Cell::Player),
            (0, 1, Cell::Robot),
            (0, 2, Cell::Player),
            (1, 0, Cell::Player),
            (1, 1, Cell::Robot),
            (1, 2, Cell::Robot),
            (2, 0, Cell::Robot),
            (2, 1, Cell::Player),
            (2, 2, Cell::Player),
        ];
        for (r, c, cell) in fill {
            board.set(r, c, cell);
        }
        assert!(board.is_draw());
        assert_eq!(board.status(), GameStatus::Draw);
    }

    #[test]
    fn test_mismatch_reports_first_difference() {
        let expected = Board::new().with(0, 0, Cell::Player);
        let observed = Board::new();
        let report = expected.mismatch(&observed).unwrap();
        assert!(report.contains("(0, 0)"));

        assert!(expected.mismatch(&expected).is_none());
    }

    #[test]
    fn test_from_detections_maps_to_cells() {
        let layout = layout();
        let detections = vec![
            Detection {
                color: arm_vision::PieceColor::Blue,
                pixel: (0.0, 0.0),
                confidence: 0.9,
                world: layout.cell_center(0, 0),
            },
            Detection {
                color: arm_vision::PieceColor::Red,
                pixel: (0.0, 0.0),
                confidence: 0.9,
                world: layout.cell_center(2, 1).offset_z(0.0),
            },
        ];
        let board = Board::from_detections(detections, &layout);
        assert_eq!(board.get(0, 0), Cell::Player);
        assert_eq!(board.get(2, 1), Cell::Robot);
        assert_eq!(board.get(1, 1), Cell::Empty);
    }

    #[test]
    fn test_from_detections_ignores_off_board() {
        let layout = layout();
        let detections = vec![Detection {
            color: arm_vision::PieceColor::Blue,
            pixel: (0.0, 0.0),
            confidence: 0.9,
            world: Point3::new(-500.0, -500.0, 0.0),
        }];
        let board = Board::from_detections(detections, &layout);
        assert_eq!(board, Board::new());
    }

    #[test]
    fn test_render() {
        let board = Board::new().with(0, 1, Cell::Player).with(1, 1, Cell::Robot);
        let rendered = board.render();
        assert!(rendered.contains("|   | X |   |"));
        assert!(rendered.contains("|   | O |   |"));
    }

    #[test]
    fn test_wire_encoding() {
        let board = Board::new()
            .with(0, 1, Cell::Player)
            .with(1, 1, Cell::Robot);
        let wire = board.to_wire();
        assert_eq!(wire[0][1], 1);
        assert_eq!(wire[1][1], 2);
        assert_eq!(wire[2][2], 0);
    }
}
