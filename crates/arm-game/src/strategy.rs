use crate::{Board, Cell};

/// Fixed preference order for non-forced moves: center, then corners, then
/// edges. The order is deterministic so a given board always yields the
/// same move.
const CENTER: (usize, usize) = (1, 1);
const CORNERS: [(usize, usize); 4] = [(0, 0), (0, 2), (2, 0), (2, 2)];
const EDGES: [(usize, usize); 4] = [(0, 1), (1, 0), (1, 2), (2, 1)];

/// Candidate moves for the robot, best first: winning cells, then cells
/// that block an opponent win, then the positional preference order.
///
/// The list always covers every empty cell, so a caller that finds the
/// best cell physically unreachable can fall through to the next one.
pub fn ranked_moves(board: &Board) -> Vec<(usize, usize)> {
    let mut ranked = Vec::new();
    let mut push = |cell: (usize, usize), ranked: &mut Vec<(usize, usize)>| {
        if board.get(cell.0, cell.1) == Cell::Empty && !ranked.contains(&cell) {
            ranked.push(cell);
        }
    };

    // Winning placements first.
    for cell in empty_cells(board) {
        if board.with(cell.0, cell.1, Cell::Robot).winner() == Some(Cell::Robot) {
            push(cell, &mut ranked);
        }
    }

    // Then block any opponent win.
    for cell in empty_cells(board) {
        if board.with(cell.0, cell.1, Cell::Player).winner() == Some(Cell::Player) {
            push(cell, &mut ranked);
        }
    }

    push(CENTER, &mut ranked);
    for cell in CORNERS {
        push(cell, &mut ranked);
    }
    for cell in EDGES {
        push(cell, &mut ranked);
    }

    ranked
}

/// The single best move, if the board has room.
pub fn choose_move(board: &Board) -> Option<(usize, usize)> {
    ranked_moves(board).into_iter().next()
}

fn empty_cells(board: &Board) -> Vec<(usize, usize)> {
    let mut cells = Vec::new();
    for row in 0..3 {
        for col in 0..3 {
            if board.get(row, col) == Cell::Empty {
                cells.push((row, col));
            }
        }
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_takes_winning_move() {
        let board = Board::new()
            .with(0, 0, Cell::Robot)
            .with(0, 1, Cell::Robot)
            .with(2, 2, Cell::Player)
            .with(1, 1, Cell::Player);
        assert_eq!(choose_move(&board), Some((0, 2)));
    }

    #[test]
    fn test_blocks_opponent_win() {
        let board = Board::new()
            .with(2, 0, Cell::Player)
            .with(2, 1, Cell::Player)
            .with(1, 1, Cell::Robot);
        assert_eq!(choose_move(&board), Some((2, 2)));
    }

    #[test]
    fn test_win_preferred_over_block() {
        // Both sides have two in a row; taking the win beats blocking.
        let board = Board::new()
            .with(0, 0, Cell::Robot)
            .with(0, 1, Cell::Robot)
            .with(2, 0, Cell::Player)
            .with(2, 1, Cell::Player);
        assert_eq!(choose_move(&board), Some((0, 2)));
    }

    #[test]
    fn test_prefers_center_then_corner() {
        let board = Board::new().with(0, 1, Cell::Player);
        assert_eq!(choose_move(&board), Some((1, 1)));

        let center_taken = board.with(1, 1, Cell::Player);
        assert_eq!(choose_move(&center_taken), Some((0, 0)));
    }

    #[test]
    fn test_ranked_covers_all_empty_cells() {
        let board = Board::new().with(1, 1, Cell::Robot).with(0, 0, Cell::Player);
        let ranked = ranked_moves(&board);
        assert_eq!(ranked.len(), 7);
        assert!(!ranked.contains(&(1, 1)));
        assert!(!ranked.contains(&(0, 0)));
    }

    #[test]
    fn test_full_board_has_no_move() {
        let mut board = Board::new();
        for row in 0..3 {
            for col in 0..3 {
                board.set(row, col, Cell::Robot);
            }
        }
        assert_eq!(choose_move(&board), None);
    }

    #[test]
    fn test_deterministic() {
        let board = Board::new().with(0, 0, Cell::Player);
        assert_eq!(ranked_moves(&board), ranked_moves(&board));
    }
}
