use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::identity::Identity;

/// Number of rows; row `0` is the top of the grid.
pub const ROWS: usize = 6;
/// Number of columns.
pub const COLUMNS: usize = 7;
const RUN: usize = 4;

/// Step directions scanned for a run: horizontal, vertical and both diagonals.
const DIRECTIONS: [(isize, isize); 4] = [(0, 1), (1, 0), (1, 1), (-1, 1)];

/// Errors raised while placing a disc or decoding a persisted grid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardError {
    /// Column index past the right edge.
    #[error("column {column} is out of range (0-{})", COLUMNS - 1)]
    ColumnOutOfRange { column: usize },
    /// No empty cell left in the column.
    #[error("column {column} is full")]
    ColumnFull { column: usize },
    /// Persisted payload is not a valid grid.
    #[error("malformed board: {0}")]
    Malformed(String),
}

/// 6×7 grid of discs, kept gap-free from the bottom row up in every column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Board {
    cells: [[Option<Identity>; COLUMNS]; ROWS],
}

impl Default for Board {
    fn default() -> Self {
        Self::empty()
    }
}

impl Board {
    /// Grid without any disc.
    pub const fn empty() -> Self {
        Self {
            cells: [[None; COLUMNS]; ROWS],
        }
    }

    /// Disc at `row`/`column`, `None` when empty or outside the grid.
    pub fn cell(&self, row: usize, column: usize) -> Option<Identity> {
        self.cells.get(row)?.get(column).copied().flatten()
    }

    /// True when the top cell of `column` is taken.
    pub fn is_column_full(&self, column: usize) -> bool {
        column < COLUMNS && self.cells[0][column].is_some()
    }

    /// True when no column accepts another disc.
    pub fn is_full(&self) -> bool {
        (0..COLUMNS).all(|column| self.is_column_full(column))
    }

    /// Let a disc fall into `column`, returning the row it landed on.
    pub fn drop_disc(&mut self, column: usize, identity: Identity) -> Result<usize, BoardError> {
        if column >= COLUMNS {
            return Err(BoardError::ColumnOutOfRange { column });
        }
        let row = (0..ROWS)
            .rev()
            .find(|row| self.cells[*row][column].is_none())
            .ok_or(BoardError::ColumnFull { column })?;
        self.cells[row][column] = Some(identity);
        Ok(row)
    }

    /// Scan every window of four cells; stops at the first run owned by `identity`.
    pub fn has_connect_four(&self, identity: Identity) -> bool {
        (0..ROWS).any(|row| {
            (0..COLUMNS).any(|column| {
                DIRECTIONS
                    .iter()
                    .any(|&(dr, dc)| self.run_from(row, column, dr, dc, identity))
            })
        })
    }

    fn run_from(&self, row: usize, column: usize, dr: isize, dc: isize, identity: Identity) -> bool {
        (0..RUN as isize).all(|step| {
            let r = row as isize + dr * step;
            let c = column as isize + dc * step;
            r >= 0
                && c >= 0
                && self.cell(r as usize, c as usize) == Some(identity)
        })
    }

    /// True when every column's discs sit contiguously on the bottom row.
    pub fn is_settled(&self) -> bool {
        (0..COLUMNS).all(|column| {
            (1..ROWS).all(|row| {
                self.cells[row - 1][column].is_none() || self.cells[row][column].is_some()
            })
        })
    }

    /// Payload stored in the `board` entry.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse the `board` entry, rejecting grids that hold observers or floating discs.
    pub fn decode(bytes: &[u8]) -> Result<Self, BoardError> {
        let board: Board =
            serde_json::from_slice(bytes).map_err(|err| BoardError::Malformed(err.to_string()))?;
        if board
            .cells
            .iter()
            .flatten()
            .any(|cell| *cell == Some(Identity::Observer))
        {
            return Err(BoardError::Malformed("observer disc on the grid".into()));
        }
        if !board.is_settled() {
            return Err(BoardError::Malformed("disc floating above a gap".into()));
        }
        Ok(board)
    }

    /// Text rendering with column indices underneath.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&"-".repeat(19));
        out.push('\n');
        for row in &self.cells {
            let line = row
                .iter()
                .map(|cell| cell.map_or('.', Identity::symbol).to_string())
                .collect::<Vec<_>>()
                .join(" ");
            out.push_str(&format!("| {line} |\n"));
        }
        let indices = (0..COLUMNS)
            .map(|column| column.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        out.push_str(&format!("  {indices}\n"));
        out.push_str(&"-".repeat(19));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE: Identity = Identity::PlayerOne;
    const TWO: Identity = Identity::PlayerTwo;

    fn play(moves: &[(usize, Identity)]) -> Board {
        let mut board = Board::empty();
        for &(column, identity) in moves {
            board.drop_disc(column, identity).unwrap();
        }
        board
    }

    #[test]
    fn discs_stack_from_the_bottom() {
        let mut board = Board::empty();
        assert_eq!(board.drop_disc(3, ONE), Ok(5));
        assert_eq!(board.drop_disc(3, TWO), Ok(4));
        assert_eq!(board.cell(5, 3), Some(ONE));
        assert_eq!(board.cell(4, 3), Some(TWO));
        assert!(board.is_settled());
    }

    #[test]
    fn full_column_is_rejected_without_change() {
        let mut board = Board::empty();
        for turn in 0..ROWS {
            board.drop_disc(0, if turn % 2 == 0 { ONE } else { TWO }).unwrap();
        }
        let before = board.clone();
        assert_eq!(board.drop_disc(0, ONE), Err(BoardError::ColumnFull { column: 0 }));
        assert_eq!(board, before);
        assert!(board.is_column_full(0));
    }

    #[test]
    fn out_of_range_column_is_rejected() {
        let mut board = Board::empty();
        assert_eq!(
            board.drop_disc(COLUMNS, ONE),
            Err(BoardError::ColumnOutOfRange { column: COLUMNS })
        );
    }

    #[test]
    fn vertical_run_needs_four_discs() {
        let mut board = Board::empty();
        for _ in 0..3 {
            board.drop_disc(3, ONE).unwrap();
            board.drop_disc(0, TWO).unwrap();
        }
        assert!(!board.has_connect_four(ONE));
        board.drop_disc(3, ONE).unwrap();
        assert!(board.has_connect_four(ONE));
        assert!(!board.has_connect_four(TWO));
    }

    #[test]
    fn horizontal_run_on_bottom_row() {
        let board = play(&[(0, TWO), (1, TWO), (2, TWO), (6, ONE), (3, TWO)]);
        assert!(board.has_connect_four(TWO));
    }

    #[test]
    fn rising_diagonal() {
        let board = play(&[
            (0, ONE),
            (1, TWO),
            (1, ONE),
            (2, TWO),
            (2, TWO),
            (2, ONE),
            (3, TWO),
            (3, TWO),
            (3, TWO),
            (3, ONE),
        ]);
        assert!(board.has_connect_four(ONE));
        assert!(!board.has_connect_four(TWO));
    }

    #[test]
    fn falling_diagonal() {
        let board = play(&[
            (6, TWO),
            (5, ONE),
            (5, TWO),
            (4, ONE),
            (4, ONE),
            (4, TWO),
            (3, ONE),
            (3, ONE),
            (3, ONE),
            (3, TWO),
        ]);
        assert!(board.has_connect_four(TWO));
    }

    #[test]
    fn board_is_full_only_after_every_cell() {
        let mut board = Board::empty();
        for row in 0..ROWS {
            for column in 0..COLUMNS {
                assert!(!board.is_full());
                let identity = if (row + column) % 2 == 0 { ONE } else { TWO };
                board.drop_disc(column, identity).unwrap();
            }
        }
        assert!(board.is_full());
        assert!(board.is_settled());
    }

    #[test]
    fn decode_rejects_garbage_and_gaps() {
        assert!(matches!(Board::decode(b"not json"), Err(BoardError::Malformed(_))));

        let mut rows = vec![vec![serde_json::Value::Null; COLUMNS]; ROWS];
        rows[0][2] = serde_json::Value::String("player1".into());
        let floating = serde_json::to_vec(&rows).unwrap();
        assert!(matches!(Board::decode(&floating), Err(BoardError::Malformed(_))));
    }

    #[test]
    fn encoding_round_trips_a_played_board() {
        let board = play(&[(3, ONE), (3, TWO), (4, ONE)]);
        let decoded = Board::decode(&board.encode().unwrap()).unwrap();
        assert_eq!(decoded, board);
        assert_eq!(
            String::from_utf8(board.encode().unwrap()).unwrap().matches("null").count(),
            ROWS * COLUMNS - 3
        );
    }

    #[test]
    fn render_draws_symbols() {
        let board = play(&[(0, ONE), (1, TWO)]);
        let rendered = board.render();
        assert!(rendered.contains("| X O . . . . . |"));
        assert!(rendered.contains("  0 1 2 3 4 5 6"));
    }
}
