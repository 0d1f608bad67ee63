//! Grid coordinates and board geometry.
//!
//! Everything in the game lives on a fixed `width x height` lattice of cells.
//! Cells are also addressable by a single integer `y * width + x`, which is
//! how obstacle layouts travel over the wire.

use serde::{Deserialize, Serialize};

/// An integer grid cell. Equality and hashing are by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Returns the cell displaced by `(dx, dy)`, without bounds checks.
    /// Saturates at the `i32` range.
    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x.saturating_add(dx), self.y.saturating_add(dy))
    }

    /// Returns the neighbouring cell in `direction`, without bounds checks.
    pub fn toward(self, direction: Direction) -> Self {
        let (dx, dy) = direction.delta();
        self.offset(dx, dy)
    }

    /// The cell itself plus its four axis neighbours.
    pub fn neighbourhood(self) -> [Position; 5] {
        [
            self,
            self.offset(1, 0),
            self.offset(-1, 0),
            self.offset(0, 1),
            self.offset(0, -1),
        ]
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// One of the four axis directions. Screen coordinates: `Up` is `y - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Left,
        Direction::Right,
        Direction::Up,
        Direction::Down,
    ];

    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "left" | "a" => Ok(Direction::Left),
            "right" | "d" => Ok(Direction::Right),
            "up" | "w" => Ok(Direction::Up),
            "down" | "s" => Ok(Direction::Down),
            _ => Err(format!("Unknown direction: {}", s)),
        }
    }
}

/// Fixed board dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardConfig {
    pub width: i32,
    pub height: i32,
}

impl Default for BoardConfig {
    fn default() -> Self {
        // 600x500 px play field in 20 px cells
        Self {
            width: 30,
            height: 23,
        }
    }
}

impl BoardConfig {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Total number of cells on the board.
    pub fn cell_count(&self) -> usize {
        (self.width.max(0) as usize) * (self.height.max(0) as usize)
    }

    /// `0 <= x < width && 0 <= y < height`
    pub fn contains(&self, pos: Position) -> bool {
        pos.x >= 0 && pos.y >= 0 && pos.x < self.width && pos.y < self.height
    }

    /// Moves one cell in `direction`, staying put at the board edge.
    pub fn step(&self, pos: Position, direction: Direction) -> Position {
        let next = pos.toward(direction);
        if self.contains(next) {
            next
        } else {
            pos
        }
    }

    /// Linear cell index `y * width + x`.
    pub fn encode(&self, pos: Position) -> i32 {
        pos.y * self.width + pos.x
    }

    /// Inverse of [`BoardConfig::encode`]. `None` if the index is off-board.
    pub fn decode(&self, code: i32) -> Option<Position> {
        if code < 0 || code as usize >= self.cell_count() {
            return None;
        }
        Some(Position::new(code % self.width, code / self.width))
    }

    /// Iterates every cell in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = Position> + '_ {
        (0..self.height).flat_map(move |y| (0..self.width).map(move |x| Position::new(x, y)))
    }
}
