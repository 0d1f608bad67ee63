//! Blast propagation.
//!
//! A blast covers its origin and walks outward along the four axes up to the
//! blast radius. Along each axis:
//! - an Indestructible cell stops the walk and is not covered
//! - a Destructible cell is covered (and destroyed on explosion) and the walk
//!   continues past it
//! - the board edge stops the walk

use std::collections::BTreeMap;

use crate::entity::{FlameMap, FlameSource, ObstacleKind, ObstacleMap};
use crate::grid::{BoardConfig, Direction, Position};

/// A bomb that has gone off and is still burning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplodingBomb {
    pub position: Position,
    pub owner: String,
}

/// Visits the blast shape around `origin`.
///
/// `visit` returns false to stop the current axis (the cell it was called on
/// counts as the stopping point). Returning false for the origin suppresses
/// the whole blast.
pub fn walk_blast(
    board: &BoardConfig,
    origin: Position,
    radius: i32,
    mut visit: impl FnMut(Position) -> bool,
) {
    if !board.contains(origin) || !visit(origin) {
        return;
    }
    for direction in Direction::ALL {
        let mut cell = origin;
        for _ in 0..radius {
            cell = cell.toward(direction);
            if !board.contains(cell) || !visit(cell) {
                break;
            }
        }
    }
}

/// Cells covered by flame for a blast at `origin` against `obstacles`.
pub fn flame_cells(
    board: &BoardConfig,
    origin: Position,
    radius: i32,
    obstacles: &ObstacleMap,
) -> Vec<Position> {
    let mut cells = Vec::new();
    walk_blast(board, origin, radius, |p| {
        if obstacles.get(&p) == Some(&ObstacleKind::Indestructible) {
            return false;
        }
        cells.push(p);
        true
    });
    cells
}

/// Removes every Destructible obstacle the blast reaches; returns them.
pub fn destroy_in_blast(
    board: &BoardConfig,
    origin: Position,
    radius: i32,
    obstacles: &mut ObstacleMap,
) -> Vec<Position> {
    let mut destroyed = Vec::new();
    walk_blast(board, origin, radius, |p| match obstacles.get(&p) {
        Some(ObstacleKind::Indestructible) => false,
        Some(ObstacleKind::Destructible) => {
            obstacles.remove(&p);
            destroyed.push(p);
            true
        }
        None => true,
    });
    destroyed
}

/// Recomputes the flame map as the union of all burning blasts.
///
/// Where blasts overlap, the bomb that sorts last by name owns the cell, so
/// every replica attributes shared cells identically.
pub fn compute_flame_map(
    board: &BoardConfig,
    radius: i32,
    exploding: &BTreeMap<String, ExplodingBomb>,
    obstacles: &ObstacleMap,
) -> FlameMap {
    let mut flames = FlameMap::new();
    for (name, bomb) in exploding {
        for cell in flame_cells(board, bomb.position, radius, obstacles) {
            flames.insert(
                cell,
                FlameSource {
                    bomb: name.clone(),
                    owner: bomb.owner.clone(),
                },
            );
        }
    }
    flames
}
