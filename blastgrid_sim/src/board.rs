//! ASCII rendering of a replica for the terminal.
//!
//! Legend: `#` indestructible, `+` destructible, `*` flame, `o` bomb, a
//! player's avatar when alive and `x` when dead, `.` empty. When several
//! things share a cell, players win over bombs, bombs over flames.

use blastgrid_core::{BoardConfig, ObstacleKind, Snapshot};
use std::fmt::Write;

/// Renders `snapshot` as `height` lines of `width` characters.
pub fn render(board: &BoardConfig, snapshot: &Snapshot) -> String {
    let width = board.width.max(0) as usize;
    let height = board.height.max(0) as usize;
    let mut grid = vec![vec!['.'; width]; height];

    let mut put = |x: i32, y: i32, glyph: char| {
        if x >= 0 && y >= 0 && (x as usize) < width && (y as usize) < height {
            grid[y as usize][x as usize] = glyph;
        }
    };

    for (pos, kind) in &snapshot.obstacles {
        let glyph = match kind {
            ObstacleKind::Indestructible => '#',
            ObstacleKind::Destructible => '+',
        };
        put(pos.x, pos.y, glyph);
    }
    for (pos, _) in &snapshot.flames {
        put(pos.x, pos.y, '*');
    }
    for bomb in &snapshot.bombs {
        put(bomb.position.x, bomb.position.y, 'o');
    }
    for player in &snapshot.players {
        let glyph = if player.alive {
            player.avatar.chars().next().unwrap_or('@')
        } else {
            'x'
        };
        put(player.position.x, player.position.y, glyph);
    }

    let mut out = String::with_capacity((width + 1) * height);
    for row in grid {
        out.extend(row);
        out.push('\n');
    }
    out
}

/// Renders the score table, one `name kills` line per player.
pub fn render_scores(scores: &[(String, u64)]) -> String {
    let mut out = String::new();
    for (player, kills) in scores {
        let _ = writeln!(out, "{:<16} {:>4}", player, kills);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use blastgrid_core::engine::{BombView, PlayerView};
    use blastgrid_core::Position;
    use proptest::prelude::*;

    fn player(name: &str, x: i32, y: i32, alive: bool) -> PlayerView {
        PlayerView {
            name: name.to_string(),
            avatar: name[..1].to_uppercase(),
            position: Position::new(x, y),
            alive,
            killed_by: None,
        }
    }

    #[test]
    fn test_render_layers() {
        let board = BoardConfig::new(4, 2);
        let snapshot = Snapshot {
            players: vec![player("ann", 0, 0, true), player("bob", 3, 1, false)],
            bombs: vec![BombView {
                name: "ann-xyzab".to_string(),
                position: Position::new(1, 0),
            }],
            exploding: Vec::new(),
            obstacles: vec![
                (Position::new(2, 0), ObstacleKind::Indestructible),
                (Position::new(0, 1), ObstacleKind::Destructible),
            ],
            flames: vec![
                (Position::new(1, 0), "ann-xyzab".to_string()),
                (Position::new(1, 1), "ann-xyzab".to_string()),
            ],
        };

        assert_eq!(render(&board, &snapshot), "Ao#.\n+*.x\n");
    }

    #[test]
    fn test_render_scores() {
        let text = render_scores(&[("bob".to_string(), 3), ("ann".to_string(), 1)]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("bob"));
        assert!(lines[0].ends_with('3'));
    }

    proptest! {
        #[test]
        fn prop_render_shape(
            width in 1i32..40,
            height in 1i32..30,
            cells in proptest::collection::vec((-5i32..50, -5i32..50), 0..20),
        ) {
            let board = BoardConfig::new(width, height);
            let snapshot = Snapshot {
                obstacles: cells
                    .iter()
                    .map(|&(x, y)| (Position::new(x, y), ObstacleKind::Destructible))
                    .collect(),
                ..Snapshot::default()
            };

            let text = render(&board, &snapshot);
            let lines: Vec<&str> = text.lines().collect();
            prop_assert_eq!(lines.len(), height as usize);
            for line in lines {
                prop_assert_eq!(line.chars().count(), width as usize);
            }
        }
    }
}
