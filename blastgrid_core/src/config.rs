//! Game configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::GameError;
use crate::grid::BoardConfig;

/// Configuration for a BlastGrid client.
///
/// Every client in a room must agree on `board` and `blast_radius`; the
/// remaining fields only affect the local producers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Board dimensions (default: 30x23)
    pub board: BoardConfig,

    /// Flame reach along each axis, in cells (default: 6)
    pub blast_radius: i32,

    /// Delay between placing a bomb and its explosion
    pub fuse_ms: u64,

    /// Delay between an explosion and its flames clearing
    pub flame_ms: u64,

    /// How often the map authority publishes a fresh layout
    pub layout_period_ms: u64,

    /// Push animator tick period
    pub push_tick_ms: u64,

    /// Maximum cells a pushed bomb travels
    pub push_max_ticks: u32,

    /// Spawn roaming `random-` bombs periodically
    pub random_bombs: bool,

    /// Roaming bomb period
    pub random_bomb_period_ms: u64,

    /// Indestructible cells per layout (default: cells / 5)
    pub indestructible_obstacles: Option<usize>,

    /// Destructible cells per layout (default: cells / 4)
    pub destructible_obstacles: Option<usize>,

    /// Outbound intent queue; publishes beyond this are dropped
    pub outbound_capacity: usize,

    /// Inbound delivered-event queue
    pub inbound_capacity: usize,

    /// Length of the random bomb-name suffix
    pub bomb_suffix_len: usize,

    /// Spacing between replayed events in watch mode
    pub replay_cadence_ms: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            board: BoardConfig::default(),
            blast_radius: 6,
            fuse_ms: 2_000,
            flame_ms: 2_000,
            layout_period_ms: 60_000,
            push_tick_ms: 500,
            push_max_ticks: 8,
            random_bombs: false,
            random_bomb_period_ms: 2_000,
            indestructible_obstacles: None,
            destructible_obstacles: None,
            outbound_capacity: 50,
            inbound_capacity: 256,
            bomb_suffix_len: 5,
            replay_cadence_ms: 200,
        }
    }
}

impl GameConfig {
    /// Loads overrides from a JSON file; missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, GameError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| GameError::Config(format!("{}: {}", path.display(), e)))?;
        let config: GameConfig = serde_json::from_str(&text)
            .map_err(|e| GameError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), GameError> {
        if self.board.width <= 0 || self.board.height <= 0 {
            return Err(GameError::Config(format!(
                "board must be non-empty, got {}x{}",
                self.board.width, self.board.height
            )));
        }
        if self.blast_radius < 0 {
            return Err(GameError::Config("blast_radius must be >= 0".to_string()));
        }
        if self.outbound_capacity == 0 || self.inbound_capacity == 0 {
            return Err(GameError::Config("channel capacities must be > 0".to_string()));
        }
        if self.indestructible_count() + self.destructible_count() > self.board.cell_count() {
            return Err(GameError::Config("more obstacles than cells".to_string()));
        }
        Ok(())
    }

    pub fn indestructible_count(&self) -> usize {
        self.indestructible_obstacles
            .unwrap_or(self.board.cell_count() / 5)
    }

    pub fn destructible_count(&self) -> usize {
        self.destructible_obstacles
            .unwrap_or(self.board.cell_count() / 4)
    }

    pub fn fuse(&self) -> Duration {
        Duration::from_millis(self.fuse_ms)
    }

    pub fn flame(&self) -> Duration {
        Duration::from_millis(self.flame_ms)
    }

    pub fn layout_period(&self) -> Duration {
        Duration::from_millis(self.layout_period_ms)
    }

    pub fn push_tick(&self) -> Duration {
        Duration::from_millis(self.push_tick_ms)
    }

    pub fn random_bomb_period(&self) -> Duration {
        Duration::from_millis(self.random_bomb_period_ms)
    }

    pub fn replay_cadence(&self) -> Duration {
        Duration::from_millis(self.replay_cadence_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_config_default() {
        let config = GameConfig::default();
        assert_eq!(config.board, BoardConfig::new(30, 23));
        assert_eq!(config.blast_radius, 6);
        assert_eq!(config.indestructible_count(), 690 / 5);
        assert_eq!(config.destructible_count(), 690 / 4);
        assert_eq!(config.fuse(), Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: GameConfig =
            serde_json::from_str(r#"{"blast_radius": 3, "board": {"width": 10, "height": 8}}"#).unwrap();
        assert_eq!(config.blast_radius, 3);
        assert_eq!(config.fuse_ms, 2_000);
        assert_eq!(config.indestructible_count(), 16);
    }

    #[test]
    fn test_validate_rejects_bad_board() {
        let config = GameConfig {
            board: BoardConfig::new(0, 10),
            ..GameConfig::default()
        };
        assert!(matches!(config.validate(), Err(GameError::Config(_))));
    }

    #[test]
    fn test_from_json_file_missing() {
        let result = GameConfig::from_json_file("/definitely/not/here.json");
        assert!(matches!(result, Err(GameError::Config(_))));
    }
}
