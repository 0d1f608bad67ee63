//! Multi-client scenarios.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioId {
    /// Bots play a full round; every replica must end identical
    Skirmish,

    /// Same as skirmish with duplicate delivery injected by the broker
    Redelivery,

    /// The map authority leaves mid-game; a survivor must take over
    Failover,

    /// A spectator replays the finished game and must reach the same state
    Replay,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Skirmish,
            ScenarioId::Redelivery,
            ScenarioId::Failover,
            ScenarioId::Replay,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Skirmish => "skirmish",
            ScenarioId::Redelivery => "redelivery",
            ScenarioId::Failover => "failover",
            ScenarioId::Replay => "replay",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Skirmish => "Bots move, bomb and revive with roaming bombs on; replicas converge",
            ScenarioId::Redelivery => "30% of publishes are delivered twice; replicas still converge",
            ScenarioId::Failover => "Authority client disconnects; exactly one survivor becomes authority",
            ScenarioId::Replay => "Watch client replays from earliest and matches the players' state",
        }
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "skirmish" => Ok(ScenarioId::Skirmish),
            "redelivery" | "duplicates" => Ok(ScenarioId::Redelivery),
            "failover" => Ok(ScenarioId::Failover),
            "replay" | "watch" => Ok(ScenarioId::Replay),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for id in ScenarioId::all() {
            assert_eq!(id.name().parse::<ScenarioId>(), Ok(id));
            assert!(!id.description().is_empty());
        }
        assert_eq!("WATCH".parse::<ScenarioId>(), Ok(ScenarioId::Replay));
        assert!("chaos".parse::<ScenarioId>().is_err());
    }
}
