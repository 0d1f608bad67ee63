//! Scenario runner - plays multi-client rooms and checks their invariants.
//!
//! Every scenario runs on a single-threaded Tokio runtime with a paused
//! clock: sleeps complete as soon as all tasks are idle, so a minute of game
//! time costs milliseconds and the run is reproducible from its seed.

use blastgrid_core::{BoardConfig, GameConfig};
use blastgrid_env::{GameContext, StartPosition};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::SimError;
use crate::exporter::{SimExport, SimFrame};
use crate::room::{describe_difference, SimRoom};
use crate::scenarios::ScenarioId;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Clients still connected at the end
    pub final_player_count: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,

    /// Recorded frames, when export was requested
    pub export: Option<SimExport>,
}

impl ScenarioResult {
    fn failed(scenario: ScenarioId, seed: u64, reason: String) -> Self {
        Self {
            scenario,
            seed,
            passed: false,
            total_ticks: 0,
            final_time_secs: 0.0,
            final_player_count: 0,
            failure_reason: Some(reason),
            metrics: ScenarioMetrics::default(),
            export: None,
        }
    }
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default)]
pub struct ScenarioMetrics {
    /// Messages on the event topic
    pub events_published: usize,

    /// Messages on the map topic
    pub layouts_published: usize,

    /// Intents accepted by clients
    pub intents_sent: u64,

    /// Duplicates injected by the broker
    pub redelivered: u64,

    /// Events clients failed to hand to the broker
    pub dropped_events: u64,

    /// Sum of the score table
    pub kills: u64,

    /// Times the authority moved to another client
    pub authority_changes: u64,
}

/// Runs scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Number of bots
    num_bots: usize,

    /// Tick length in milliseconds
    tick_ms: u64,

    /// Playing time in seconds, before the settle phase
    max_duration_secs: f64,

    /// Record a frame every this many ticks (0 = no export)
    export_every: u64,

    config: GameConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, num_bots: usize) -> Self {
        Self {
            seed,
            num_bots,
            tick_ms: 100,
            max_duration_secs: 20.0,
            export_every: 0,
            config: GameConfig {
                board: BoardConfig::new(15, 11),
                layout_period_ms: 1_500,
                replay_cadence_ms: 5,
                ..GameConfig::default()
            },
        }
    }

    /// Sets the tick length.
    pub fn with_tick_ms(mut self, tick_ms: u64) -> Self {
        self.tick_ms = tick_ms.max(1);
        self
    }

    /// Sets the playing time.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    /// Records a snapshot frame every `ticks` ticks.
    pub fn with_export(mut self, ticks: u64) -> Self {
        self.export_every = ticks;
        self
    }

    /// Replaces the game configuration.
    pub fn with_config(mut self, config: GameConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => return ScenarioResult::failed(scenario, self.seed, e.to_string()),
        };

        let outcome = runtime.block_on(async {
            match scenario {
                ScenarioId::Skirmish => self.run_skirmish().await,
                ScenarioId::Redelivery => self.run_redelivery().await,
                ScenarioId::Failover => self.run_failover().await,
                ScenarioId::Replay => self.run_replay().await,
            }
        });

        outcome.unwrap_or_else(|e| {
            warn!(scenario = scenario.name(), error = %e, "Scenario aborted");
            ScenarioResult::failed(scenario, self.seed, e.to_string())
        })
    }

    fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    fn play_ticks(&self) -> u64 {
        ((self.max_duration_secs * 1000.0) / self.tick_ms as f64).max(1.0) as u64
    }

    /// Long enough for every armed fuse and flame to run out.
    fn settle_time(&self) -> Duration {
        self.config.fuse() + self.config.flame() + self.config.push_tick() * self.config.push_max_ticks
    }

    fn room_name(&self, scenario: ScenarioId) -> String {
        format!("{}-{}", scenario.name(), self.seed)
    }

    async fn open(&self, scenario: ScenarioId, config: GameConfig) -> Result<Recorder, SimError> {
        let room = SimRoom::open(self.seed, &self.room_name(scenario), config, self.tick()).await?;
        let export = (self.export_every > 0).then(|| {
            SimExport::new(
                scenario.name(),
                self.seed,
                room.config().board.width,
                room.config().board.height,
            )
        });
        Ok(Recorder {
            room,
            export,
            every: self.export_every,
            ticks: 0,
            last_authority: None,
            authority_changes: 0,
            notes: Vec::new(),
        })
    }

    /// Bots play with roaming bombs on.
    async fn run_skirmish(&self) -> Result<ScenarioResult, SimError> {
        let config = GameConfig {
            random_bombs: true,
            ..self.config.clone()
        };
        let mut rec = self.open(ScenarioId::Skirmish, config).await?;
        rec.room.join_bots(self.num_bots).await?;

        rec.play(self.play_ticks()).await;
        rec.room.settle(self.settle_time()).await;

        let mut failures = Vec::new();
        if let Some(diff) = rec.room.converge(20).await {
            failures.push(format!("replicas diverged: {}", diff));
        }
        let authorities = rec.room.authorities();
        if authorities.len() != 1 {
            failures.push(format!("expected one authority, found {:?}", authorities));
        }
        Ok(rec.finish(ScenarioId::Skirmish, self.seed, failures))
    }

    /// Duplicate delivery plus a one-second broker outage mid-game.
    async fn run_redelivery(&self) -> Result<ScenarioResult, SimError> {
        let mut rec = self.open(ScenarioId::Redelivery, self.config.clone()).await?;
        rec.room.controller().set_redelivery(0.3);
        rec.room.join_bots(self.num_bots).await?;

        let third = (self.play_ticks() / 3).max(1);
        let outage_ticks = (1_000 / self.tick_ms).max(1);

        rec.play(third).await;
        rec.room.controller().set_outage(true);
        rec.note("broker outage");
        rec.play(outage_ticks).await;
        rec.room.controller().set_outage(false);
        rec.note("broker back");
        rec.play(self.play_ticks().saturating_sub(third).max(1)).await;
        rec.room.settle(self.settle_time()).await;

        let mut failures = Vec::new();
        if let Some(diff) = rec.room.converge(20).await {
            failures.push(format!("replicas diverged: {}", diff));
        }
        if rec.room.controller().redelivered() == 0 {
            failures.push("no duplicates were injected".to_string());
        }
        let authorities = rec.room.authorities();
        if authorities.len() != 1 {
            failures.push(format!("expected one authority after outage, found {:?}", authorities));
        }
        Ok(rec.finish(ScenarioId::Redelivery, self.seed, failures))
    }

    /// The authority leaves halfway; a survivor must take over.
    async fn run_failover(&self) -> Result<ScenarioResult, SimError> {
        let mut rec = self.open(ScenarioId::Failover, self.config.clone()).await?;
        rec.room.join_bots(self.num_bots.max(2)).await?;

        let half = (self.play_ticks() / 2).max(1);
        rec.play(half).await;

        let mut failures = Vec::new();
        let before = rec.room.authorities();
        let Some(leader) = before.first().cloned() else {
            failures.push("no authority elected".to_string());
            return Ok(rec.finish(ScenarioId::Failover, self.seed, failures));
        };
        let index = rec
            .room
            .clients()
            .iter()
            .position(|c| c.state().local_player_name() == Some(leader.as_str()));
        if let Some(index) = index {
            rec.room.leave(index);
            rec.note(&format!("authority {} left", leader));
        }
        let layouts_at_failover = rec.room.layouts_published();

        // At least two layout periods so a survivor's retry lands
        let period_ticks = self.config.layout_period_ms / self.tick_ms + 1;
        rec.play(half.max(period_ticks * 2)).await;
        rec.room.settle(self.settle_time()).await;

        let after = rec.room.authorities();
        if after.len() != 1 {
            failures.push(format!("expected one authority after failover, found {:?}", after));
        } else if after[0] == leader {
            failures.push(format!("departed client {} still reported as authority", leader));
        }
        if rec.room.layouts_published() <= layouts_at_failover {
            failures.push("no layout published after failover".to_string());
        }
        if let Some(diff) = rec.room.converge(20).await {
            failures.push(format!("survivors diverged: {}", diff));
        }
        Ok(rec.finish(ScenarioId::Failover, self.seed, failures))
    }

    /// Players finish a game, then a spectator replays it from the start.
    async fn run_replay(&self) -> Result<ScenarioResult, SimError> {
        let mut rec = self.open(ScenarioId::Replay, self.config.clone()).await?;
        rec.room.join_bots(self.num_bots).await?;

        rec.play(self.play_ticks()).await;
        rec.room.settle(self.settle_time()).await;

        let mut failures = Vec::new();
        if let Some(diff) = rec.room.converge(20).await {
            failures.push(format!("players diverged: {}", diff));
            return Ok(rec.finish(ScenarioId::Replay, self.seed, failures));
        }
        let Some(reference) = rec.room.snapshot() else {
            failures.push("no players".to_string());
            return Ok(rec.finish(ScenarioId::Replay, self.seed, failures));
        };
        let total_events = rec.room.events_published();
        rec.room.leave_all();

        let mut watcher = rec.room.watch(StartPosition::Earliest).await?;
        let cadence = rec.room.config().replay_cadence();
        let deadline = rec.room.ctx().now() + cadence * (total_events as u32 + 10) * 2;
        let mut replayed = 0usize;
        while replayed < total_events && rec.room.ctx().now() < deadline {
            while watcher.frame() {
                replayed += 1;
            }
            rec.room.ctx().sleep(cadence).await;
        }
        rec.note(&format!("replayed {} of {} events", replayed, total_events));

        if replayed < total_events {
            failures.push(format!("watcher replayed {} of {} events", replayed, total_events));
        }
        if let Some(diff) = describe_difference(&reference, &watcher.state().snapshot()) {
            failures.push(format!("watcher diverged: {}", diff));
        }
        if watcher.handle_intent(blastgrid_core::Intent::PlaceBomb) {
            failures.push("watcher was able to publish".to_string());
        }
        if rec.room.events_published() != total_events {
            failures.push("event log grew during replay".to_string());
        }
        Ok(rec.finish(ScenarioId::Replay, self.seed, failures))
    }
}

/// A room plus the bookkeeping a scenario reports on.
struct Recorder {
    room: SimRoom,
    export: Option<SimExport>,
    every: u64,
    ticks: u64,
    last_authority: Option<String>,
    authority_changes: u64,
    notes: Vec<String>,
}

impl Recorder {
    async fn play(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.room.tick(true).await;
            self.ticks += 1;
            self.track_authority();
            if self.every > 0 && self.ticks % self.every == 0 {
                self.record();
            }
        }
    }

    fn track_authority(&mut self) {
        let current = self.room.authorities().into_iter().next();
        if current.is_some() && current != self.last_authority {
            if self.last_authority.is_some() {
                self.authority_changes += 1;
            }
            self.notes.push(format!("authority: {}", current.as_deref().unwrap_or("-")));
            self.last_authority = current;
        }
    }

    fn note(&mut self, message: &str) {
        info!("{}", message);
        self.notes.push(message.to_string());
    }

    fn record(&mut self) {
        let Some(export) = self.export.as_mut() else {
            return;
        };
        let Some(state) = self.room.snapshot() else {
            return;
        };
        export.add_frame(SimFrame {
            time_sec: self.room.ctx().elapsed_secs(),
            state,
            scores: self.room.scores(),
            events: std::mem::take(&mut self.notes),
        });
    }

    fn finish(mut self, scenario: ScenarioId, seed: u64, failures: Vec<String>) -> ScenarioResult {
        let passed = failures.is_empty();
        let failure_reason = (!passed).then(|| failures.join("; "));
        if let Some(reason) = &failure_reason {
            warn!(scenario = scenario.name(), seed, reason = %reason, "Scenario failed");
        }

        self.record();
        if let Some(export) = self.export.as_mut() {
            export.finalize(passed, failure_reason.clone());
        }

        let room = &self.room;
        ScenarioResult {
            scenario,
            seed,
            passed,
            total_ticks: self.ticks,
            final_time_secs: room.ctx().elapsed_secs(),
            final_player_count: room.clients().len(),
            failure_reason,
            metrics: ScenarioMetrics {
                events_published: room.events_published(),
                layouts_published: room.layouts_published(),
                intents_sent: room.intents_sent(),
                redelivered: room.controller().redelivered(),
                dropped_events: room.dropped_events(),
                kills: room.scores().iter().map(|(_, k)| k).sum(),
                authority_changes: self.authority_changes,
            },
            export: self.export.take(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skirmish_scenario() {
        let runner = ScenarioRunner::new(42, 4).with_duration(8.0);
        let result = runner.run(ScenarioId::Skirmish);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.intents_sent > 0);
        assert!(result.metrics.events_published > 4);
        assert_eq!(result.final_player_count, 4);
    }

    #[test]
    fn test_redelivery_scenario() {
        let runner = ScenarioRunner::new(7, 3).with_duration(6.0);
        let result = runner.run(ScenarioId::Redelivery);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.redelivered > 0);
    }

    #[test]
    fn test_failover_scenario() {
        let runner = ScenarioRunner::new(11, 3).with_duration(6.0);
        let result = runner.run(ScenarioId::Failover);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.final_player_count, 2);
        assert!(result.metrics.authority_changes >= 1);
    }

    #[test]
    fn test_replay_scenario() {
        let runner = ScenarioRunner::new(5, 3).with_duration(5.0);
        let result = runner.run(ScenarioId::Replay);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.final_player_count, 0);
    }

    #[test]
    fn test_export_records_frames() {
        let runner = ScenarioRunner::new(3, 2).with_duration(2.0).with_export(5);
        let result = runner.run(ScenarioId::Skirmish);

        let export = result.export.expect("export requested");
        // 20 play ticks at one frame per 5, plus the final frame
        assert_eq!(export.frames.len(), 5);
        assert_eq!(export.scenario, "skirmish");
        assert_eq!(export.passed, result.passed);
    }

    #[test]
    fn test_invalid_config_fails_cleanly() {
        let config = GameConfig {
            inbound_capacity: 0,
            ..GameConfig::default()
        };
        let result = ScenarioRunner::new(1, 2)
            .with_config(config)
            .run(ScenarioId::Skirmish);

        assert!(!result.passed);
        assert!(result.failure_reason.unwrap().contains("capacities"));
    }
}
