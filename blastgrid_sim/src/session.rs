//! Interactive-style sessions for the CLI.
//!
//! `play` joins the named player plus bots and renders that player's
//! replica; `watch` lets bots play for a while, then attaches a spectator
//! and renders what it replays. Keyboard input is not read: the named
//! player is driven by the same bot logic as everyone else.

use blastgrid_core::{GameClient, GameConfig, Snapshot};
use blastgrid_env::{GameContext, StartPosition};
use std::time::Duration;
use tracing::info;

use crate::board::{render, render_scores};
use crate::context::SimContext;
use crate::error::SimError;
use crate::room::SimRoom;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Play,
    /// Spectate from the given offset
    Watch(StartPosition),
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub room: String,
    pub player: String,
    pub mode: SessionMode,
    /// Bots besides the named player
    pub bots: usize,
    pub duration: Duration,
    pub tick: Duration,
    /// Render every this many ticks (0 = only at the end)
    pub render_every: u64,
    /// Sleep in wall-clock time instead of a paused clock
    pub realtime: bool,
}

/// What a finished session looked like.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub room: String,
    pub ticks: u64,
    pub final_time_secs: f64,
    pub scores: Vec<(String, u64)>,
    pub snapshot: Snapshot,
}

/// Runs a session to completion, handing each rendered frame to `on_frame`.
pub fn run_session(
    seed: u64,
    config: GameConfig,
    options: SessionOptions,
    on_frame: impl FnMut(&str),
) -> Result<SessionReport, SimError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(!options.realtime)
        .build()?;
    runtime.block_on(drive(seed, config, options, on_frame))
}

async fn drive(
    seed: u64,
    config: GameConfig,
    options: SessionOptions,
    mut on_frame: impl FnMut(&str),
) -> Result<SessionReport, SimError> {
    let mut room = SimRoom::open(seed, &options.room, config, options.tick).await?;
    let ticks = (options.duration.as_millis() / options.tick.as_millis().max(1)) as u64;

    let mut watcher = match options.mode {
        SessionMode::Play => {
            room.join(&options.player).await?;
            room.join_bots(options.bots).await?;
            info!(room = %options.room, player = %options.player, "Playing");
            None
        }
        SessionMode::Watch(start) => {
            room.join_bots(options.bots.max(1)).await?;
            // Give the log some history so earliest and latest differ
            for _ in 0..ticks / 2 {
                room.tick(true).await;
            }
            info!(room = %options.room, ?start, "Watching");
            Some(room.watch(start).await?)
        }
    };

    let board = room.config().board;
    let mut elapsed = 0;
    for _ in 0..ticks {
        room.tick(true).await;
        if let Some(watcher) = watcher.as_mut() {
            while watcher.frame() {}
        }
        elapsed += 1;
        if options.render_every > 0 && elapsed % options.render_every == 0 {
            let view = viewed(&room, watcher.as_ref());
            on_frame(&frame_text(&board, &view, room.ctx(), &room.scores()));
        }
    }

    let snapshot = viewed(&room, watcher.as_ref());
    let scores = room.scores();
    on_frame(&frame_text(&board, &snapshot, room.ctx(), &scores));

    Ok(SessionReport {
        room: options.room,
        ticks: elapsed,
        final_time_secs: room.ctx().elapsed_secs(),
        scores,
        snapshot,
    })
}

fn viewed(room: &SimRoom, watcher: Option<&GameClient<SimContext>>) -> Snapshot {
    match watcher {
        Some(watcher) => watcher.state().snapshot(),
        None => room.snapshot().unwrap_or_default(),
    }
}

fn frame_text(
    board: &blastgrid_core::BoardConfig,
    snapshot: &Snapshot,
    ctx: &SimContext,
    scores: &[(String, u64)],
) -> String {
    format!(
        "t={:.1}s\n{}{}",
        ctx.now().as_secs_f64(),
        render(board, snapshot),
        render_scores(scores)
    )
}
