//! Timer-driven event producers.
//!
//! Each producer is an independent task that sleeps on the [`GameContext`]
//! clock and feeds events back through the [`EventPublisher`]. None of them
//! touches [`crate::engine::GameState`]: their output takes effect only once
//! the broker delivers it.
//!
//! - fuse: PlaceBomb → (fuse) → Explode
//! - decay: Explode → (flame) → UndoExplode
//! - push animator: MoveBomb every tick until blocked, exhausted or exploded
//! - roaming bombs: PlaceBomb(`random-*`) every period on a free cell

use blastgrid_env::GameContext;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::entity::{fresh_bomb_name, Bomb, CancelSignal, Guarded, ObstacleMap, ROAMING_BOMB_PREFIX};
use crate::event::GameEvent;
use crate::grid::{BoardConfig, Direction, Position};
use crate::transport::EventPublisher;

/// Publishes `Explode` for `bomb` after `delay`.
pub fn arm_fuse<Ctx: GameContext>(
    ctx: &Arc<Ctx>,
    publisher: EventPublisher,
    bomb: String,
    at: Position,
    delay: Duration,
) -> JoinHandle<()> {
    let task_ctx = Arc::clone(ctx);
    ctx.spawn("fuse", async move {
        task_ctx.sleep(delay).await;
        debug!(bomb = %bomb, "Fuse burnt out");
        publisher.publish(GameEvent::Explode { bomb, at });
    })
}

/// Publishes `UndoExplode` for `bomb` after `delay`.
pub fn arm_decay<Ctx: GameContext>(
    ctx: &Arc<Ctx>,
    publisher: EventPublisher,
    bomb: String,
    at: Position,
    delay: Duration,
) -> JoinHandle<()> {
    let task_ctx = Arc::clone(ctx);
    ctx.spawn("decay", async move {
        task_ctx.sleep(delay).await;
        publisher.publish(GameEvent::UndoExplode { bomb, at });
    })
}

/// Slides a kicked bomb one cell per tick.
///
/// The next cell is computed without clamping; the animation ends as soon
/// as it leaves the board or hits an obstacle, after `max_ticks` moves, or
/// when the bomb's cancel signal fires.
#[derive(Debug)]
pub struct PushAnimator {
    bomb: String,
    direction: Direction,
    next: Position,
    remaining: u32,
    board: BoardConfig,
    obstacles: Guarded<ObstacleMap>,
    cancel: Arc<CancelSignal>,
}

impl PushAnimator {
    pub fn new(
        bomb: &Bomb,
        direction: Direction,
        board: BoardConfig,
        obstacles: Guarded<ObstacleMap>,
        max_ticks: u32,
    ) -> Self {
        Self {
            bomb: bomb.name.clone(),
            direction,
            next: bomb.position.toward(direction),
            remaining: max_ticks,
            board,
            obstacles,
            cancel: Arc::clone(&bomb.cancel),
        }
    }

    /// Advances one tick. `None` means the animation is over.
    pub fn tick(&mut self) -> Option<GameEvent> {
        if self.remaining == 0 {
            return None;
        }
        if self.cancel.try_take() {
            debug!(bomb = %self.bomb, "Push stopped by explosion");
            self.remaining = 0;
            return None;
        }
        let blocked =
            !self.board.contains(self.next) || self.obstacles.read().contains_key(&self.next);
        if blocked {
            self.remaining = 0;
            return None;
        }

        let event = GameEvent::MoveBomb {
            bomb: self.bomb.clone(),
            to: self.next,
        };
        self.next = self.next.toward(self.direction);
        self.remaining -= 1;
        Some(event)
    }

    pub fn spawn<Ctx: GameContext>(
        mut self,
        ctx: &Arc<Ctx>,
        publisher: EventPublisher,
        period: Duration,
    ) -> JoinHandle<()> {
        let task_ctx = Arc::clone(ctx);
        ctx.spawn("push", async move {
            loop {
                task_ctx.sleep(period).await;
                match self.tick() {
                    Some(event) => {
                        publisher.publish(event);
                    }
                    None => break,
                }
            }
        })
    }
}

/// Picks a uniformly random cell that is neither an obstacle nor in `taken`.
pub fn random_free_cell<R: Rng + ?Sized>(
    rng: &mut R,
    board: &BoardConfig,
    obstacles: &ObstacleMap,
    taken: &[Position],
) -> Option<Position> {
    let free: Vec<Position> = board
        .cells()
        .filter(|p| !obstacles.contains_key(p) && !taken.contains(p))
        .collect();
    if free.is_empty() {
        return None;
    }
    Some(free[rng.gen_range(0..free.len())])
}

/// Settings for the roaming-bomb producer.
#[derive(Debug, Clone)]
pub struct RoamingBombs {
    pub board: BoardConfig,
    pub period: Duration,
    pub suffix_len: usize,
}

impl RoamingBombs {
    /// Places a `random-*` bomb every period while `enabled` is set.
    ///
    /// `occupied` carries the cells currently holding bombs or players.
    pub fn spawn<Ctx: GameContext>(
        self,
        ctx: &Arc<Ctx>,
        publisher: EventPublisher,
        obstacles: Guarded<ObstacleMap>,
        occupied: watch::Receiver<Vec<Position>>,
        enabled: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let task_ctx = Arc::clone(ctx);
        ctx.spawn("roaming-bombs", async move {
            loop {
                task_ctx.sleep(self.period).await;
                if !enabled.load(Ordering::Acquire) {
                    continue;
                }
                let taken = occupied.borrow().clone();
                let placed = task_ctx.with_rng(|rng| {
                    let cell = random_free_cell(&mut *rng, &self.board, &obstacles.read(), &taken)?;
                    Some((fresh_bomb_name(&mut *rng, ROAMING_BOMB_PREFIX, self.suffix_len), cell))
                });
                if let Some((bomb, at)) = placed {
                    publisher.publish(GameEvent::PlaceBomb { bomb, at });
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{is_roaming, ObstacleKind};
    use blastgrid_env::TokioContext;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn obstacles(cells: &[(i32, i32)]) -> Guarded<ObstacleMap> {
        Guarded::new(
            cells
                .iter()
                .map(|(x, y)| (Position::new(*x, *y), ObstacleKind::Destructible))
                .collect(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_fuse_fires_after_delay() {
        let ctx = TokioContext::shared();
        let (publisher, mut rx) = EventPublisher::channel(8);
        let at = Position::new(1, 1);

        arm_fuse(&ctx, publisher, "p1-aaaaa".to_string(), at, Duration::from_secs(2));

        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(
            rx.try_recv().ok(),
            Some(GameEvent::Explode {
                bomb: "p1-aaaaa".to_string(),
                at
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_decay_emits_undo() {
        let ctx = TokioContext::shared();
        let (publisher, mut rx) = EventPublisher::channel(8);
        let at = Position::new(4, 2);

        let handle = arm_decay(&ctx, publisher, "p1-aaaaa".to_string(), at, Duration::from_secs(2));
        handle.await.unwrap();

        assert_eq!(
            rx.try_recv().ok(),
            Some(GameEvent::UndoExplode {
                bomb: "p1-aaaaa".to_string(),
                at
            })
        );
    }

    #[test]
    fn test_push_stops_at_obstacle() {
        let bomb = Bomb::new("p1-aaaaa", Position::new(2, 2));
        let mut push = PushAnimator::new(
            &bomb,
            Direction::Right,
            BoardConfig::default(),
            obstacles(&[(5, 2)]),
            8,
        );

        let moves: Vec<Position> = std::iter::from_fn(|| push.tick())
            .map(|e| match e {
                GameEvent::MoveBomb { to, .. } => to,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(moves, vec![Position::new(3, 2), Position::new(4, 2)]);
        assert!(push.tick().is_none());
    }

    #[test]
    fn test_push_stops_at_board_edge_without_repeating() {
        let bomb = Bomb::new("p1-aaaaa", Position::new(1, 0));
        let mut push = PushAnimator::new(
            &bomb,
            Direction::Left,
            BoardConfig::default(),
            obstacles(&[]),
            8,
        );
        assert!(matches!(push.tick(), Some(GameEvent::MoveBomb { to, .. }) if to == Position::new(0, 0)));
        assert!(push.tick().is_none());
        assert!(push.tick().is_none());
    }

    #[test]
    fn test_push_limited_and_cancellable() {
        let bomb = Bomb::new("p1-aaaaa", Position::new(0, 10));
        let mut push = PushAnimator::new(
            &bomb,
            Direction::Right,
            BoardConfig::default(),
            obstacles(&[]),
            3,
        );
        assert_eq!(std::iter::from_fn(|| push.tick()).count(), 3);

        let mut push = PushAnimator::new(
            &bomb,
            Direction::Right,
            BoardConfig::default(),
            obstacles(&[]),
            8,
        );
        assert!(push.tick().is_some());
        bomb.cancel.signal();
        assert!(push.tick().is_none());
        assert!(push.tick().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_task_publishes_per_tick() {
        let ctx = TokioContext::shared();
        let (publisher, mut rx) = EventPublisher::channel(16);
        let bomb = Bomb::new("p1-aaaaa", Position::new(0, 0));
        let push = PushAnimator::new(
            &bomb,
            Direction::Down,
            BoardConfig::default(),
            obstacles(&[(0, 3)]),
            8,
        );

        push.spawn(&ctx, publisher, Duration::from_millis(500))
            .await
            .unwrap();

        let mut moved = Vec::new();
        while let Ok(GameEvent::MoveBomb { to, .. }) = rx.try_recv() {
            moved.push(to);
        }
        assert_eq!(moved, vec![Position::new(0, 1), Position::new(0, 2)]);
    }

    #[test]
    fn test_random_free_cell_avoids_taken() {
        let board = BoardConfig::new(2, 2);
        let mut map = HashMap::new();
        map.insert(Position::new(0, 0), ObstacleKind::Indestructible);
        map.insert(Position::new(1, 0), ObstacleKind::Destructible);
        let taken = [Position::new(0, 1)];

        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(1);
        for _ in 0..10 {
            assert_eq!(
                random_free_cell(&mut rng, &board, &map, &taken),
                Some(Position::new(1, 1))
            );
        }

        let taken = [Position::new(0, 1), Position::new(1, 1)];
        assert_eq!(random_free_cell(&mut rng, &board, &map, &taken), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_roaming_bombs_only_when_enabled() {
        let ctx = TokioContext::shared();
        let (publisher, mut rx) = EventPublisher::channel(16);
        let (_occupied_tx, occupied) = watch::channel(Vec::new());
        let enabled = Arc::new(AtomicBool::new(false));

        let producer = RoamingBombs {
            board: BoardConfig::new(4, 4),
            period: Duration::from_secs(2),
            suffix_len: 5,
        };
        let handle = producer.spawn(&ctx, publisher, obstacles(&[]), occupied, enabled.clone());

        tokio::time::sleep(Duration::from_millis(4100)).await;
        assert!(rx.try_recv().is_err());

        enabled.store(true, Ordering::Release);
        tokio::time::sleep(Duration::from_secs(2)).await;
        match rx.try_recv() {
            Ok(GameEvent::PlaceBomb { bomb, at }) => {
                assert!(is_roaming(&bomb));
                assert!(BoardConfig::new(4, 4).contains(at));
            }
            other => panic!("unexpected {:?}", other),
        }
        handle.abort();
    }
}
