//! Simulation context implementing GameContext for reproducible rooms.

use async_trait::async_trait;
use blastgrid_env::GameContext;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;

/// Simulation context backed by the Tokio clock and a seeded RNG.
///
/// This implements `GameContext` using:
/// - Tokio's clock, which the runner pauses so sleeps advance virtual time
/// - A seeded ChaCha8 RNG shared by every clone, so bomb names, spawn cells
///   and layouts all derive from one seed
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Virtual time zero
    start: Instant,

    /// Deterministic RNG shared by all clients of a room
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    ///
    /// Create it inside the runtime that will drive it, so `now()` is
    /// measured on that runtime's clock.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            start: Instant::now(),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Elapsed virtual time in seconds.
    pub fn elapsed_secs(&self) -> f64 {
        self.now().as_secs_f64()
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            start: self.start,
            rng: Arc::clone(&self.rng),
        }
    }
}

#[async_trait]
impl GameContext for SimContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let span = tracing::debug_span!("sim_task", name = %name, seed = self.seed);
        tokio::spawn(future.instrument(span))
    }

    fn with_rng<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&mut dyn RngCore) -> T,
    {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *rng)
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}
