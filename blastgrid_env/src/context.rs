//! Core runtime context trait for BlastGrid clients.

use async_trait::async_trait;
use rand::RngCore;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// The central interface for runtime interaction.
///
/// This trait abstracts the clock, the task scheduler and the entropy source
/// so that the same client code runs in production (`TokioContext`) and in
/// seeded multi-client simulations (`SimContext`).
///
/// # Determinism
///
/// Bomb-name suffixes, spawn positions and obstacle layouts are all drawn
/// through [`GameContext::with_rng`]. A seeded implementation therefore makes
/// a whole room reproducible from one number.
#[async_trait]
pub trait GameContext: Send + Sync + 'static {
    /// Returns the monotonic time since context creation.
    fn now(&self) -> Duration;

    /// Suspends execution for the given duration.
    ///
    /// Fuse, decay and push timers block only here.
    async fn sleep(&self, duration: Duration);

    /// Spawns a named background task.
    ///
    /// The returned handle lets the owner abort long-running loops
    /// (transport pump, authority loop) on shutdown.
    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static;

    /// Runs `f` with exclusive access to the context's random source.
    fn with_rng<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&mut dyn RngCore) -> T;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;
}
