//! Opportunistic pruning of expired refresh tokens.
//!
//! There is no dedicated scheduler: a small random fraction of refresh calls
//! kicks off an asynchronous sweep of expired rows. The pruner is injected so
//! tests can force or suppress pruning deterministically.

use rand::Rng;
use sqlx::PgPool;
use tracing::{error, info};

/// Decides whether a given refresh call should trigger a prune sweep.
pub trait TokenPruner: Send + Sync {
    fn should_prune(&self) -> bool;
}

/// Samples a fraction of calls (default 10%).
pub struct SampledPruner {
    probability: f64,
}

impl SampledPruner {
    #[must_use]
    pub fn new(probability: f64) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
        }
    }
}

impl TokenPruner for SampledPruner {
    fn should_prune(&self) -> bool {
        rand::thread_rng().r#gen::<f64>() < self.probability
    }
}

/// Never prunes; used in tests and when an external janitor owns cleanup.
pub struct NeverPruner;

impl TokenPruner for NeverPruner {
    fn should_prune(&self) -> bool {
        false
    }
}

/// Always prunes; used in tests.
pub struct AlwaysPruner;

impl TokenPruner for AlwaysPruner {
    fn should_prune(&self) -> bool {
        true
    }
}

/// Spawn a background sweep of expired refresh tokens.
///
/// Best-effort: failures are logged and never surface to the request that
/// triggered the sweep.
pub(super) fn spawn_prune(pool: PgPool) {
    tokio::spawn(async move {
        match super::storage::delete_expired_refresh_tokens(&pool).await {
            Ok(0) => {}
            Ok(pruned) => info!(pruned, "pruned expired refresh tokens"),
            Err(err) => error!("Failed to prune expired refresh tokens: {err}"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampled_pruner_edges() {
        let never = SampledPruner::new(0.0);
        let always = SampledPruner::new(1.0);
        for _ in 0..100 {
            assert!(!never.should_prune());
            assert!(always.should_prune());
        }
    }

    #[test]
    fn sampled_pruner_clamps_probability() {
        let pruner = SampledPruner::new(7.5);
        for _ in 0..100 {
            assert!(pruner.should_prune());
        }
    }

    #[test]
    fn fixed_pruners() {
        assert!(!NeverPruner.should_prune());
        assert!(AlwaysPruner.should_prune());
    }
}
