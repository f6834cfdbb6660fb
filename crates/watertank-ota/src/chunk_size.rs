//! Adaptive chunk sizing
//!
//! A congestion-control style heuristic evaluated once per loop iteration:
//! grow by half on every success (up to the ceiling), raise the ceiling after
//! a long success streak, and halve the chunk once the failure streak gets
//! long. Invariant: `min <= chunk_size <= max_chunk_size` after every call.

use crate::config::TransferConfig;

/// `n * 1.5`, floored, without leaving integer arithmetic
fn grow(n: usize) -> usize {
    n.saturating_add(n / 2)
}

/// Chunk size state for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSizeController {
    chunk_size: usize,
    max_chunk_size: usize,
    min_chunk_size: usize,
    success_streak: u32,
    growth_streak: u32,
    shrink_after_failures: u32,
}

impl ChunkSizeController {
    /// Start from the configured initial size and ceiling
    pub fn new(config: &TransferConfig) -> Self {
        let min_chunk_size = config.min_chunk_size.max(1);
        let max_chunk_size = config.max_chunk_size.max(min_chunk_size);
        Self {
            chunk_size: config.initial_chunk_size.clamp(min_chunk_size, max_chunk_size),
            max_chunk_size,
            min_chunk_size,
            success_streak: 0,
            growth_streak: config.growth_streak,
            shrink_after_failures: config.shrink_after_failures,
        }
    }

    /// Size to request next
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Current ceiling
    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// Floor
    pub fn min_chunk_size(&self) -> usize {
        self.min_chunk_size
    }

    /// Successes since the last failure or ceiling growth
    pub fn success_streak(&self) -> u32 {
        self.success_streak
    }

    /// Adapt after one iteration. `consecutive_failures` is the failure streak
    /// after this iteration was recorded (zero after a success).
    pub fn adapt(&mut self, succeeded: bool, consecutive_failures: u32) {
        if succeeded {
            self.success_streak = self.success_streak.saturating_add(1);
            if self.success_streak > self.growth_streak {
                self.max_chunk_size = grow(self.max_chunk_size);
                self.success_streak = 0;
            }
            self.chunk_size = grow(self.chunk_size).min(self.max_chunk_size);
        } else {
            self.success_streak = 0;
        }

        if consecutive_failures > self.shrink_after_failures {
            self.chunk_size = (self.chunk_size / 2).max(self.min_chunk_size);
            self.max_chunk_size = self.chunk_size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> ChunkSizeController {
        ChunkSizeController::new(&TransferConfig::default())
    }

    #[test]
    fn test_success_grows_by_half() {
        let mut c = controller();
        assert_eq!(c.chunk_size(), 512);
        c.adapt(true, 0);
        assert_eq!(c.chunk_size(), 768);
        c.adapt(true, 0);
        assert_eq!(c.chunk_size(), 1152);
    }

    #[test]
    fn test_growth_is_capped_at_ceiling() {
        let mut c = controller();
        for _ in 0..8 {
            c.adapt(true, 0);
            assert!(c.chunk_size() <= c.max_chunk_size());
        }
        assert_eq!(c.chunk_size(), 8192);
        assert_eq!(c.max_chunk_size(), 8192);
    }

    #[test]
    fn test_ceiling_grows_once_after_eleven_successes() {
        let mut c = controller();
        for _ in 0..10 {
            c.adapt(true, 0);
        }
        assert_eq!(c.max_chunk_size(), 8192);
        assert_eq!(c.success_streak(), 10);

        c.adapt(true, 0);
        assert_eq!(c.max_chunk_size(), 12288);
        assert_eq!(c.success_streak(), 0);

        c.adapt(true, 0);
        assert_eq!(c.max_chunk_size(), 12288);
        assert_eq!(c.success_streak(), 1);
    }

    #[test]
    fn test_failure_resets_streak_without_shrinking() {
        let mut c = controller();
        c.adapt(true, 0);
        c.adapt(true, 0);
        let before = c.chunk_size();
        c.adapt(false, 1);
        assert_eq!(c.success_streak(), 0);
        assert_eq!(c.chunk_size(), before);
    }

    #[test]
    fn test_long_failure_streak_halves_and_clamps_ceiling() {
        let mut c = controller();
        c.adapt(true, 0);
        assert_eq!(c.chunk_size(), 768);

        for failures in 1..=10 {
            c.adapt(false, failures);
        }
        assert_eq!(c.chunk_size(), 768);

        c.adapt(false, 11);
        assert_eq!(c.chunk_size(), 384);
        assert_eq!(c.max_chunk_size(), 384);

        c.adapt(false, 12);
        assert_eq!(c.chunk_size(), 192);
        c.adapt(false, 13);
        assert_eq!(c.chunk_size(), 128);
        c.adapt(false, 14);
        assert_eq!(c.chunk_size(), 128);
        assert_eq!(c.max_chunk_size(), 128);
    }

    #[test]
    fn test_reduced_ceiling_holds_after_recovery() {
        let mut c = controller();
        for failures in 1..=11 {
            c.adapt(false, failures);
        }
        assert_eq!(c.chunk_size(), 256);
        assert_eq!(c.max_chunk_size(), 256);

        c.adapt(true, 0);
        assert_eq!(c.chunk_size(), 256);
    }

    #[test]
    fn test_initial_size_is_clamped_into_bounds() {
        let config = TransferConfig {
            initial_chunk_size: 10,
            ..TransferConfig::default()
        };
        assert_eq!(ChunkSizeController::new(&config).chunk_size(), 128);
    }
}
