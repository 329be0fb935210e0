use std::sync::Arc;

use rayon::{prelude::*, ThreadPool};

use crate::engine::engine::Engine;

/// Splits an output buffer into fixed size blocks and fills them on the engine's pool.
/// Every element is computed by exactly one call, so the result does not depend on
/// how blocks are scheduled.
#[derive(Clone)]
pub struct ParallelFill {
    pool: Arc<ThreadPool>,
    threshold: usize,
}

impl ParallelFill {
    pub fn new(engine: &dyn Engine) -> Self {
        Self {
            pool: engine.thread_pool(),
            threshold: engine.config().parallel_threshold,
        }
    }

    /// Calls `f(block_start, block)` for consecutive blocks of `block_len` elements.
    pub fn fill<F>(&self, out: &mut [f32], block_len: usize, f: F)
    where
        F: Fn(usize, &mut [f32]) + Send + Sync,
    {
        let block_len = block_len.max(1);

        if out.len() < self.threshold {
            out.chunks_mut(block_len)
                .enumerate()
                .for_each(|(idx, block)| f(idx * block_len, block));
        } else {
            self.pool.install(|| {
                out.par_chunks_mut(block_len)
                    .enumerate()
                    .for_each(|(idx, block)| f(idx * block_len, block));
            });
        }
    }
}
