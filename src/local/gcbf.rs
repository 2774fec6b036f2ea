// src/local/gcbf.rs

//! The local generational counting Bloom filter: single-threaded,
//! in-memory, no I/O.

use crate::error::{FilterError, Result};
use crate::hash;
use crate::window::GenerationWindow;

/// An in-memory generational counting Bloom filter.
///
/// Put-with-life, Check, AdvanceGeneration, and Sweep all run against a
/// plain `Vec<u8>` cell array; there is no internal locking, so a shared
/// `LocalGcbf` used from multiple threads is a data race the caller must
/// serialize externally.
#[derive(Debug, Clone)]
pub struct LocalGcbf {
    m: usize,
    k: usize,
    data: Vec<u8>,
    window: GenerationWindow,
}

impl LocalGcbf {
    /// Creates a filter with `m` cells and `k` hash positions per item,
    /// whose generation window starts at `(1, max_life)`.
    pub fn new(m: usize, k: usize, max_life: u8) -> Self {
        LocalGcbf {
            m,
            k,
            data: vec![0u8; m],
            window: GenerationWindow::new(max_life),
        }
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn max_life(&self) -> u8 {
        self.window.max_life()
    }

    /// The current `(bottom, top)` of the generation window.
    pub fn window(&self) -> (u8, u8) {
        (self.window.bottom(), self.window.top())
    }

    fn indexes(&self, d: &[u8]) -> Vec<usize> {
        hash::indexes(self.k, self.m as u64, d)
            .into_iter()
            .map(|x| x as usize)
            .collect()
    }

    /// Inserts `d` with the given remaining `life` (`1..=max_life`).
    ///
    /// A cell is only ever refreshed **upward**: it is overwritten iff it
    /// is currently empty or its remaining life is shorter than `life`.
    pub fn put(&mut self, d: &[u8], life: u8) -> Result<()> {
        if life == 0 || life > self.window.max_life() {
            return Err(FilterError::InvalidArgument(format!(
                "life must be in 1..={}, got {life}",
                self.window.max_life()
            )));
        }
        let new_value = self.window.value_for_life(life);
        for x in self.indexes(d) {
            let curr = self.window.curr_life(self.data[x]);
            if curr == 0 || life > curr {
                self.data[x] = new_value;
            }
        }
        Ok(())
    }

    /// Returns whether `d` is (probably) present. Any position found to
    /// hold a stale non-zero value is opportunistically zeroed (a lazy,
    /// per-call sweep).
    pub fn check(&mut self, d: &[u8]) -> bool {
        let mut all_valid = true;
        for x in self.indexes(d) {
            let v = self.data[x];
            if !self.window.is_valid(v) {
                all_valid = false;
                if v != 0 {
                    self.data[x] = 0;
                }
            }
        }
        all_valid
    }

    /// Shifts the generation window by `n`. O(1): no cell is touched.
    pub fn advance_generation(&mut self, n: u8) {
        self.window.advance(n);
    }

    /// Zeroes every cell whose stored value is non-zero and no longer
    /// valid. Idempotent.
    pub fn sweep(&mut self) {
        for v in self.data.iter_mut() {
            if !self.window.is_valid(*v) {
                *v = 0;
            }
        }
    }
}
