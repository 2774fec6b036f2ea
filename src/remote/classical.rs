// src/remote/classical.rs

//! The classical (non-generational) Bloom filter over a `BackingStore`:
//! a single key holding `m` byte cells, written with saturating
//! `BITFIELD INCRBY` and read with a bias threshold instead of a plain
//! bit test, so that repeated inserts of the same item and a bulk
//! `Subtract` both behave sensibly on a byte-counting store.

use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::backend::{check_cancelled, BackingStore, BitFieldOp, Overflow};
use crate::error::{FilterError, Result};
use crate::hash;
use crate::metrics::OPERATIONS_TOTAL;

const SATURATED: i64 = 255;

/// Chunk size for `Subtract`'s bulk decrement, matching the reference
/// implementation's batching of the `BITFIELD` command.
const SUBTRACT_CHUNK: u64 = 256;

/// A classical Bloom filter whose `m` byte cells live under a single
/// `BackingStore` key, addressed the same way a `RemoteGcbf` page is.
pub struct RemoteClassicalFilter<S: BackingStore> {
    key: String,
    m: u64,
    k: usize,
    store: S,
}

impl<S: BackingStore> RemoteClassicalFilter<S> {
    /// Opens a classical filter named `name` with `m` cells and `k` hash
    /// positions. Unlike `RemoteGcbf::open`, there is no persisted
    /// properties key: the caller is responsible for using consistent
    /// `m`/`k` across processes sharing a key.
    pub fn new(store: S, name: &str, m: u64, k: usize) -> Self {
        RemoteClassicalFilter {
            key: name.to_string(),
            m,
            k,
            store,
        }
    }

    pub fn m(&self) -> u64 {
        self.m
    }

    pub fn k(&self) -> usize {
        self.k
    }

    fn positions(&self, d: &[u8]) -> Vec<u64> {
        hash::indexes(self.k, self.m, d)
    }

    /// Inserts `d` by saturating-incrementing each of its `k` cells to
    /// 255.
    #[instrument(skip(self, d, cancel), fields(name = %self.key))]
    pub async fn put(&self, d: &[u8], cancel: &CancellationToken) -> Result<()> {
        check_cancelled(cancel)?;
        let ops: Vec<BitFieldOp> = self
            .positions(d)
            .into_iter()
            .map(|x| BitFieldOp::IncrBy {
                offset: x * 8,
                delta: SATURATED,
                overflow: Overflow::Sat,
            })
            .collect();
        self.store.bitfield(&self.key, &ops, cancel).await?;
        OPERATIONS_TOTAL.with_label_values(&["classical_put", "ok"]).inc();
        Ok(())
    }

    /// Returns whether `d` is (probably) present: every one of its `k`
    /// cells must read strictly greater than `bias`. An item whose hash
    /// positions are empty (`k == 0`) is vacuously absent.
    #[instrument(skip(self, d, cancel), fields(name = %self.key))]
    pub async fn check(&self, d: &[u8], bias: u8, cancel: &CancellationToken) -> Result<bool> {
        check_cancelled(cancel)?;
        let positions = self.positions(d);
        if positions.is_empty() {
            return Ok(false);
        }
        let ops: Vec<BitFieldOp> = positions.iter().map(|&x| BitFieldOp::Get { offset: x * 8 }).collect();
        let values = self.store.bitfield(&self.key, &ops, cancel).await?;
        if values.len() != ops.len() {
            return Err(FilterError::MalformedResponse {
                operation: "check",
                detail: format!("expected {} BITFIELD results, got {}", ops.len(), values.len()),
            });
        }
        let present = values.iter().all(|&v| v > bias as i64);
        OPERATIONS_TOTAL
            .with_label_values(&["classical_check", if present { "hit" } else { "miss" }])
            .inc();
        Ok(present)
    }

    /// Subtracts `delta` from every one of the `m` cells, saturating at
    /// zero, in chunks of 256 cells so a single call never assembles an
    /// unbounded `BITFIELD` command. Checks `cancel` between chunks.
    #[instrument(skip(self, cancel), fields(name = %self.key, m = self.m))]
    pub async fn subtract(&self, delta: u8, cancel: &CancellationToken) -> Result<()> {
        let delta = -(delta as i64);
        let mut start = 0u64;
        while start < self.m {
            check_cancelled(cancel)?;
            let end = (start + SUBTRACT_CHUNK).min(self.m);
            let ops: Vec<BitFieldOp> = (start..end)
                .map(|x| BitFieldOp::IncrBy {
                    offset: x * 8,
                    delta,
                    overflow: Overflow::Sat,
                })
                .collect();
            self.store.bitfield(&self.key, &ops, cancel).await?;
            start = end;
        }
        Ok(())
    }
}
