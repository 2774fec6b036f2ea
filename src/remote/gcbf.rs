// src/remote/gcbf.rs

//! The paged, remote-backed generational counting Bloom filter: the same
//! cell/window algorithm as `local::LocalGcbf`, but with its cell array
//! sharded across a `BackingStore` and every mutation going through a
//! batched, transactional round-trip.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, instrument, warn};

use crate::backend::{check_cancelled, BackingStore, BitFieldOp, TransactionOutcome};
use crate::error::{FilterError, Result};
use crate::hash;
use crate::metrics::{BYTES_READ_TOTAL, BYTES_WRITTEN_TOTAL, OPERATIONS_TOTAL, ROUND_TRIP_LATENCY_SECONDS};
use crate::paging::{PagedView, Position, PAGE_SIZE_CELLS};
use crate::window::{m255p1add, GenerationWindow};

/// Retry budget for an optimistic `WATCH`/commit cycle before giving up
/// with `TransactionFailed`.
pub const DEFAULT_TRANSACTION_RETRIES: u32 = 5;

/// Persisted but unused by the current hasher, which seeds directly from
/// `0..k` with no per-filter offset. Reserved for a future reseeding
/// scheme; round-trips unchanged through `N_props`.
const SEED_BASE: u64 = 0;

struct KeyBase(String);

impl KeyBase {
    fn data(&self, page: u64) -> String {
        format!("{}_{page}", self.0)
    }

    fn props(&self) -> String {
        format!("{}_props", self.0)
    }

    fn gen(&self) -> String {
        format!("{}_gen", self.0)
    }

    fn prefix(&self) -> String {
        format!("{}_", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Props {
    m: u64,
    k: u64,
    max_life: u8,
    seed_base: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Gen {
    bottom: u8,
    top: u8,
}

/// A generational counting Bloom filter whose cell array lives in a
/// `BackingStore`, sharded into 512 MiB pages.
///
/// Every `Put`/`Check` does one read round-trip and (for `Put`, and for
/// `Check` when it finds stale cells) one write round-trip, each
/// pipelined across however many pages the hashed positions touch.
/// `AdvanceGeneration` and `Sweep` use `BackingStore::watch_and_set` with
/// up to `transaction_retries` attempts before failing.
pub struct RemoteGcbf<S: BackingStore> {
    key: KeyBase,
    m: u64,
    k: usize,
    max_life: u8,
    paged: PagedView,
    transaction_retries: u32,
    store: S,
}

impl<S: BackingStore> RemoteGcbf<S> {
    /// Opens (creating if absent) a remote filter named `name` with the
    /// default 512 MiB page size and a 5-attempt transaction budget.
    pub async fn open(
        store: S,
        name: &str,
        m: u64,
        k: usize,
        max_life: u8,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        Self::open_with(store, name, m, k, max_life, PAGE_SIZE_CELLS, DEFAULT_TRANSACTION_RETRIES, cancel).await
    }

    /// Opens a remote filter with an explicit page size and transaction
    /// retry budget, as configured by `RemoteConfig`.
    #[instrument(skip(store, cancel), fields(name))]
    pub async fn open_with(
        store: S,
        name: &str,
        m: u64,
        k: usize,
        max_life: u8,
        page_size: u64,
        transaction_retries: u32,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let key = KeyBase(name.to_string());
        let wanted = Props {
            m,
            k: k as u64,
            max_life,
            seed_base: SEED_BASE,
        };

        match store.get(&key.props(), cancel).await? {
            Some(bytes) => {
                let stored: Props = serde_json::from_slice(&bytes).map_err(|e| FilterError::MalformedResponse {
                    operation: "Open",
                    detail: format!("invalid properties JSON: {e}"),
                })?;
                if stored != wanted {
                    return Err(FilterError::ParameterMismatch {
                        stored: format!("{stored:?}"),
                        requested: format!("{wanted:?}"),
                    });
                }
            }
            None => {
                let encoded = serde_json::to_vec(&wanted).expect("Props serialization is infallible");
                store.set(&key.props(), Bytes::from(encoded), cancel).await?;
                let gen = Gen { bottom: 1, top: max_life };
                let encoded = serde_json::to_vec(&gen).expect("Gen serialization is infallible");
                store.set(&key.gen(), Bytes::from(encoded), cancel).await?;
            }
        }

        Ok(RemoteGcbf {
            key,
            m,
            k,
            max_life,
            paged: PagedView::with_page_size(m, page_size),
            transaction_retries,
            store,
        })
    }

    pub fn m(&self) -> u64 {
        self.m
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn max_life(&self) -> u8 {
        self.max_life
    }

    fn positions_for(&self, items: &[&[u8]]) -> Vec<Position> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for d in items {
            for x in hash::indexes(self.k, self.m, d) {
                if seen.insert(x) {
                    out.push(self.paged.position(x));
                }
            }
        }
        out.sort();
        out
    }

    async fn get_gen(&self, cancel: &CancellationToken) -> Result<Gen> {
        let bytes = self
            .store
            .get(&self.key.gen(), cancel)
            .await?
            .ok_or_else(|| FilterError::MalformedResponse {
                operation: "get_gen",
                detail: "generation key missing".to_string(),
            })?;
        serde_json::from_slice(&bytes).map_err(|e| FilterError::MalformedResponse {
            operation: "get_gen",
            detail: format!("invalid generation JSON: {e}"),
        })
    }

    fn window(&self, gen: Gen) -> GenerationWindow {
        GenerationWindow::from_parts(gen.bottom, gen.top, self.max_life)
    }

    /// Groups already-(page,index)-sorted positions into one `BITFIELD`
    /// GET batch per page and runs them as a single pipelined round-trip.
    async fn get_values(&self, positions: &[Position], cancel: &CancellationToken) -> Result<Vec<u8>> {
        if positions.is_empty() {
            return Ok(Vec::new());
        }
        let requests = group_by_page(positions, |p| BitFieldOp::Get { offset: p.index }, &self.key);
        let timer = ROUND_TRIP_LATENCY_SECONDS
            .with_label_values(&["gcbf", "read"])
            .start_timer();
        let replies = self.store.bitfield_pipeline(&requests, cancel).await?;
        timer.observe_duration();
        BYTES_READ_TOTAL
            .with_label_values(&["gcbf"])
            .inc_by(positions.len() as f64);
        Ok(replies.into_iter().flatten().map(|v| v as u8).collect())
    }

    async fn set_values(&self, positions: &[Position], value: u8, cancel: &CancellationToken) -> Result<()> {
        if positions.is_empty() {
            return Ok(());
        }
        let requests = group_by_page(positions, |p| BitFieldOp::Set { offset: p.index, value }, &self.key);
        let timer = ROUND_TRIP_LATENCY_SECONDS
            .with_label_values(&["gcbf", "write"])
            .start_timer();
        self.store.bitfield_pipeline(&requests, cancel).await?;
        timer.observe_duration();
        BYTES_WRITTEN_TOTAL
            .with_label_values(&["gcbf"])
            .inc_by(positions.len() as f64);
        Ok(())
    }

    async fn put_many(&self, items: &[&[u8]], life: u8, cancel: &CancellationToken) -> Result<()> {
        if life == 0 || life > self.max_life {
            return Err(FilterError::InvalidArgument(format!(
                "life must be in 1..={}, got {life}",
                self.max_life
            )));
        }
        if items.is_empty() {
            return Ok(());
        }
        check_cancelled(cancel)?;
        let gen = self.get_gen(cancel).await?;
        let window = self.window(gen);

        let positions = self.positions_for(items);
        let values = self.get_values(&positions, cancel).await?;

        let updates: Vec<Position> = positions
            .iter()
            .zip(values)
            .filter_map(|(p, v)| {
                let curr = window.curr_life(v);
                (curr == 0 || life > curr).then_some(*p)
            })
            .collect();

        if updates.is_empty() {
            return Ok(());
        }
        let new_value = window.value_for_life(life);
        self.set_values(&updates, new_value, cancel).await
    }

    /// Inserts `d` with the given remaining `life`.
    #[instrument(skip(self, d, cancel), fields(name = %self.key.0))]
    pub async fn put(&self, d: &[u8], life: u8, cancel: &CancellationToken) -> Result<()> {
        let result = self.put_many(&[d], life, cancel).await;
        OPERATIONS_TOTAL
            .with_label_values(&["put", if result.is_ok() { "ok" } else { "error" }])
            .inc();
        result
    }

    /// Inserts every item in `dd` with the same `life`, sharing one
    /// dedup-and-batch pass across all of them.
    #[instrument(skip(self, dd, cancel), fields(name = %self.key.0, count = dd.len()))]
    pub async fn put_all(&self, life: u8, dd: &[&[u8]], cancel: &CancellationToken) -> Result<()> {
        let result = self.put_many(dd, life, cancel).await;
        OPERATIONS_TOTAL
            .with_label_values(&["put_all", if result.is_ok() { "ok" } else { "error" }])
            .inc();
        result
    }

    /// Returns whether `d` is (probably) present, opportunistically
    /// clearing any stale non-zero cells it observes along the way.
    #[instrument(skip(self, d, cancel), fields(name = %self.key.0))]
    pub async fn check(&self, d: &[u8], cancel: &CancellationToken) -> Result<bool> {
        check_cancelled(cancel)?;
        let gen = self.get_gen(cancel).await?;
        let window = self.window(gen);

        let positions = self.positions_for(&[d]);
        let values = self.get_values(&positions, cancel).await?;

        let mut all_valid = true;
        let mut invalids = Vec::new();
        for (p, v) in positions.iter().zip(values) {
            if !window.is_valid(v) {
                all_valid = false;
                if v != 0 {
                    invalids.push(*p);
                }
            }
        }
        if all_valid {
            OPERATIONS_TOTAL.with_label_values(&["check", "hit"]).inc();
            return Ok(true);
        }
        OPERATIONS_TOTAL.with_label_values(&["check", "miss"]).inc();
        if !invalids.is_empty() {
            self.set_values(&invalids, 0, cancel).await.map_err(|e| {
                error!(error = %e, "lazy sweep during check failed; membership result was false");
                e
            })?;
        }
        Ok(false)
    }

    /// Checks every item in `dds`, batching reads across all of them into
    /// one pipelined round-trip per page while preserving per-input
    /// order in the result.
    #[instrument(skip(self, dds, cancel), fields(name = %self.key.0, count = dds.len()))]
    pub async fn check_all(&self, dds: &[&[u8]], cancel: &CancellationToken) -> Result<Vec<bool>> {
        if dds.is_empty() {
            return Ok(Vec::new());
        }
        check_cancelled(cancel)?;
        let gen = self.get_gen(cancel).await?;
        let window = self.window(gen);

        let per_item: Vec<Vec<Position>> = dds.iter().map(|&d| self.positions_for(&[d])).collect();

        let mut unique: BTreeSet<Position> = BTreeSet::new();
        for positions in &per_item {
            unique.extend(positions.iter().copied());
        }
        let unique_positions: Vec<Position> = unique.into_iter().collect();
        let values = self.get_values(&unique_positions, cancel).await?;
        let value_by_position: BTreeMap<Position, u8> = unique_positions.iter().copied().zip(values).collect();

        let mut invalids = Vec::new();
        let mut results = Vec::with_capacity(dds.len());
        for positions in &per_item {
            let mut all_valid = true;
            for p in positions {
                let v = value_by_position[p];
                if !window.is_valid(v) {
                    all_valid = false;
                    if v != 0 {
                        invalids.push(*p);
                    }
                }
            }
            results.push(all_valid);
        }

        let hits = results.iter().filter(|&&v| v).count();
        OPERATIONS_TOTAL
            .with_label_values(&["check_all", "hit"])
            .inc_by(hits as f64);
        OPERATIONS_TOTAL
            .with_label_values(&["check_all", "miss"])
            .inc_by((results.len() - hits) as f64);
        if !invalids.is_empty() {
            invalids.sort();
            invalids.dedup();
            self.set_values(&invalids, 0, cancel).await.map_err(|e| {
                error!(error = %e, "lazy sweep during check_all failed; membership results were computed but not cleared");
                e
            })?;
        }
        Ok(results)
    }

    /// Shifts the generation window by `n` generations. Touches only the
    /// small `_gen` key, via an optimistic transaction.
    #[instrument(skip(self, cancel), fields(name = %self.key.0))]
    pub async fn advance_generation(&self, n: u8, cancel: &CancellationToken) -> Result<()> {
        let gen_key = self.key.gen();
        for attempt in 0..self.transaction_retries {
            check_cancelled(cancel)?;
            let outcome = self
                .store
                .watch_and_set(
                    &gen_key,
                    Box::new(move |current| {
                        let bytes = current?;
                        let gen: Gen = serde_json::from_slice(&bytes).ok()?;
                        let next = Gen {
                            bottom: m255p1add(gen.bottom, n),
                            top: m255p1add(gen.top, n),
                        };
                        serde_json::to_vec(&next).ok().map(Bytes::from)
                    }),
                    cancel,
                )
                .await?;
            if outcome == TransactionOutcome::Committed {
                OPERATIONS_TOTAL.with_label_values(&["advance_generation", "ok"]).inc();
                return Ok(());
            }
            warn!(key = %gen_key, attempt, "advance_generation transaction conflict, retrying");
        }
        error!(key = %gen_key, retries = self.transaction_retries, "advance_generation exhausted retries");
        OPERATIONS_TOTAL.with_label_values(&["advance_generation", "error"]).inc();
        Err(FilterError::TransactionFailed {
            key: gen_key,
            retries: self.transaction_retries,
        })
    }

    /// Scans every page, zeroing stale non-zero cells. Resumable: each
    /// page is swept independently under its own transaction, so a
    /// failure partway through leaves earlier pages already cleaned.
    #[instrument(skip(self, cancel), fields(name = %self.key.0, pages = self.paged.page_count()))]
    pub async fn sweep(&self, cancel: &CancellationToken) -> Result<()> {
        let gen = self.get_gen(cancel).await?;
        let window = self.window(gen);

        for page in 0..self.paged.page_count() {
            let data_key = self.key.data(page);
            let mut committed = false;
            for attempt in 0..self.transaction_retries {
                check_cancelled(cancel)?;
                let outcome = self
                    .store
                    .watch_and_set(
                        &data_key,
                        Box::new(move |current| {
                            let mut bytes = current?.to_vec();
                            let mut modified = false;
                            for cell in bytes.iter_mut() {
                                if *cell != 0 && !window.is_valid(*cell) {
                                    *cell = 0;
                                    modified = true;
                                }
                            }
                            modified.then(|| Bytes::from(bytes))
                        }),
                        cancel,
                    )
                    .await?;
                if outcome == TransactionOutcome::Committed {
                    committed = true;
                    break;
                }
                warn!(key = %data_key, attempt, "sweep transaction conflict, retrying");
            }
            if !committed {
                error!(key = %data_key, retries = self.transaction_retries, "sweep exhausted retries");
                OPERATIONS_TOTAL.with_label_values(&["sweep", "error"]).inc();
                return Err(FilterError::TransactionFailed {
                    key: data_key,
                    retries: self.transaction_retries,
                });
            }
        }
        OPERATIONS_TOTAL.with_label_values(&["sweep", "ok"]).inc();
        Ok(())
    }

    /// Deletes every key belonging to this filter.
    #[instrument(skip(self, cancel), fields(name = %self.key.0))]
    pub async fn drop_filter(&self, cancel: &CancellationToken) -> Result<()> {
        let mut keys: Vec<String> = (0..self.paged.page_count()).map(|p| self.key.data(p)).collect();
        keys.push(self.key.gen());
        keys.push(self.key.props());
        self.store.del(&keys, cancel).await
    }
}

/// Deletes every key matching `name`'s prefix, without needing an open
/// filter handle (for cleaning up a filter whose parameters you don't
/// remember).
pub async fn drop_by_name<S: BackingStore>(store: &S, name: &str, cancel: &CancellationToken) -> Result<()> {
    let key = KeyBase(name.to_string());
    let keys = store.keys(&key.prefix(), cancel).await?;
    if keys.is_empty() {
        return Ok(());
    }
    store.del(&keys, cancel).await
}

fn group_by_page(
    positions: &[Position],
    mut make_op: impl FnMut(&Position) -> BitFieldOp,
    key: &KeyBase,
) -> Vec<(String, Vec<BitFieldOp>)> {
    let mut requests: Vec<(String, Vec<BitFieldOp>)> = Vec::new();
    let mut current_page = None;
    for p in positions {
        if current_page != Some(p.page) {
            requests.push((key.data(p.page), Vec::new()));
            current_page = Some(p.page);
        }
        requests.last_mut().expect("just pushed").1.push(make_op(p));
    }
    requests
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::MemoryStore;

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    async fn open(name: &str, m: u64, k: usize, max_life: u8) -> RemoteGcbf<MemoryStore> {
        RemoteGcbf::open(MemoryStore::new(), name, m, k, max_life, &token())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn open_creates_then_reopens_with_same_parameters() {
        let store = Arc::new(MemoryStore::new());
        RemoteGcbf::open(store.clone(), "f", 1000, 7, 10, &token()).await.unwrap();
        RemoteGcbf::open(store, "f", 1000, 7, 10, &token()).await.unwrap();
    }

    #[tokio::test]
    async fn open_rejects_parameter_mismatch() {
        let store = Arc::new(MemoryStore::new());
        RemoteGcbf::open(store.clone(), "shared", 1000, 7, 10, &token())
            .await
            .unwrap();
        let err = RemoteGcbf::open(store, "shared", 1000, 7, 20, &token())
            .await
            .unwrap_err();
        assert!(matches!(err, FilterError::ParameterMismatch { .. }));
    }

    #[tokio::test]
    async fn put_then_check_is_true() {
        let f = open("f1", 1000, 7, 64).await;
        f.put(b"hello", 10, &token()).await.unwrap();
        assert!(f.check(b"hello", &token()).await.unwrap());
    }

    #[tokio::test]
    async fn put_rejects_life_zero_or_too_large() {
        let f = open("f2", 1000, 7, 10).await;
        assert!(f.put(b"x", 0, &token()).await.is_err());
        assert!(f.put(b"x", 11, &token()).await.is_err());
        assert!(f.put(b"x", 10, &token()).await.is_ok());
    }

    #[tokio::test]
    async fn advance_generation_expires_entries() {
        let f = open("f3", 1000, 7, 64).await;
        f.put(b"1", 1, &token()).await.unwrap();
        f.put(b"2", 2, &token()).await.unwrap();
        assert!(f.check(b"1", &token()).await.unwrap());
        assert!(f.check(b"2", &token()).await.unwrap());

        f.advance_generation(1, &token()).await.unwrap();
        assert!(!f.check(b"1", &token()).await.unwrap());
        assert!(f.check(b"2", &token()).await.unwrap());
    }

    #[tokio::test]
    async fn put_all_inserts_every_item() {
        let f = open("f4", 2000, 7, 32).await;
        let items: Vec<&[u8]> = vec![b"a", b"b", b"c", b"d"];
        f.put_all(20, &items, &token()).await.unwrap();
        for item in &items {
            assert!(f.check(item, &token()).await.unwrap());
        }
    }

    #[tokio::test]
    async fn check_all_preserves_order() {
        let f = open("f5", 2000, 7, 32).await;
        f.put(b"present", 20, &token()).await.unwrap();
        let queries: Vec<&[u8]> = vec![b"present", b"absent-1", b"absent-2"];
        let results = f.check_all(&queries, &token()).await.unwrap();
        assert!(results[0]);
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn sweep_zeroes_expired_cells_then_is_idempotent() {
        let f = open("f6", 1000, 7, 4).await;
        f.put(b"a", 1, &token()).await.unwrap();
        f.advance_generation(2, &token()).await.unwrap();
        f.sweep(&token()).await.unwrap();
        f.sweep(&token()).await.unwrap();
        assert!(!f.check(b"a", &token()).await.unwrap());
    }

    #[tokio::test]
    async fn drop_filter_removes_all_keys() {
        let store = MemoryStore::new();
        let f = RemoteGcbf::open(store, "f7", 1000, 7, 10, &token()).await.unwrap();
        f.put(b"x", 5, &token()).await.unwrap();
        f.drop_filter(&token()).await.unwrap();
        assert_eq!(f.store.get("f7_props", &token()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn full_scale_page_arithmetic_matches_open() {
        let m = 8 * PAGE_SIZE_CELLS;
        let f = RemoteGcbf::open(MemoryStore::new(), "f8", m, 7, 10, &token())
            .await
            .unwrap();
        assert_eq!(f.paged.page_count(), 9);
    }
}
