// src/backend/memory.rs

//! An in-process `BackingStore`: no network, a `DashMap` keyspace plus a
//! per-key version counter standing in for the server's MVCC/WATCH
//! bookkeeping. Used by tests, doctests, and single-process embedding.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use super::store::{check_cancelled, BackingStore, BitFieldOp, Overflow, TransactionOutcome};
use crate::error::Result;

#[derive(Debug, Clone, Default)]
struct Entry {
    value: Bytes,
    version: u64,
}

/// A `BackingStore` backed by an in-process concurrent map.
///
/// `watch_and_set` is implemented with a per-key version counter: every
/// `set` (direct or via a transaction) bumps the version, and a
/// transaction commits only if the version it read is still current when
/// it writes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    keyspace: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    fn byte_get(value: &Bytes, byte_index: usize) -> u8 {
        value.get(byte_index).copied().unwrap_or(0)
    }

    fn apply_ops(current: &Bytes, ops: &[BitFieldOp]) -> (Bytes, Vec<i64>) {
        let needed = ops
            .iter()
            .map(|op| match op {
                BitFieldOp::Get { offset } => offset / 8,
                BitFieldOp::Set { offset, .. } => offset / 8,
                BitFieldOp::IncrBy { offset, .. } => offset / 8,
            })
            .max()
            .map(|last_byte| last_byte as usize + 1)
            .unwrap_or(0);

        let mut bytes = current.to_vec();
        if bytes.len() < needed {
            bytes.resize(needed, 0);
        }

        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            match *op {
                BitFieldOp::Get { offset } => {
                    results.push(Self::byte_get(&Bytes::from(bytes.clone()), (offset / 8) as usize) as i64);
                }
                BitFieldOp::Set { offset, value } => {
                    let i = (offset / 8) as usize;
                    let prev = bytes[i];
                    bytes[i] = value;
                    results.push(prev as i64);
                }
                BitFieldOp::IncrBy { offset, delta, overflow } => {
                    let i = (offset / 8) as usize;
                    let prev = bytes[i] as i64;
                    let raw = prev + delta;
                    let next = match overflow {
                        Overflow::Sat => raw.clamp(0, 255),
                        Overflow::Wrap => raw.rem_euclid(256),
                    };
                    bytes[i] = next as u8;
                    results.push(next);
                }
            }
        }
        (Bytes::from(bytes), results)
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn get(&self, key: &str, cancel: &CancellationToken) -> Result<Option<Bytes>> {
        check_cancelled(cancel)?;
        Ok(self.keyspace.get(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: Bytes, cancel: &CancellationToken) -> Result<()> {
        check_cancelled(cancel)?;
        let mut entry = self.keyspace.entry(key.to_string()).or_default();
        entry.value = value;
        entry.version += 1;
        Ok(())
    }

    async fn del(&self, keys: &[String], cancel: &CancellationToken) -> Result<()> {
        check_cancelled(cancel)?;
        for key in keys {
            self.keyspace.remove(key);
        }
        Ok(())
    }

    async fn keys(&self, pattern: &str, cancel: &CancellationToken) -> Result<Vec<String>> {
        check_cancelled(cancel)?;
        // The only pattern this crate issues is a literal name prefix
        // (e.g. `"myfilter_"`), so a prefix match is sufficient here.
        let prefix = pattern.trim_end_matches('*');
        Ok(self
            .keyspace
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    async fn bitfield(&self, key: &str, ops: &[BitFieldOp], cancel: &CancellationToken) -> Result<Vec<i64>> {
        check_cancelled(cancel)?;
        let mut entry = self.keyspace.entry(key.to_string()).or_default();
        let (next, results) = Self::apply_ops(&entry.value, ops);
        entry.value = next;
        entry.version += 1;
        Ok(results)
    }

    async fn watch_and_set(
        &self,
        key: &str,
        f: Box<dyn FnOnce(Option<Bytes>) -> Option<Bytes> + Send>,
        cancel: &CancellationToken,
    ) -> Result<TransactionOutcome> {
        check_cancelled(cancel)?;
        let (seen_version, current) = match self.keyspace.get(key) {
            Some(e) => (e.version, Some(e.value.clone())),
            None => (0, None),
        };

        let Some(next) = f(current) else {
            return Ok(TransactionOutcome::Committed);
        };

        let mut entry = self.keyspace.entry(key.to_string()).or_default();
        if entry.version != seen_version {
            return Ok(TransactionOutcome::Conflict);
        }
        entry.value = next;
        entry.version += 1;
        Ok(TransactionOutcome::Committed)
    }
}
