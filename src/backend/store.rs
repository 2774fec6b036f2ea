// src/backend/store.rs

//! The contract a remote filter programs against: byte GET/SET/DEL,
//! BITFIELD-style batched cell operations, an optimistic single-key
//! transaction, and KEYS for bulk deletion by name.

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::{FilterError, Result};

/// Overflow behavior for `BitFieldOp::IncrBy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overflow {
    /// Wrap around on overflow (the default `BITFIELD` behavior).
    Wrap,
    /// Clamp to the type's range on overflow (`OVERFLOW SAT`).
    Sat,
}

/// One `u8`-cell sub-command of a `BITFIELD` batch. `offset` is a **bit**
/// offset; a `u8` cell occupies 8 consecutive bits starting there.
#[derive(Debug, Clone, Copy)]
pub enum BitFieldOp {
    Get { offset: u64 },
    Set { offset: u64, value: u8 },
    IncrBy { offset: u64, delta: i64, overflow: Overflow },
}

/// The result of an optimistic single-key transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// The transaction committed (with or without an actual write).
    Committed,
    /// The watched key changed between the read and the write; the
    /// caller should retry.
    Conflict,
}

/// Returns `Err(FilterError::Cancelled)` if `cancel` has fired. Every
/// `BackingStore` round-trip checks this before doing any I/O.
pub(crate) fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(FilterError::Cancelled);
    }
    Ok(())
}

/// The backing key/value store a remote filter is built on.
///
/// Implementations must be safe to share across concurrent callers: all
/// mutation happens through this interface, never through a lock held
/// across an `.await`. Every method is a cancellation point: it must
/// check `cancel` before starting its round-trip.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Reads the raw bytes stored at `key`, or `None` if absent.
    async fn get(&self, key: &str, cancel: &CancellationToken) -> Result<Option<Bytes>>;

    /// Writes `value` at `key`, replacing any prior value.
    async fn set(&self, key: &str, value: Bytes, cancel: &CancellationToken) -> Result<()>;

    /// Deletes every key in `keys`; deleting an absent key is not an error.
    async fn del(&self, keys: &[String], cancel: &CancellationToken) -> Result<()>;

    /// Lists every key matching `pattern` (a simple glob, as used by
    /// `Drop`-by-name).
    async fn keys(&self, pattern: &str, cancel: &CancellationToken) -> Result<Vec<String>>;

    /// Runs one `BITFIELD`-style batch of sub-commands against `key`,
    /// returning one integer result per sub-command, in order.
    async fn bitfield(
        &self,
        key: &str,
        ops: &[BitFieldOp],
        cancel: &CancellationToken,
    ) -> Result<Vec<i64>>;

    /// Runs several independent `BITFIELD` batches — one per key — as a
    /// single pipelined round-trip. Results are returned in request
    /// order; this is the primitive the paged remote filter uses to
    /// touch multiple pages in one network exchange.
    async fn bitfield_pipeline(
        &self,
        requests: &[(String, Vec<BitFieldOp>)],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<i64>>> {
        let mut out = Vec::with_capacity(requests.len());
        for (key, ops) in requests {
            out.push(self.bitfield(key, ops, cancel).await?);
        }
        Ok(out)
    }

    /// Runs an optimistic read-modify-write transaction against a single
    /// `key`: reads its current value, lets `f` decide the replacement
    /// (`None` means "leave unchanged"), and commits iff `key` was not
    /// modified concurrently between the read and the write.
    async fn watch_and_set(
        &self,
        key: &str,
        f: Box<dyn FnOnce(Option<Bytes>) -> Option<Bytes> + Send>,
        cancel: &CancellationToken,
    ) -> Result<TransactionOutcome>;
}

#[async_trait]
impl<T: BackingStore + ?Sized> BackingStore for std::sync::Arc<T> {
    async fn get(&self, key: &str, cancel: &CancellationToken) -> Result<Option<Bytes>> {
        (**self).get(key, cancel).await
    }

    async fn set(&self, key: &str, value: Bytes, cancel: &CancellationToken) -> Result<()> {
        (**self).set(key, value, cancel).await
    }

    async fn del(&self, keys: &[String], cancel: &CancellationToken) -> Result<()> {
        (**self).del(keys, cancel).await
    }

    async fn keys(&self, pattern: &str, cancel: &CancellationToken) -> Result<Vec<String>> {
        (**self).keys(pattern, cancel).await
    }

    async fn bitfield(
        &self,
        key: &str,
        ops: &[BitFieldOp],
        cancel: &CancellationToken,
    ) -> Result<Vec<i64>> {
        (**self).bitfield(key, ops, cancel).await
    }

    async fn bitfield_pipeline(
        &self,
        requests: &[(String, Vec<BitFieldOp>)],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<i64>>> {
        (**self).bitfield_pipeline(requests, cancel).await
    }

    async fn watch_and_set(
        &self,
        key: &str,
        f: Box<dyn FnOnce(Option<Bytes>) -> Option<Bytes> + Send>,
        cancel: &CancellationToken,
    ) -> Result<TransactionOutcome> {
        (**self).watch_and_set(key, f, cancel).await
    }
}
