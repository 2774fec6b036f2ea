// src/remote/mod.rs

//! Remote, paged/transactional filters built over `backend::BackingStore`:
//! the generational counting Bloom filter and its classical collaborator.

pub mod classical;
pub mod gcbf;

pub use classical::RemoteClassicalFilter;
pub use gcbf::{drop_by_name, RemoteGcbf, DEFAULT_TRANSACTION_RETRIES};
