// src/backend/mod.rs

//! The backing-store abstraction remote filters are built on, plus the
//! two implementations this crate ships: an in-process map for tests and
//! embedding, and a RESP client for talking to a real server.

mod memory;
mod resp;
mod store;

pub use memory::MemoryStore;
pub use resp::RespClient;
pub use store::{check_cancelled, BackingStore, BitFieldOp, Overflow, TransactionOutcome};
