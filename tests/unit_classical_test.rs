// tests/unit_classical_test.rs

//! Black-box scenarios for the classical (non-generational) Bloom filter,
//! both the local in-process form and the remote byte-counting form.

use gcbf::backend::MemoryStore;
use gcbf::remote::RemoteClassicalFilter;
use gcbf::{ClassicalBloomFilter, MemoryBitStore};
use tokio_util::sync::CancellationToken;

#[test]
fn local_classical_put_then_check() {
    let mut bf = ClassicalBloomFilter::new(1000, 7, MemoryBitStore::new(1000));
    bf.put(b"hello").unwrap();
    assert!(bf.check(b"hello").unwrap());
    assert!(!bf.check(b"definitely-absent").unwrap());
}

#[tokio::test]
async fn remote_classical_put_then_check_with_bias() {
    let cancel = CancellationToken::new();
    let f = RemoteClassicalFilter::new(MemoryStore::new(), "classical1", 1000, 7);
    f.put(b"hello", &cancel).await.unwrap();
    assert!(f.check(b"hello", 0, &cancel).await.unwrap());
    assert!(!f.check(b"absent", 0, &cancel).await.unwrap());
}

#[tokio::test]
async fn remote_classical_subtract_expires_entries() {
    let cancel = CancellationToken::new();
    let f = RemoteClassicalFilter::new(MemoryStore::new(), "classical2", 1000, 7);
    f.put(b"hello", &cancel).await.unwrap();
    for _ in 0..3 {
        f.subtract(100, &cancel).await.unwrap();
    }
    assert!(!f.check(b"hello", 0, &cancel).await.unwrap());
}
