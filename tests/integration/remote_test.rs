// tests/integration/remote_test.rs

//! Exercises `RemoteGcbf` and `RemoteClassicalFilter` against a real
//! RESP-speaking server. Reads the address from `REDIS_URL`; if it is
//! unset, every test here skips (printing a notice) instead of failing,
//! so the suite stays green in environments with no server available.

use std::time::Duration;

use gcbf::backend::RespClient;
use gcbf::remote::{RemoteClassicalFilter, RemoteGcbf};
use tokio_util::sync::CancellationToken;

async fn connect() -> Option<RespClient> {
    let Ok(url) = std::env::var("REDIS_URL") else {
        eprintln!("REDIS_URL not set; skipping network-backed integration test");
        return None;
    };
    let addr = url
        .strip_prefix("redis://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(&url);
    Some(
        RespClient::connect(addr, Duration::from_millis(2000))
            .await
            .expect("REDIS_URL is set but connecting to it failed"),
    )
}

fn token() -> CancellationToken {
    CancellationToken::new()
}

#[tokio::test]
async fn remote_gcbf_put_check_advance_against_live_server() {
    let Some(client) = connect().await else { return };
    let cancel = token();
    let name = format!("gcbf-it-{}", std::process::id());
    let f = RemoteGcbf::open(client, &name, 10_000, 7, 16, &cancel).await.unwrap();

    f.put(b"alpha", 1, &cancel).await.unwrap();
    f.put(b"beta", 4, &cancel).await.unwrap();
    assert!(f.check(b"alpha", &cancel).await.unwrap());
    assert!(f.check(b"beta", &cancel).await.unwrap());

    f.advance_generation(2, &cancel).await.unwrap();
    assert!(!f.check(b"alpha", &cancel).await.unwrap());
    assert!(f.check(b"beta", &cancel).await.unwrap());

    f.sweep(&cancel).await.unwrap();
    f.drop_filter(&cancel).await.unwrap();
}

#[tokio::test]
async fn remote_classical_put_check_subtract_against_live_server() {
    let Some(client) = connect().await else { return };
    let cancel = token();
    let name = format!("classical-it-{}", std::process::id());
    let f = RemoteClassicalFilter::new(client, &name, 5_000, 7);

    f.put(b"gamma", &cancel).await.unwrap();
    assert!(f.check(b"gamma", 0, &cancel).await.unwrap());
    f.subtract(255, &cancel).await.unwrap();
    assert!(!f.check(b"gamma", 0, &cancel).await.unwrap());
}
