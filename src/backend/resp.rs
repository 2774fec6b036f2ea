// src/backend/resp.rs

//! A client-side RESP (REdis Serialization Protocol) codec and a
//! `BackingStore` implementation that speaks it over a plain TCP
//! connection to any Redis-protocol-compatible server.

use std::io;

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::codec::{Decoder, Encoder, Framed};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use super::store::{check_cancelled, BackingStore, BitFieldOp, Overflow, TransactionOutcome};
use crate::error::{FilterError, Result};

const CRLF: &[u8] = b"\r\n";
const CRLF_LEN: usize = 2;
const MAX_BULK_STRING_SIZE: usize = 512 * 1024 * 1024;

/// A decoded RESP2 reply. Only the subset a client needs to read back
/// from a command is modeled; this crate never decodes RESP3 or a
/// server-pushed frame.
#[derive(Debug, Clone, PartialEq)]
enum RespReply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Bytes>),
    Array(Option<Vec<RespReply>>),
}

struct RespCodec;

impl Encoder<&[&[u8]]> for RespCodec {
    type Error = io::Error;

    /// Encodes a command as a RESP array of bulk strings, the wire form
    /// every Redis-protocol client uses regardless of the command.
    fn encode(&mut self, args: &[&[u8]], dst: &mut BytesMut) -> io::Result<()> {
        dst.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
        for arg in args {
            dst.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
            dst.extend_from_slice(arg);
            dst.extend_from_slice(CRLF);
        }
        Ok(())
    }
}

impl Decoder for RespCodec {
    type Item = RespReply;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<RespReply>> {
        match parse_reply(src) {
            Ok(Some((reply, len))) => {
                src.advance(len);
                Ok(Some(reply))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(io::Error::new(io::ErrorKind::InvalidData, e)),
        }
    }
}

fn find_crlf(src: &[u8]) -> Option<usize> {
    src.windows(CRLF_LEN).position(|w| w == CRLF)
}

fn parse_line(src: &[u8]) -> Option<(&[u8], usize)> {
    find_crlf(src).map(|pos| (&src[..pos], pos + CRLF_LEN))
}

/// Parses one reply from the front of `src`. Returns `Ok(None)` when the
/// buffer doesn't yet hold a complete frame.
fn parse_reply(src: &[u8]) -> io::Result<Option<(RespReply, usize)>> {
    if src.is_empty() {
        return Ok(None);
    }
    let bad = || io::Error::new(io::ErrorKind::InvalidData, "malformed RESP frame");
    match src[0] {
        b'+' => match parse_line(&src[1..]) {
            Some((line, len)) => Ok(Some((
                RespReply::Simple(String::from_utf8_lossy(line).to_string()),
                len + 1,
            ))),
            None => Ok(None),
        },
        b'-' => match parse_line(&src[1..]) {
            Some((line, len)) => Ok(Some((
                RespReply::Error(String::from_utf8_lossy(line).to_string()),
                len + 1,
            ))),
            None => Ok(None),
        },
        b':' => match parse_line(&src[1..]) {
            Some((line, len)) => {
                let i = String::from_utf8_lossy(line)
                    .parse::<i64>()
                    .map_err(|_| bad())?;
                Ok(Some((RespReply::Integer(i), len + 1)))
            }
            None => Ok(None),
        },
        b'$' => {
            let Some((line, len_of_line)) = parse_line(&src[1..]) else {
                return Ok(None);
            };
            let n = String::from_utf8_lossy(line)
                .parse::<isize>()
                .map_err(|_| bad())?;
            if n == -1 {
                return Ok(Some((RespReply::Bulk(None), len_of_line + 1)));
            }
            let n = n as usize;
            if n > MAX_BULK_STRING_SIZE {
                return Err(bad());
            }
            let prefix = len_of_line + 1;
            if src.len() < prefix + n + CRLF_LEN {
                return Ok(None);
            }
            if &src[prefix + n..prefix + n + CRLF_LEN] != CRLF {
                return Err(bad());
            }
            let data = Bytes::copy_from_slice(&src[prefix..prefix + n]);
            Ok(Some((RespReply::Bulk(Some(data)), prefix + n + CRLF_LEN)))
        }
        b'*' => {
            let Some((line, len_of_line)) = parse_line(&src[1..]) else {
                return Ok(None);
            };
            let n = String::from_utf8_lossy(line)
                .parse::<isize>()
                .map_err(|_| bad())?;
            if n == -1 {
                return Ok(Some((RespReply::Array(None), len_of_line + 1)));
            }
            let n = n as usize;
            let mut cursor = len_of_line + 1;
            let mut elements = Vec::with_capacity(n);
            for _ in 0..n {
                match parse_reply(&src[cursor..])? {
                    Some((reply, len)) => {
                        elements.push(reply);
                        cursor += len;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((RespReply::Array(Some(elements)), cursor)))
        }
        _ => Err(bad()),
    }
}

/// A `BackingStore` that speaks RESP2 over one TCP connection.
///
/// Commands are serialized through a single `Mutex`: this client treats
/// the connection as request/response, one command in flight at a time,
/// which matches the teacher's `WATCH`/`MULTI`/`EXEC` usage pattern
/// where a transaction must own the connection for its whole sequence.
pub struct RespClient {
    conn: Mutex<Framed<TcpStream, RespCodec>>,
    round_trip_timeout: std::time::Duration,
}

impl RespClient {
    pub async fn connect(addr: &str, round_trip_timeout: std::time::Duration) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| FilterError::transport("connect", addr, e))?;
        Ok(RespClient {
            conn: Mutex::new(Framed::new(stream, RespCodec)),
            round_trip_timeout,
        })
    }

    async fn roundtrip(
        &self,
        conn: &mut Framed<TcpStream, RespCodec>,
        operation: &'static str,
        key: &str,
        args: &[&[u8]],
    ) -> Result<RespReply> {
        let io_err = |e: io::Error| FilterError::transport(operation, key, e);

        timeout(self.round_trip_timeout, async {
            conn.send(args).await.map_err(io_err)?;
            conn.next().await.ok_or_else(|| {
                FilterError::transport(
                    operation,
                    key,
                    io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed"),
                )
            })?
            .map_err(io_err)
        })
        .await
        .map_err(|_| {
            warn!(operation, key, "round trip timed out");
            FilterError::transport(
                operation,
                key,
                io::Error::new(io::ErrorKind::TimedOut, "round trip timed out"),
            )
        })?
    }

    fn expect_integer(operation: &'static str, reply: RespReply) -> Result<i64> {
        match reply {
            RespReply::Integer(i) => Ok(i),
            other => Err(FilterError::MalformedResponse {
                operation,
                detail: format!("expected integer, got {other:?}"),
            }),
        }
    }
}

fn bitfield_args(ops: &[BitFieldOp]) -> Vec<Vec<u8>> {
    let mut args = Vec::with_capacity(ops.len() * 3);
    for op in ops {
        match *op {
            BitFieldOp::Get { offset } => {
                args.push(b"GET".to_vec());
                args.push(b"u8".to_vec());
                args.push(offset.to_string().into_bytes());
            }
            BitFieldOp::Set { offset, value } => {
                args.push(b"SET".to_vec());
                args.push(b"u8".to_vec());
                args.push(offset.to_string().into_bytes());
                args.push(value.to_string().into_bytes());
            }
            BitFieldOp::IncrBy { offset, delta, overflow } => {
                args.push(b"OVERFLOW".to_vec());
                args.push(
                    match overflow {
                        Overflow::Wrap => b"WRAP".to_vec(),
                        Overflow::Sat => b"SAT".to_vec(),
                    },
                );
                args.push(b"INCRBY".to_vec());
                args.push(b"u8".to_vec());
                args.push(offset.to_string().into_bytes());
                args.push(delta.to_string().into_bytes());
            }
        }
    }
    args
}

#[async_trait]
impl BackingStore for RespClient {
    #[instrument(skip(self, cancel))]
    async fn get(&self, key: &str, cancel: &CancellationToken) -> Result<Option<Bytes>> {
        check_cancelled(cancel)?;
        let mut conn = self.conn.lock().await;
        let reply = self.roundtrip(&mut conn, "GET", key, &[b"GET", key.as_bytes()]).await?;
        match reply {
            RespReply::Bulk(b) => Ok(b),
            other => Err(FilterError::MalformedResponse {
                operation: "GET",
                detail: format!("unexpected reply {other:?}"),
            }),
        }
    }

    #[instrument(skip(self, value, cancel))]
    async fn set(&self, key: &str, value: Bytes, cancel: &CancellationToken) -> Result<()> {
        check_cancelled(cancel)?;
        let mut conn = self.conn.lock().await;
        self.roundtrip(&mut conn, "SET", key, &[b"SET", key.as_bytes(), &value])
            .await?;
        Ok(())
    }

    #[instrument(skip(self, cancel))]
    async fn del(&self, keys: &[String], cancel: &CancellationToken) -> Result<()> {
        check_cancelled(cancel)?;
        if keys.is_empty() {
            return Ok(());
        }
        let mut args: Vec<&[u8]> = vec![b"DEL"];
        args.extend(keys.iter().map(|k| k.as_bytes()));
        let mut conn = self.conn.lock().await;
        self.roundtrip(&mut conn, "DEL", &keys[0], &args).await?;
        Ok(())
    }

    #[instrument(skip(self, cancel))]
    async fn keys(&self, pattern: &str, cancel: &CancellationToken) -> Result<Vec<String>> {
        check_cancelled(cancel)?;
        let mut conn = self.conn.lock().await;
        let reply = self
            .roundtrip(&mut conn, "KEYS", pattern, &[b"KEYS", pattern.as_bytes()])
            .await?;
        match reply {
            RespReply::Array(Some(items)) => items
                .into_iter()
                .map(|item| match item {
                    RespReply::Bulk(Some(b)) => Ok(String::from_utf8_lossy(&b).to_string()),
                    other => Err(FilterError::MalformedResponse {
                        operation: "KEYS",
                        detail: format!("unexpected element {other:?}"),
                    }),
                })
                .collect(),
            RespReply::Array(None) => Ok(Vec::new()),
            other => Err(FilterError::MalformedResponse {
                operation: "KEYS",
                detail: format!("unexpected reply {other:?}"),
            }),
        }
    }

    #[instrument(skip(self, ops, cancel))]
    async fn bitfield(&self, key: &str, ops: &[BitFieldOp], cancel: &CancellationToken) -> Result<Vec<i64>> {
        check_cancelled(cancel)?;
        let owned = bitfield_args(ops);
        let mut args: Vec<&[u8]> = vec![b"BITFIELD", key.as_bytes()];
        args.extend(owned.iter().map(|a| a.as_slice()));

        let mut conn = self.conn.lock().await;
        let reply = self.roundtrip(&mut conn, "BITFIELD", key, &args).await?;
        match reply {
            RespReply::Array(Some(items)) => items
                .into_iter()
                .map(|item| Self::expect_integer("BITFIELD", item))
                .collect(),
            other => Err(FilterError::MalformedResponse {
                operation: "BITFIELD",
                detail: format!("unexpected reply {other:?}"),
            }),
        }
    }

    #[instrument(skip(self, f, cancel))]
    async fn watch_and_set(
        &self,
        key: &str,
        f: Box<dyn FnOnce(Option<Bytes>) -> Option<Bytes> + Send>,
        cancel: &CancellationToken,
    ) -> Result<TransactionOutcome> {
        check_cancelled(cancel)?;
        let mut conn = self.conn.lock().await;

        self.roundtrip(&mut conn, "WATCH", key, &[b"WATCH", key.as_bytes()])
            .await?;
        let current = match self
            .roundtrip(&mut conn, "GET", key, &[b"GET", key.as_bytes()])
            .await?
        {
            RespReply::Bulk(b) => b,
            other => {
                return Err(FilterError::MalformedResponse {
                    operation: "GET",
                    detail: format!("unexpected reply {other:?}"),
                });
            }
        };

        let Some(next) = f(current) else {
            self.roundtrip(&mut conn, "UNWATCH", key, &[b"UNWATCH"]).await?;
            return Ok(TransactionOutcome::Committed);
        };

        self.roundtrip(&mut conn, "MULTI", key, &[b"MULTI"]).await?;
        // Commands queued inside a MULTI reply `+QUEUED`, not their real
        // result; only the final EXEC reply carries outcomes.
        self.roundtrip(&mut conn, "SET", key, &[b"SET", key.as_bytes(), &next])
            .await?;
        let exec_reply = self.roundtrip(&mut conn, "EXEC", key, &[b"EXEC"]).await?;

        match exec_reply {
            RespReply::Array(Some(_)) => Ok(TransactionOutcome::Committed),
            RespReply::Array(None) => Ok(TransactionOutcome::Conflict),
            other => Err(FilterError::MalformedResponse {
                operation: "EXEC",
                detail: format!("unexpected reply {other:?}"),
            }),
        }
    }
}
