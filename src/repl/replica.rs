//! Replica-side replication: the handshake with a master, RDB snapshot
//! ingest, and the streaming command-apply loop that follows it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::repl::ServerContext;
use crate::server::codec;
use crate::server::error::RedisError;
use crate::server::rdb;
use crate::server::server::RedisServer;
use crate::server::value::RedisValue;

/// Runs the replica link to `host:port` for the lifetime of the process.
/// Errors are logged; the caller does not retry — a dropped replication
/// link just stops applying further writes.
pub async fn run(server: Arc<RedisServer>, host: String, port: u16) {
    if let Err(e) = run_inner(&server, &host, port).await {
        log::error!("replication link to {}:{} failed: {}", host, port, e);
    }
}

async fn run_inner(server: &Arc<RedisServer>, host: &str, port: u16) -> Result<()> {
    let mut stream = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("connecting to master {}:{}", host, port))?;

    let mut buf = BytesMut::with_capacity(8192);
    handshake(&mut stream, &mut buf, server.config.port).await?;

    let first_chunk_len = ingest_snapshot(&mut stream, &mut buf, server).await?;

    let offset = match &server.context {
        ServerContext::Replica(r) => &r.offset,
        ServerContext::Master(_) => {
            return Err(RedisError::Handshake(
                "replica task running on a server started as a master".to_string(),
            )
            .into())
        }
    };
    // Deliberately seeded from the length of the entire first post-PSYNC
    // chunk (the +FULLRESYNC line and the snapshot bytes included), not just
    // the bytes following the snapshot.
    offset.store(first_chunk_len as u64, Ordering::SeqCst);
    log::info!(
        "replication handshake with {}:{} complete, offset seeded at {}",
        host,
        port,
        first_chunk_len
    );

    stream_commands(&mut stream, &mut buf, server, offset).await
}

async fn handshake(stream: &mut TcpStream, buf: &mut BytesMut, our_port: u16) -> Result<()> {
    send_command(stream, &[b"PING"]).await?;
    expect_simple(&read_resp_value(stream, buf).await?, "PONG")?;

    let port_str = our_port.to_string();
    send_command(stream, &[b"REPLCONF", b"listening-port", port_str.as_bytes()]).await?;
    expect_simple(&read_resp_value(stream, buf).await?, "OK")?;

    send_command(stream, &[b"REPLCONF", b"capa", b"psync2"]).await?;
    expect_simple(&read_resp_value(stream, buf).await?, "OK")?;

    send_command(stream, &[b"PSYNC", b"?", b"-1"]).await?;
    Ok(())
}

async fn send_command(stream: &mut TcpStream, parts: &[&[u8]]) -> Result<()> {
    let frame = RedisValue::command(parts).encode();
    stream.write_all(&frame).await?;
    Ok(())
}

fn expect_simple(value: &RedisValue, expected: &str) -> Result<()> {
    match value {
        RedisValue::SimpleString(s) if s.as_ref() == expected.as_bytes() => Ok(()),
        other => Err(RedisError::Handshake(format!(
            "expected simple string '{}', got {:?}",
            expected, other
        ))
        .into()),
    }
}

/// Reads the next full RESP value off `stream`, buffering through `buf` and
/// reading more only when a frame is incomplete.
async fn read_resp_value(stream: &mut TcpStream, buf: &mut BytesMut) -> Result<RedisValue> {
    let mut discard = 0usize;
    read_resp_value_counting(stream, buf, &mut discard).await
}

async fn read_resp_value_counting(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    counted: &mut usize,
) -> Result<RedisValue> {
    loop {
        if let Some((value, consumed)) =
            codec::parse(buf).map_err(|e| RedisError::Protocol(e.to_string()))?
        {
            let _ = buf.split_to(consumed);
            return Ok(value);
        }
        let n = stream.read_buf(buf).await?;
        if n == 0 {
            return Err(
                RedisError::Handshake("master closed the connection mid-frame".to_string()).into(),
            );
        }
        *counted += n;
    }
}

/// Reads the `PSYNC` response: a `+FULLRESYNC <replid> <offset>` line
/// followed by the RDB snapshot framed as `$<len>\r\n<raw bytes>` with no
/// trailing CRLF — not valid RESP, so it is parsed by hand rather than
/// through [`codec::parse`]. Returns the total number of bytes physically
/// read from the socket while ingesting this response.
async fn ingest_snapshot(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    server: &Arc<RedisServer>,
) -> Result<usize> {
    let mut chunk_len = 0usize;

    let fullresync = read_resp_value_counting(stream, buf, &mut chunk_len).await?;
    match &fullresync {
        RedisValue::SimpleString(s) if s.starts_with(b"FULLRESYNC ") => {}
        other => {
            return Err(RedisError::Handshake(format!(
                "expected +FULLRESYNC reply, got {:?}",
                other
            ))
            .into())
        }
    }

    let snapshot = read_length_prefixed(stream, buf, &mut chunk_len).await?;
    let body = rdb::split_header(&snapshot).map_err(|e| RedisError::RdbDecode(e.to_string()))?;
    let mut store = server.store.lock().await;
    rdb::load_body(body, &mut store).map_err(|e| RedisError::RdbDecode(e.to_string()))?;

    Ok(chunk_len)
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

async fn read_length_prefixed(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    counted: &mut usize,
) -> Result<Bytes> {
    loop {
        if let Some(pos) = find_crlf(buf) {
            if buf.first() != Some(&b'$') {
                return Err(
                    RedisError::Handshake("expected '$' introducing RDB payload".to_string())
                        .into(),
                );
            }
            let len: usize = std::str::from_utf8(&buf[1..pos])?.parse()?;
            let header_len = pos + 2;

            loop {
                if buf.len() >= header_len + len {
                    let mut full = buf.split_to(header_len + len);
                    let payload = full.split_off(header_len);
                    return Ok(payload.freeze());
                }
                let n = stream.read_buf(buf).await?;
                if n == 0 {
                    return Err(RedisError::Handshake(
                        "master closed the connection mid-snapshot".to_string(),
                    )
                    .into());
                }
                *counted += n;
            }
        }
        let n = stream.read_buf(buf).await?;
        if n == 0 {
            return Err(RedisError::Handshake(
                "master closed the connection before sending the RDB header".to_string(),
            )
            .into());
        }
        *counted += n;
    }
}

/// The ongoing replication stream: read a chunk, account its full length
/// toward `offset`, then apply every complete command frame the chunk makes
/// available.
async fn stream_commands(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    server: &Arc<RedisServer>,
    offset: &AtomicU64,
) -> Result<()> {
    loop {
        let n = stream.read_buf(buf).await?;
        if n == 0 {
            let io_err = std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "master closed the replication stream",
            );
            return Err(RedisError::ReplicaIo(io_err).into());
        }
        offset.fetch_add(n as u64, Ordering::SeqCst);

        loop {
            match codec::parse(buf).map_err(|e| RedisError::Protocol(e.to_string()))? {
                Some((value, consumed)) => {
                    buf.split_to(consumed);
                    apply_replicated_frame(stream, server, offset, value).await?;
                }
                None => break,
            }
        }
    }
}

async fn apply_replicated_frame(
    stream: &mut TcpStream,
    server: &Arc<RedisServer>,
    offset: &AtomicU64,
    value: RedisValue,
) -> Result<()> {
    let Some((cmd, args)) = value.into_command() else {
        return Ok(());
    };

    if cmd.eq_ignore_ascii_case(b"SET") {
        apply_set(server, &args).await;
    } else if cmd.eq_ignore_ascii_case(b"REPLCONF") {
        let is_getack = args
            .first()
            .and_then(RedisValue::as_bulk)
            .map(|b| b.eq_ignore_ascii_case(b"GETACK"))
            .unwrap_or(false);
        if is_getack {
            let current = offset.load(Ordering::SeqCst);
            let reply =
                RedisValue::command(&[b"REPLCONF", b"ACK", current.to_string().as_bytes()]).encode();
            stream.write_all(&reply).await?;
        }
    }
    // every other replicated command is silently ignored

    Ok(())
}

async fn apply_set(server: &Arc<RedisServer>, args: &[RedisValue]) {
    let (key, value) = match (
        args.first().and_then(RedisValue::as_bulk).cloned(),
        args.get(1).and_then(RedisValue::as_bulk).cloned(),
    ) {
        (Some(k), Some(v)) => (k, v),
        _ => return,
    };

    let px_ms = args
        .get(2)
        .and_then(RedisValue::as_bulk)
        .filter(|b| b.eq_ignore_ascii_case(b"PX"))
        .and_then(|_| args.get(3))
        .and_then(RedisValue::as_bulk)
        .and_then(|b| std::str::from_utf8(b).ok())
        .and_then(|s| s.parse::<u64>().ok());

    let mut store = server.store.lock().await;
    match px_ms {
        Some(ms) => store.set_px(key, value, ms),
        None => store.set(key, value),
    }
}
