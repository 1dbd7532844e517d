//! Per-connection task: reads RESP frames off the socket, dispatches them
//! through [`commands::dispatch`], and writes replies back through a
//! dedicated write-task fed by an unbounded channel. The same channel sink
//! doubles as a replica's broadcast target once `REPLCONF listening-port`
//! or `PSYNC` registers it.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::codec;
use super::commands::{self, ConnState, Outcome};
use super::error::RedisError;
use super::server::RedisServer;
use super::value::RedisValue;

pub async fn handle(server: Arc<RedisServer>, stream: TcpStream) {
    let peer = stream.peer_addr().ok();
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<bytes::Bytes>();

    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if let Err(e) = writer.write_all(&bytes).await {
                log::debug!("connection write error to {:?}: {}", peer, RedisError::from(e));
                break;
            }
        }
    });

    let mut conn = ConnState::default();
    let mut buf = BytesMut::with_capacity(4096);
    let mut detached = false;

    'connection: loop {
        let n = match reader.read_buf(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                log::warn!("connection read error from {:?}: {}", peer, e);
                break;
            }
        };
        if n == 0 {
            break;
        }

        loop {
            match codec::parse(&buf) {
                Ok(Some((value, consumed))) => {
                    let raw = buf.split_to(consumed).freeze();

                    if detached {
                        handle_replica_ack_frame(&server, value, &conn).await;
                        continue;
                    }

                    let (cmd, args) = match value.into_command() {
                        Some(parsed) => parsed,
                        None => {
                            let err = RedisError::Protocol("malformed command frame".to_string());
                            let _ = tx.send(
                                RedisValue::error(bytes::Bytes::from(
                                    err.as_wire_message().into_bytes(),
                                ))
                                .encode(),
                            );
                            continue;
                        }
                    };

                    match commands::dispatch(&server, &raw, &cmd, &args, &tx, &mut conn).await {
                        Outcome::Reply(reply) => {
                            if tx.send(reply.encode()).is_err() {
                                break 'connection;
                            }
                        }
                        Outcome::Detach => {
                            detached = true;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let err = RedisError::Protocol(e.to_string());
                    let _ = tx.send(
                        RedisValue::error(bytes::Bytes::from(err.as_wire_message().into_bytes()))
                            .encode(),
                    );
                    buf.clear();
                    break;
                }
            }
        }
    }

    if let Some(id) = conn.replica_id {
        server.registry.remove(id).await;
    }
}

/// Once detached, the only frame this connection is expected to send is
/// `REPLCONF ACK <offset>` — everything else is silently ignored rather
/// than treated as a protocol error, matching real Redis's tolerance for a
/// replica socket that never sends anything else.
async fn handle_replica_ack_frame(server: &Arc<RedisServer>, value: RedisValue, conn: &ConnState) {
    let id = match conn.replica_id {
        Some(id) => id,
        None => return,
    };

    let Some((cmd, args)) = value.into_command() else {
        return;
    };
    if !cmd.eq_ignore_ascii_case(b"REPLCONF") {
        return;
    }
    let is_ack = args
        .first()
        .and_then(RedisValue::as_bulk)
        .map(|b| b.eq_ignore_ascii_case(b"ACK"))
        .unwrap_or(false);
    if is_ack {
        server.registry.ack(id).await;
    }
}
