use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::repl;
use crate::repl::master;
use crate::server::error::RedisError;
use crate::server::server::RedisServer;
use crate::server::value::RedisValue;
use crate::server::wait;

/// Per-connection state the command engine needs across invocations: once a
/// connection has sent `REPLCONF listening-port` it carries a registry id
/// for the rest of its lifetime, whether or not it ever reaches `PSYNC`.
#[derive(Default)]
pub struct ConnState {
    pub replica_id: Option<crate::server::replica_registry::ReplicaId>,
}

/// What the connection loop should do after a command has been handled.
pub enum Outcome {
    /// Write this reply back to the client.
    Reply(RedisValue),
    /// `PSYNC` already wrote its own (non-RESP-framed) reply directly to the
    /// connection's sink; the caller must stop treating this socket as a
    /// normal client and switch to the passive ACK-only reader.
    Detach,
}

fn upper(cmd: &[u8]) -> Vec<u8> {
    cmd.to_ascii_uppercase()
}

fn arg_bytes(args: &[RedisValue], i: usize) -> Option<&Bytes> {
    args.get(i).and_then(RedisValue::as_bulk)
}

fn eq_ignore_case(a: &[u8], b: &[u8]) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Dispatches one parsed command. `raw` is the verbatim bytes received on
/// the client socket for this frame — forwarded to replicas unmodified for
/// `SET`, never re-serialized.
pub async fn dispatch(
    server: &Arc<RedisServer>,
    raw: &Bytes,
    cmd: &[u8],
    args: &[RedisValue],
    sink: &mpsc::UnboundedSender<Bytes>,
    conn: &mut ConnState,
) -> Outcome {
    match upper(cmd).as_slice() {
        b"PING" => Outcome::Reply(RedisValue::SimpleString(Bytes::from_static(b"PONG"))),

        b"ECHO" => match arg_bytes(args, 0) {
            Some(v) => Outcome::Reply(RedisValue::bulk(v.clone())),
            None => Outcome::Reply(argument_error("wrong number of arguments for 'echo' command")),
        },

        b"SET" => handle_set(server, raw, args).await,

        b"GET" => handle_get(server, args).await,

        b"CONFIG" => handle_config(server, args),

        b"KEYS" => handle_keys(server, args).await,

        b"INFO" => handle_info(server),

        b"REPLCONF" => handle_replconf(server, args, sink, conn).await,

        b"PSYNC" => handle_psync(server, sink, conn).await,

        b"WAIT" => handle_wait(server, args).await,

        _ => Outcome::Reply(error_reply_from(RedisError::UnknownCommand)),
    }
}

fn error_reply_from(err: RedisError) -> RedisValue {
    RedisValue::error(Bytes::copy_from_slice(err.as_wire_message().as_bytes()))
}

fn argument_error(msg: impl Into<String>) -> RedisValue {
    error_reply_from(RedisError::Argument(msg.into()))
}

async fn handle_set(server: &Arc<RedisServer>, raw: &Bytes, args: &[RedisValue]) -> Outcome {
    let (key, value) = match (arg_bytes(args, 0), arg_bytes(args, 1)) {
        (Some(k), Some(v)) => (k.clone(), v.clone()),
        _ => return Outcome::Reply(argument_error("wrong number of arguments for 'set' command")),
    };

    let px_ms = if args.len() >= 4 {
        let is_px = arg_bytes(args, 2).map(|b| eq_ignore_case(b, b"PX")).unwrap_or(false);
        if is_px {
            match arg_bytes(args, 3)
                .and_then(|b| std::str::from_utf8(b).ok())
                .and_then(|s| s.parse::<u64>().ok())
            {
                Some(ms) => Some(ms),
                None => return Outcome::Reply(argument_error("PX value is not an integer")),
            }
        } else {
            None
        }
    } else {
        None
    };

    {
        let mut store = server.store.lock().await;
        match px_ms {
            Some(ms) => store.set_px(key, value, ms),
            None => store.set(key, value),
        }
    }

    // Forward the verbatim client frame to every replica, not a
    // re-serialization — this is what replica-side byte accounting counts.
    server.registry.broadcast(raw.clone()).await;
    if let repl::ServerContext::Master(master) = &server.context {
        master
            .offset
            .fetch_add(raw.len() as u64, std::sync::atomic::Ordering::SeqCst);
    }

    Outcome::Reply(RedisValue::ok())
}

async fn handle_get(server: &Arc<RedisServer>, args: &[RedisValue]) -> Outcome {
    let key = match arg_bytes(args, 0) {
        Some(k) => k.clone(),
        None => return Outcome::Reply(argument_error("wrong number of arguments for 'get' command")),
    };

    let mut store = server.store.lock().await;
    match store.get(&key) {
        Some(v) => Outcome::Reply(RedisValue::bulk(v)),
        None => Outcome::Reply(RedisValue::NullBulkString),
    }
}

fn handle_config(server: &Arc<RedisServer>, args: &[RedisValue]) -> Outcome {
    let sub = arg_bytes(args, 0);
    let is_get = sub.map(|b| eq_ignore_case(b, b"GET")).unwrap_or(false);
    if !is_get {
        return Outcome::Reply(argument_error("unsupported CONFIG subcommand"));
    }

    let name = match arg_bytes(args, 1) {
        Some(n) => n.clone(),
        None => return Outcome::Reply(RedisValue::array(vec![])),
    };

    let reply = if eq_ignore_case(&name, b"dir") {
        let dir = server.config.dir.clone().unwrap_or_default();
        RedisValue::array(vec![
            RedisValue::bulk(Bytes::from_static(b"dir")),
            RedisValue::bulk(Bytes::from(dir.into_bytes())),
        ])
    } else if eq_ignore_case(&name, b"dbfilename") {
        let name_val = server.config.dbfilename.clone().unwrap_or_default();
        RedisValue::array(vec![
            RedisValue::bulk(Bytes::from_static(b"dbfilename")),
            RedisValue::bulk(Bytes::from(name_val.into_bytes())),
        ])
    } else {
        RedisValue::array(vec![])
    };

    Outcome::Reply(reply)
}

async fn handle_keys(server: &Arc<RedisServer>, args: &[RedisValue]) -> Outcome {
    let pattern = arg_bytes(args, 0);
    let is_star = pattern.map(|p| p.as_ref() == b"*").unwrap_or(false);
    if !is_star {
        return Outcome::Reply(RedisValue::array(vec![]));
    }

    let store = server.store.lock().await;
    let items = store.keys_all().into_iter().map(RedisValue::bulk).collect();
    Outcome::Reply(RedisValue::array(items))
}

fn handle_info(server: &Arc<RedisServer>) -> Outcome {
    let body = match &server.context {
        repl::ServerContext::Master(m) => format!(
            "role:master\r\nmaster_replid:{}\r\nmaster_repl_offset:{}",
            m.replid,
            m.offset.load(std::sync::atomic::Ordering::SeqCst)
        ),
        repl::ServerContext::Replica(_) => "role:slave".to_string(),
    };
    Outcome::Reply(RedisValue::bulk(Bytes::from(body.into_bytes())))
}

async fn handle_replconf(
    server: &Arc<RedisServer>,
    args: &[RedisValue],
    sink: &mpsc::UnboundedSender<Bytes>,
    conn: &mut ConnState,
) -> Outcome {
    let sub = arg_bytes(args, 0).cloned();
    if let Some(sub) = &sub {
        if eq_ignore_case(sub, b"listening-port") && conn.replica_id.is_none() {
            let id = server.registry.add(sink.clone()).await;
            conn.replica_id = Some(id);
        }
    }
    Outcome::Reply(RedisValue::ok())
}

async fn handle_psync(
    server: &Arc<RedisServer>,
    sink: &mpsc::UnboundedSender<Bytes>,
    conn: &mut ConnState,
) -> Outcome {
    let master_ctx = match &server.context {
        repl::ServerContext::Master(m) => m,
        repl::ServerContext::Replica(_) => {
            return Outcome::Reply(argument_error("PSYNC is only valid against a master"));
        }
    };

    // The offset in this line is always literal 0, regardless of the
    // master's live replication offset — the live value is exposed
    // separately via INFO.
    let fullresync = format!("+FULLRESYNC {} 0\r\n", master_ctx.replid);
    if sink.send(Bytes::from(fullresync.into_bytes())).is_err() {
        return Outcome::Detach;
    }
    if sink.send(master::canned_rdb_bulk()).is_err() {
        return Outcome::Detach;
    }

    if conn.replica_id.is_none() {
        let id = server.registry.add(sink.clone()).await;
        conn.replica_id = Some(id);
    }

    Outcome::Detach
}

async fn handle_wait(server: &Arc<RedisServer>, args: &[RedisValue]) -> Outcome {
    let num_replicas: usize = match arg_bytes(args, 0)
        .and_then(|b| std::str::from_utf8(b).ok())
        .and_then(|s| s.parse().ok())
    {
        Some(n) => n,
        None => return Outcome::Reply(RedisValue::Integer(0)),
    };
    let timeout_ms: u64 = match arg_bytes(args, 1)
        .and_then(|b| std::str::from_utf8(b).ok())
        .and_then(|s| s.parse().ok())
    {
        Some(t) => t,
        None => return Outcome::Reply(RedisValue::Integer(0)),
    };

    let acked = wait::wait_for_acks(&server.registry, num_replicas, Duration::from_millis(timeout_ms)).await;
    Outcome::Reply(RedisValue::Integer(acked as i64))
}
