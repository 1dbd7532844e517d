use std::sync::atomic::AtomicU64;

use rand::Rng;

pub mod master;
pub mod replica;

/// Master identity and replication offset counter. The replid is fixed at
/// boot; the offset begins at 0 and is advanced by every `SET` broadcast.
#[derive(Debug)]
pub struct MasterState {
    pub replid: String,
    pub offset: AtomicU64,
}

impl MasterState {
    pub fn new() -> Self {
        Self {
            replid: gen_replid(),
            offset: AtomicU64::new(0),
        }
    }
}

/// Replica-side identity: the master this server replicates from, and the
/// replication offset, counted in raw bytes consumed from the stream after
/// the handshake (see `repl::replica`'s first-chunk accounting rule).
#[derive(Debug)]
pub struct ReplicaState {
    pub master_host: String,
    pub master_port: u16,
    pub offset: AtomicU64,
}

/// Which role this server boot is playing. Fixed for the process lifetime.
#[derive(Debug)]
pub enum ServerContext {
    Master(MasterState),
    Replica(ReplicaState),
}

impl ServerContext {
    pub fn new(replica_of: Option<(String, u16)>) -> Self {
        match replica_of {
            None => Self::Master(MasterState::new()),
            Some((host, port)) => Self::Replica(ReplicaState {
                master_host: host,
                master_port: port,
                offset: AtomicU64::new(0),
            }),
        }
    }

    pub fn is_master(&self) -> bool {
        matches!(self, Self::Master(_))
    }
}

/// A 40-hex-digit replication id, generated fresh at boot.
pub fn gen_replid() -> String {
    const CHARSET: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..40)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}
