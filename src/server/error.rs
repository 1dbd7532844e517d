use thiserror::Error;

/// Error kinds the command engine and replication subsystem surface, per
/// the wire-visible error-handling table.
#[derive(Error, Debug)]
pub enum RedisError {
    #[error("parse error: {0}")]
    Protocol(String),

    #[error("unknown command")]
    UnknownCommand,

    #[error("{0}")]
    Argument(String),

    #[error("replica I/O error: {0}")]
    ReplicaIo(#[from] std::io::Error),

    #[error("RDB decode error: {0}")]
    RdbDecode(String),

    #[error("replica handshake error: {0}")]
    Handshake(String),
}

impl RedisError {
    /// Renders the wire-visible `-ERR ...` reply for error kinds that have
    /// one. Kinds that are internal-only (`ReplicaIo`) are never turned into
    /// a client reply.
    pub fn as_wire_message(&self) -> String {
        match self {
            RedisError::Protocol(detail) => format!("ERR parse error: {}", detail),
            RedisError::UnknownCommand => "ERR unknown command".to_string(),
            RedisError::Argument(detail) => format!("ERR {}", detail),
            RedisError::RdbDecode(detail) => format!("ERR rdb decode error: {}", detail),
            RedisError::Handshake(detail) => format!("ERR replication handshake error: {}", detail),
            RedisError::ReplicaIo(e) => format!("ERR {}", e),
        }
    }
}
