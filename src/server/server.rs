use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;

use crate::repl::ServerContext;

use super::config::ServerConfig;
use super::error::RedisError;
use super::rdb;
use super::replica_registry::ReplicaRegistry;
use super::store::Keyspace;

/// The single shared server value: configuration, the keyspace behind a
/// coarse lock, the replica registry, and this boot's replication role.
pub struct RedisServer {
    pub config: ServerConfig,
    pub store: Mutex<Keyspace>,
    pub registry: ReplicaRegistry,
    pub context: ServerContext,
}

impl RedisServer {
    /// Builds the server, loading an RDB dump from `--dir`/`--dbfilename` if
    /// both were given. A missing dump file is not an error — the server
    /// simply starts with an empty keyspace.
    pub fn new(config: ServerConfig, context: ServerContext) -> Result<Arc<Self>> {
        let mut keyspace = Keyspace::new();

        if let Some(path) = config.rdb_path() {
            match fs::read(&path) {
                Ok(buf) => {
                    if let Err(e) = rdb::load(&buf, &mut keyspace) {
                        let err = RedisError::RdbDecode(e.to_string());
                        log::warn!("{} (loading {})", err, path.display());
                    } else {
                        log::info!("loaded RDB dump from {}", path.display());
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    log::info!("no RDB dump found at {}, starting empty", path.display());
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("reading RDB dump at {}", path.display()))
                }
            }
        }

        Ok(Arc::new(Self {
            config,
            store: Mutex::new(keyspace),
            registry: ReplicaRegistry::new(),
            context,
        }))
    }
}
