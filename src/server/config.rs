use clap::Parser;

/// A single-node, RESP-compatible key-value server.
#[derive(Parser, Debug, Clone)]
#[command(name = "redis-rust", version, about)]
pub struct Cli {
    /// Directory an RDB dump file is read from at startup.
    #[arg(long)]
    pub dir: Option<String>,

    /// Name of the RDB dump file within `--dir`.
    #[arg(long)]
    pub dbfilename: Option<String>,

    /// TCP port to listen on.
    #[arg(long, default_value_t = 6379)]
    pub port: u16,

    /// "<host> <port>" of a master to replicate from.
    #[arg(long)]
    pub replicaof: Option<String>,
}

/// Server configuration, fixed at startup and read-only thereafter.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub dir: Option<String>,
    pub dbfilename: Option<String>,
    pub port: u16,
    pub replicaof: Option<String>,
}

impl From<Cli> for ServerConfig {
    fn from(cli: Cli) -> Self {
        Self {
            dir: cli.dir,
            dbfilename: cli.dbfilename,
            port: cli.port,
            replicaof: cli.replicaof,
        }
    }
}

impl ServerConfig {
    /// Path to the configured RDB dump file, if both `--dir` and
    /// `--dbfilename` were given.
    pub fn rdb_path(&self) -> Option<std::path::PathBuf> {
        match (&self.dir, &self.dbfilename) {
            (Some(dir), Some(name)) => Some(std::path::Path::new(dir).join(name)),
            _ => None,
        }
    }

    /// Parses `--replicaof "<host> <port>"` into a connectable address.
    pub fn master_addr(&self) -> Option<(String, u16)> {
        let raw = self.replicaof.as_ref()?;
        let mut parts = raw.split_whitespace();
        let host = parts.next()?.to_string();
        let port = parts.next()?.parse().ok()?;
        Some((host, port))
    }
}
