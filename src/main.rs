use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;

use server::config::{Cli, ServerConfig};
use server::connection;
use server::server::RedisServer;

mod repl;
mod server;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = ServerConfig::from(cli);
    let port = config.port;
    let master_addr = config.master_addr();

    let context = repl::ServerContext::new(master_addr.clone());
    let server = RedisServer::new(config, context).context("starting server")?;

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("binding to port {}", port))?;
    log::info!("listening on 127.0.0.1:{}", port);

    if let Some((host, master_port)) = master_addr {
        let replica_server = server.clone();
        tokio::spawn(repl::replica::run(replica_server, host, master_port));
    }

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                log::debug!("accepted connection from {}", peer);
                let server = server.clone();
                tokio::spawn(connection::handle(server, stream));
            }
            Err(e) => {
                log::warn!("error accepting connection: {}", e);
            }
        }
    }
}
