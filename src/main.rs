use crate::config::{ServerConfig, DEFAULT_PORT};
use crate::echo::StdoutTrace;
use crate::server::Server;
use clap::Parser;
use fdlimit::Outcome;
use log::{debug, warn};
use std::sync::Arc;

mod config;
mod echo;
mod error;
mod request;
mod response;
mod server;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Creates an http-server that will echo out HEAD, GET, POST, PUT, PATCH, DELETE, OPTIONS in JSON format"
)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let args = Args::parse();

    match fdlimit::raise_fd_limit() {
        Ok(Outcome::LimitRaised { from, to }) => {
            debug!("File descriptor limit raised from {} to {}", from, to)
        }
        Ok(Outcome::Unsupported) => debug!("File descriptor limit left unchanged"),
        Err(_) => warn!("Could not raise file descriptor limit"),
    }

    let config = ServerConfig::with_port(args.port);
    let host = config.host.clone();
    let server = Server::new(config, Arc::new(StdoutTrace)).bind().await?;

    println!("Listening on {}:{}", host, server.local_addr()?.port());
    server.run().await?;

    Ok(())
}

/// Routes `log` records to stderr. Under the `trace` feature the
/// `tracing-subscriber` fmt layer takes over and bridges `log` records into
/// it, so both macro families end up in the same place.
fn init_logging() {
    #[cfg(feature = "trace")]
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_writer(std::io::stderr)
        .try_init();
    #[cfg(not(feature = "trace"))]
    let _ = env_logger::Builder::from_env(env_logger::Env::new().default_filter_or("warn"))
        .try_init();
}
