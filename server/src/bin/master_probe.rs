//! Listens on the master server port and prints every registration it hears
//!
//! Useful for checking that a game server's heartbeat reaches the network.
//! Nothing is stored and nothing is answered.

use clap::Parser;
use log::{info, warn};
use shared::{RegisterHost, MASTER_SERVER_PORT};
use std::time::Instant;
use tokio::net::UdpSocket;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = MASTER_SERVER_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let socket = UdpSocket::bind(format!("{}:{}", args.host, args.port)).await?;
    info!("Probe listening on {}", socket.local_addr()?);

    let started = Instant::now();
    let mut buf = [0u8; 2048];

    loop {
        let (len, from) = socket.recv_from(&mut buf).await?;

        match RegisterHost::decode(&buf[..len]) {
            Ok(host) => info!(
                "[{:>8.1}s] {} registered '{}' id={:016x} players={}/{} endpoint={}",
                started.elapsed().as_secs_f64(),
                from,
                host.name,
                host.unique_id,
                host.current_connections,
                host.max_connections,
                host.public_endpoint
            ),
            Err(e) => warn!("Ignoring {} bytes from {}: {}", len, from, e),
        }
    }
}
