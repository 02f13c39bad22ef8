use clap::Parser;
use log::{error, info};
use server::network::{Server, ServerMessage};
use server::registration::RegistrationConfig;
use shared::{GAME_SERVER_PORT, MASTER_SERVER_PORT};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value_t = GAME_SERVER_PORT)]
    port: u16,

    /// Tick rate (updates per second)
    #[arg(short, long, default_value = "30")]
    tick_rate: u32,

    /// Name shown in the master server listing
    #[arg(short, long, default_value = "Game Server")]
    name: String,

    /// Master server host name
    #[arg(long, default_value = shared::DEFAULT_MASTER_HOST)]
    master_host: String,

    /// Master server port
    #[arg(long, default_value_t = MASTER_SERVER_PORT)]
    master_port: u16,

    /// Do not register with a master server
    #[arg(long)]
    no_master: bool,

    /// Advertise the bind address instead of discovering the outbound interface
    #[arg(long)]
    no_discovery: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let registration = (!args.no_master).then(|| RegistrationConfig {
        master_host: args.master_host.clone(),
        master_port: args.master_port,
        discover_address: !args.no_discovery,
        ..RegistrationConfig::default()
    });

    let address = format!("{}:{}", args.host, args.port);
    let tick_duration = Duration::from_secs_f64(1.0 / args.tick_rate.max(1) as f64);

    let mut server = Server::new(&address, tick_duration, &args.name, registration).await?;
    if !server.is_registering() {
        info!("Running without master server registration");
    }

    let shutdown = server.shutdown_sender();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            if let Err(e) = shutdown.send(ServerMessage::Shutdown) {
                error!("Failed to signal shutdown: {}", e);
            }
        }
    });

    server.run().await?;

    Ok(())
}
