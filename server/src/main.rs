use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::network::Server;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Websocket port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Port of the HTTP metrics endpoint
    #[arg(long)]
    http_port: Option<u16>,

    /// Base tick rate in Hz, within [20, 60]
    #[arg(short, long)]
    tick_rate: Option<f32>,

    /// Maximum number of joined players
    #[arg(short, long)]
    max_clients: Option<usize>,

    /// TOML configuration file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };

        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(http_port) = self.http_port {
            config.server.http_port = http_port;
        }
        if let Some(tick_rate) = self.tick_rate {
            config.game.base_tick_rate = tick_rate;
        }
        if let Some(max_clients) = self.max_clients {
            config.server.max_clients = max_clients;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = Args::parse().into_config()?;
    info!(
        "Starting server: {} Hz base tick rate, up to {} players",
        config.game.base_tick_rate, config.server.max_clients
    );

    let http_addr: SocketAddr =
        format!("{}:{}", config.server.host, config.server.http_port).parse()?;
    let game_server = Server::bind(config).await?;

    let monitor = game_server.monitor();
    tokio::spawn(async move {
        if let Err(e) = server::http::serve(http_addr, monitor).await {
            error!("Metrics endpoint stopped: {}", e);
        }
    });

    let shutdown = game_server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            shutdown.notify_one();
        }
    });

    game_server.run().await?;
    Ok(())
}
