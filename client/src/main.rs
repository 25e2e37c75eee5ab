use clap::Parser;
use client::network::{Client, ClientConfig};
use log::info;
use rand::Rng;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Websocket URL of the game server
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:8080")]
    server: String,

    /// Display name of the player
    #[arg(short = 'n', long, default_value = "bot")]
    name: String,

    /// Player id; derived from the name when omitted
    #[arg(long)]
    player_id: Option<String>,

    /// Cursor color
    #[arg(short = 'c', long, default_value = "blue")]
    color: String,

    /// Generated inputs per second
    #[arg(short = 'r', long, default_value = "10")]
    input_rate: f32,

    /// Seconds to play before disconnecting; 0 plays until the server leaves
    #[arg(short = 'd', long, default_value = "0")]
    duration: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let player_id = args.player_id.unwrap_or_else(|| {
        format!("{}-{:04x}", args.name, rand::thread_rng().gen::<u16>())
    });

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    info!("Generating {} inputs per second", args.input_rate);

    let mut client = Client::new(ClientConfig {
        server_url: args.server,
        player_id,
        name: args.name,
        color: args.color,
        input_rate: args.input_rate,
        duration: (args.duration > 0).then(|| Duration::from_secs(args.duration)),
    });

    client.run().await?;

    Ok(())
}
