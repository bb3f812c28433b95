use std::net::SocketAddr;

use anyhow::anyhow;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use callbridge::{AppState, ServerConfig, routes};

/// Callbridge - outbound voice agent bridge
#[derive(Parser, Debug)]
#[command(name = "callbridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Override the bind port from the environment
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections to the dialogue service
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let mut config = ServerConfig::from_env()?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    let address = config.address();
    println!("Starting server on {address}");
    info!(
        model = %config.realtime_model,
        voice = %config.realtime_voice,
        barge_in = config.barge_in_enabled,
        "Configuration loaded"
    );

    let app_state = AppState::new(config);

    let app = routes::api::create_api_router()
        .merge(routes::media::create_media_router())
        .with_state(app_state);

    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{address}': {e}"))?;

    println!("Server listening on http://{socket_addr}");
    let listener = TcpListener::bind(&socket_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
