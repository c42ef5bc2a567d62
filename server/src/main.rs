use clap::Parser;
use log::info;
use server::auth::TokenAuthenticator;
use server::config::ServerConfig;
use server::network::Server;
use shared::{DEFAULT_SPACE_ID, GRID_SIZE, MAX_GRID_SIZE};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "3001")]
    port: u16,

    /// Side length of the room grid
    #[arg(
        short,
        long,
        default_value_t = GRID_SIZE,
        value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_GRID_SIZE))
    )]
    grid_size: u32,

    /// Room joined by clients that do not name one
    #[arg(short, long, default_value = DEFAULT_SPACE_ID)]
    default_space: String,

    /// Require a token on join; repeat as TOKEN=USER for each allowed user
    #[arg(long = "grant", value_name = "TOKEN=USER")]
    grants: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut config = ServerConfig::new(format!("{}:{}", args.host, args.port));
    config.grid_size = args.grid_size;
    config.default_space = args.default_space;

    if !args.grants.is_empty() {
        let authenticator = TokenAuthenticator::from_grants(&args.grants)?;
        info!("Token authentication enabled for {} user(s)", authenticator.len());
        config = config.with_authenticator(Arc::new(authenticator));
    }

    let server = Server::new(config).await?;

    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
