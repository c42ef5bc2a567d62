use clap::Parser;
use client::network::Connection;
use client::prediction::{ClientWorld, Direction};
use log::{info, warn};
use rand::seq::SliceRandom;
use shared::{now_millis, ServerMessage, GRID_SIZE};
use tokio::time::{interval, Duration};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server URL to connect to
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:3001")]
    server: String,

    /// Room to join (server default if omitted)
    #[arg(long)]
    space: Option<String>,

    /// Join token
    #[arg(short, long)]
    token: Option<String>,

    /// Number of moves to attempt before leaving (0 = run until Ctrl+C)
    #[arg(short, long, default_value = "0")]
    moves: u32,

    /// Milliseconds between moves
    #[arg(short, long, default_value = "250")]
    interval_ms: u64,

    /// Side length of the room grid
    #[arg(short, long, default_value_t = GRID_SIZE)]
    grid_size: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Connecting to: {}", args.server);
    let mut connection = Connection::connect(&args.server).await?;
    connection
        .join(args.space.as_deref(), args.token.as_deref())
        .await?;

    let mut world = ClientWorld::new(args.grid_size);
    let mut move_interval = interval(Duration::from_millis(args.interval_ms.max(1)));
    let mut sent = 0u32;
    let mut acked = 0u32;
    let mut rejected = 0u32;

    loop {
        tokio::select! {
            message = connection.recv() => {
                let message = message?;
                match &message {
                    ServerMessage::SpaceJoined { spawn, user_id, users } => {
                        info!("Joined as {} at ({}, {}), {} other(s) here",
                              user_id, spawn.x, spawn.y, users.len());
                    }
                    ServerMessage::JoinRejected { reason } => {
                        warn!("Join refused: {}", reason);
                        return Ok(());
                    }
                    ServerMessage::MoveAck { .. } => acked += 1,
                    ServerMessage::MovementRejected { x, y } => {
                        rejected += 1;
                        warn!("Move rejected, server has us at ({}, {})", x, y);
                    }
                    ServerMessage::UserJoined { user_id, .. } => info!("{} joined", user_id),
                    ServerMessage::UserLeft { user_id } => info!("{} left", user_id),
                    ServerMessage::Movement { .. } => {}
                }
                world.apply(&message);
            }

            _ = move_interval.tick(), if world.is_joined() => {
                if args.moves > 0 && sent >= args.moves {
                    break;
                }

                let mut directions = Direction::ALL;
                directions.shuffle(&mut rand::thread_rng());
                let request = directions
                    .iter()
                    .find_map(|direction| world.request_move(*direction, now_millis()));

                if let Some(request) = request {
                    connection.send(&request).await?;
                    sent += 1;
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, leaving");
                break;
            }
        }
    }

    info!(
        "Sent {} moves: {} acknowledged, {} rejected, {} peer(s) visible",
        sent,
        acked,
        rejected,
        world.peers().len()
    );
    connection.close().await?;

    Ok(())
}
