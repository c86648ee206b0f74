//! Wandering bot.
//!
//! Usage:
//!   cargo run -p arena_client --bin bot -- [--addr 127.0.0.1:40000] [--name Bot] [--ticks 600]
//!
//! Logs in, then walks toward the nearest known item at a fixed step per
//! tick and claims it on arrival.

use std::{env, time::Duration};

use anyhow::Context;
use arena_client::ArenaClient;
use arena_shared::math::Position;
use rand::Rng;
use tracing::info;

const STEP: f32 = 0.25;
const REACH_SQ: f32 = 0.5 * 0.5;
const TICK: Duration = Duration::from_millis(50);

struct Args {
    addr: String,
    name: String,
    ticks: u32,
}

fn parse_args() -> Args {
    let mut out = Args {
        addr: "127.0.0.1:40000".to_string(),
        name: "Bot".to_string(),
        ticks: 600,
    };
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                out.addr = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                out.name = args[i + 1].clone();
                i += 2;
            }
            "--ticks" if i + 1 < args.len() => {
                out.ticks = args[i + 1].parse().unwrap_or(600);
                i += 2;
            }
            _ => i += 1,
        }
    }
    out
}

fn step_toward(from: Position, to: Position) -> Position {
    let dx = to.x - from.x;
    let dz = to.z - from.z;
    let dist = (dx * dx + dz * dz).sqrt();
    if dist <= STEP {
        return Position::new(to.x, from.y, to.z);
    }
    Position::new(from.x + dx / dist * STEP, from.y, from.z + dz / dist * STEP)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args();
    let addr = args.addr.parse().context("parse --addr")?;
    let mut client = ArenaClient::connect(addr).await?;
    let (id, items) = client.login(&args.name, Duration::from_secs(5)).await?;
    info!(player_id = id, items = items.len(), "Bot ready");

    let mut rng = rand::thread_rng();
    let mut pos = Position::new(0.0, 0.5, 0.0);
    let mut wander = Position::new(rng.gen_range(-5.0..5.0), 0.5, rng.gen_range(-5.0..5.0));

    for _ in 0..args.ticks {
        while client.recv(Duration::from_millis(1)).await?.is_some() {}
        if client.world.eliminated {
            info!(player_id = id, "Eliminated");
            break;
        }

        let target = match client.world.nearest_item(pos) {
            Some((item_id, item_pos)) if pos.distance_sq(item_pos) <= REACH_SQ => {
                client.get_item(item_id).await?;
                client.world.items.remove(&item_id);
                continue;
            }
            Some((_, item_pos)) => item_pos,
            None => {
                if pos.distance_sq(wander) <= REACH_SQ {
                    wander = Position::new(rng.gen_range(-5.0..5.0), 0.5, rng.gen_range(-5.0..5.0));
                }
                wander
            }
        };

        pos = step_toward(pos, target);
        client.move_to(pos).await?;
        tokio::time::sleep(TICK).await;
    }

    info!(player_id = id, score = client.world.own_score, "Bot done");
    Ok(())
}
