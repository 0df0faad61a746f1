//! Jumpy Admin
//!
//! Runs the matchmaking coordinator behind a WebSocket broker.
//! `jumpy-admin demo` instead plays a scripted session in memory.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use jumpy::{
    config::{AdminConfig, ServerConfig},
    core::clock::{Clock, SystemClock},
    game::Direction,
    network::{ClientConfig, ClientEvent, LocalNetwork, PeerId},
    GameServer, ManualClock, PROTOCOL_VERSION, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Jumpy Admin v{} (protocol {})", VERSION, PROTOCOL_VERSION);

    match std::env::args().nth(1).as_deref() {
        None | Some("serve") => serve().await,
        Some("demo") => demo(),
        Some(other) => bail!("unknown command `{}` (expected `serve` or `demo`)", other),
    }
}

async fn serve() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("invalid server configuration")?;
    info!(
        "Countdown {}s, game {}s, min players {}",
        config.admin.countdown.as_secs(),
        config.admin.game_duration.as_secs(),
        config.admin.min_players
    );

    let server = Arc::new(GameServer::new(config)?);
    let running = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            running.shutdown();
        }
    });

    server.run().await?;
    info!("Server stopped");
    Ok(())
}

/// Demo: three players race through one session in memory.
fn demo() -> anyhow::Result<()> {
    info!("=== Starting Demo Session ===");

    let config = AdminConfig::from_env().context("invalid admin configuration")?;
    let game_ms = config.game_duration_ms();
    let countdown_ms = config.countdown_ms();
    let client_config = ClientConfig {
        admin_id: config.admin_id.clone(),
        ..ClientConfig::default()
    };
    let clock = ManualClock::new(SystemClock.now_ms());
    let mut net = LocalNetwork::new(config, clock)?;

    type Standings = (Vec<PeerId>, BTreeMap<PeerId, String>);
    let standings: Arc<Mutex<Option<Standings>>> = Arc::new(Mutex::new(None));
    let mut players = Vec::new();
    for (i, animal) in ["Fox", "Snow Owl", "Panda"].into_iter().enumerate() {
        let id = net.add_client(client_config.clone())?;
        let sink = standings.clone();
        let client = net
            .client_mut(&id)
            .context("client vanished after being added")?;
        client.on_event(move |event| {
            if let ClientEvent::GameEnd { ranks, animals, .. } = event {
                if let Ok(mut slot) = sink.lock() {
                    slot.get_or_insert_with(|| (ranks.clone(), animals.clone()));
                }
            }
        });
        if !net.connect(&id) {
            bail!("player {} could not reach the admin", i);
        }
        let client = net.client_mut(&id).context("client vanished")?;
        client.select_animal(animal)?;
        client.join()?;
        net.pump();
        info!("Player {} ({}) joined as {}", i, animal, id.short());
        players.push(id);
    }

    net.advance(countdown_ms);
    info!("Session started with {} players", net.admin().sessions().count());

    // Player i lands on roughly (i + 1) / 4 of its jumps.
    let jump_every = 250;
    let mut elapsed = 0;
    let mut turn: u64 = 0;
    let mut scores: BTreeMap<PeerId, u64> = BTreeMap::new();
    while elapsed < game_ms {
        for (i, id) in players.iter().enumerate() {
            let now = net.now();
            let Some(client) = net.client_mut(id) else { continue };
            let next = client.platforms(client.platform_index() + 1, 1);
            let Some(target) = next.first() else { continue };
            let right = Direction::towards(target.platform_type);
            let direction = if (turn + i as u64) % 4 <= i as u64 {
                right
            } else {
                wrong_way(right)
            };
            if let Err(e) = client.jump(direction, now) {
                warn!("Jump failed for {}: {}", id.short(), e);
            }
        }
        net.pump();
        for id in &players {
            if let Some(client) = net.client(id) {
                scores.insert(id.clone(), client.score());
            }
        }
        net.advance(jump_every);
        elapsed += jump_every;
        turn += 1;
    }
    net.advance(1_000);

    let (ranks, animals) = standings
        .lock()
        .map_err(|_| anyhow::anyhow!("rank log poisoned"))?
        .clone()
        .context("session ended without ranks")?;

    info!("=== Demo Session Complete ===");
    for (place, id) in ranks.iter().enumerate() {
        info!(
            "#{} {} ({}) with {} points",
            place + 1,
            id.short(),
            animals.get(id).map(String::as_str).unwrap_or("?"),
            scores.get(id).copied().unwrap_or_default()
        );
    }
    Ok(())
}

fn wrong_way(direction: Direction) -> Direction {
    match direction {
        Direction::Left => Direction::Right,
        Direction::Up => Direction::Left,
        Direction::Right => Direction::Up,
    }
}
