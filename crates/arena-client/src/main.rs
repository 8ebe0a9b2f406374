// main.rs — client process entry point
//
// Same overall shape as arena-server's `main.rs` (CLI via `clap`,
// `tracing_subscriber` init, a `MonotonicClock`-driven loop); the
// client's own loop is simpler since it has no fixed-rate simulation to
// run — it just drains the socket, maintains the mirror, and sends input
// every frame.

mod discovery_client;
mod mirror;
mod net_client;
mod session;

use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

use clap::Parser;

use arena_common::clock::{Clock, MonotonicClock};
use arena_common::config::Config;
use arena_common::discovery::DiscoveryRegistry;

use discovery_client::DiscoveryListener;
use session::ClientSession;

/// Arena shooter client mirror — no rendering (non-goal); this binary
/// exercises the network/replication core headlessly.
#[derive(Parser, Debug)]
#[command(name = "arena-client", version)]
struct Args {
    /// Path to a TOML config file; falls back to defaults for any key it
    /// doesn't set.
    #[arg(long)]
    config: Option<String>,

    /// Server address to connect to directly, skipping discovery.
    #[arg(long)]
    server: Option<SocketAddr>,

    /// Overrides the config's `player_name`.
    #[arg(long)]
    name: Option<String>,

    /// Seconds to wait for a discovery announcement before giving up, when
    /// `--server` isn't given.
    #[arg(long, default_value_t = 8.0)]
    discovery_timeout: f32,
}

fn load_config(path: Option<&str>) -> Config {
    let Some(path) = path else { return Config::default() };
    match std::fs::read_to_string(path) {
        Ok(text) => match Config::parse(&text) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, path, "failed to parse config, using defaults");
                Config::default()
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, path, "failed to read config, using defaults");
            Config::default()
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut config = load_config(args.config.as_deref());
    if let Some(name) = args.name {
        config.player_name = name;
    }

    let clock = MonotonicClock::new();

    let server_addr = match args.server {
        Some(addr) => addr,
        None => discover_server(&clock, args.discovery_timeout)?,
    };

    tracing::info!(addr = %server_addr, name = %config.player_name, "connecting");
    let mut session = ClientSession::connect(server_addr, config.player_name.clone(), clock.now())?;

    let mut accepted = false;
    loop {
        let now = clock.now();
        if session.poll(now) && !accepted {
            accepted = true;
            tracing::info!(identity = ?session.identity, "joined");
        }
        if accepted {
            // No input device in this headless core (non-goal: platform
            // window/input layer); send a neutral snapshot so the server's
            // `tick_connections` sees regular traffic and doesn't lag us
            // out between real input-layer frames.
            session.send_input(now, [0.0, 0.0], 0.0, false, false);
        }
        if matches!(session.net.state(), arena_common::connection::ConnectionState::Dropped | arena_common::connection::ConnectionState::Faulted) {
            tracing::warn!("connection lost");
            break;
        }
        thread::sleep(Duration::from_millis(33));
    }

    Ok(())
}

/// Listens on the discovery multicast group until one server answers or
/// `timeout_secs` elapses.
fn discover_server(clock: &MonotonicClock, timeout_secs: f32) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    let listener = DiscoveryListener::join()?;
    let mut registry = DiscoveryRegistry::new();
    let start = clock.now();
    loop {
        let now = clock.now();
        listener.poll(&mut registry, now);
        registry.prune_expired(now);
        if let Some(server) = registry.servers.first() {
            tracing::info!(name = %server.server_name, addr = %server.addr, "discovered server");
            return Ok(server.addr);
        }
        if now - start >= timeout_secs {
            return Err("no server discovered".into());
        }
        thread::sleep(Duration::from_millis(100));
    }
}
