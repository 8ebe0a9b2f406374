// main.rs — server process entry point
//
// Drives ticks off a monotonic clock through the explicit `TickTiming`
// accumulator rather than a raw frame-time global. CLI parsing follows
// the pack's `clap` derive convention, since this binary has no
// interactive console to seed.

mod net_server;
mod replicate;
mod session;
mod simulation;

use std::net::{SocketAddr, UdpSocket};
use std::thread;
use std::time::Duration;

use clap::Parser;

use arena_common::clock::{Clock, MonotonicClock};
use arena_common::config::Config;
use arena_common::discovery::{DISCOVERY_FREQUENCY_HZ, MULTICAST_GROUP, MULTICAST_PORT};
use arena_common::entity::InputSnapshot;
use arena_common::message::Message;

use net_server::{InboundEvent, NetServer};
use session::Session;
use simulation::{TickTiming, DEFAULT_TICK_RATE_HZ};

/// Arena shooter authoritative server.
#[derive(Parser, Debug)]
#[command(name = "arena-server", version)]
struct Args {
    /// Path to a TOML config file; falls back to defaults for any key
    /// it doesn't set.
    #[arg(long)]
    config: Option<String>,

    /// Overrides the config's `server_port`.
    #[arg(long)]
    port: Option<u16>,

    /// Overrides the config's `server_name`.
    #[arg(long)]
    name: Option<String>,

    /// Tick rate in Hz (typically 30-60).
    #[arg(long, default_value_t = DEFAULT_TICK_RATE_HZ)]
    tick_rate: f32,
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
    if let Some(port) = args.port {
        config.server_port = port;
    }
    if let Some(name) = args.name {
        config.server_name = name;
    }

    let bind_addr: SocketAddr = format!("[::]:{}", config.server_port).parse()?;
    let mut net = NetServer::bind(bind_addr)?;
    tracing::info!(addr = %net.local_addr()?, name = %config.server_name, "server listening");

    let discovery_socket = bind_discovery_socket()?;

    let bounds_min = [0.0, 0.0];
    let bounds_max = [800.0, 600.0];
    let spawn_points = vec![[50.0, 50.0], [750.0, 50.0], [50.0, 550.0], [750.0, 550.0]];
    let mut session = Session::new(config.server_name.clone(), arena_common::entity::MAX_PLAYERS as u8, bounds_min, bounds_max, spawn_points, 0x5EED);

    let clock = MonotonicClock::new();
    let mut timing = TickTiming::new(args.tick_rate);
    let mut last_tick_time = clock.now();
    let mut last_discovery_at = clock.now();

    loop {
        let now = clock.now();
        let elapsed = now - last_tick_time;
        last_tick_time = now;

        let events = net.poll_inbound(now);
        let mut inputs: std::collections::HashMap<arena_common::identity::NetworkId, InputSnapshot> = std::collections::HashMap::new();
        handle_events(&mut net, &mut session, events, now, &mut inputs);

        let ticks = timing.accumulate(elapsed);
        for _ in 0..ticks {
            session.advance(timing.tick_duration(), &inputs);
            broadcast_deltas(&mut net, &mut session, now);
        }

        net.tick_connections(now);

        if now - last_discovery_at >= 1.0 / DISCOVERY_FREQUENCY_HZ {
            last_discovery_at = now;
            announce_discovery(&discovery_socket, &config, &session);
        }

        thread::sleep(Duration::from_secs_f32((timing.tick_duration() - (clock.now() - now)).max(0.0)));
    }
}

fn handle_events(
    net: &mut NetServer,
    session: &mut Session,
    events: Vec<InboundEvent>,
    now: f32,
    inputs: &mut std::collections::HashMap<arena_common::identity::NetworkId, InputSnapshot>,
) {
    for event in events {
        match event {
            InboundEvent::Connect { addr, player_name } => {
                match session.join(player_name.clone()) {
                    Ok(identity) => {
                        if let Some(peer) = net.peers.get_mut(&addr) {
                            peer.identity = Some(identity);
                            peer.connection.accept();
                        }
                        let snapshot = replicate::join_snapshot(&mut session.simulation);
                        let accept = Message::ClientJoin { identity, player_name: player_name.clone() };
                        let mut reliable = vec![accept];
                        reliable.extend(snapshot);
                        let _ = net.send(addr, now, &reliable, &[]);

                        // Already-connected peers only learn the newcomer's
                        // avatar via the next `EntityAdd` delta; their
                        // display name rides a separate reliable broadcast
                        // since it isn't part of the entity state.
                        let announce = Message::PlayerName { identity, name: player_name };
                        let others: Vec<SocketAddr> = net.peers.keys().copied().filter(|a| *a != addr).collect();
                        for other in others {
                            let _ = net.send(other, now, &[announce.clone()], &[]);
                        }
                    }
                    Err(_) => {
                        let _ = net.send(addr, now, &[Message::ServerFull], &[]);
                        net.disconnect(addr);
                    }
                }
            }
            InboundEvent::Disconnect { addr } => {
                if let Some(peer) = net.peers.get(&addr) {
                    if let Some(identity) = peer.identity {
                        // Announce the departure before `leave` detaches the
                        // avatar node, since that detach bypasses the
                        // simulation's per-tick `removed_this_tick` tracking
                        // `replicate::tick_deltas` normally reports through.
                        let leave_msg = Message::ClientLeave { identity };
                        let remove_msg = Message::EntityRemove { network_id: identity };
                        let others: Vec<SocketAddr> = net.peers.keys().copied().filter(|a| *a != addr).collect();
                        for other in others {
                            let _ = net.send(other, now, &[leave_msg.clone(), remove_msg.clone()], &[]);
                        }
                        session.leave(identity);
                    }
                }
                net.disconnect(addr);
            }
            InboundEvent::Input { addr, snapshot } => {
                if let Some(peer) = net.peers.get(&addr) {
                    if let Some(identity) = peer.identity {
                        inputs.insert(identity, snapshot);
                    }
                }
            }
            InboundEvent::Chat { addr, text } => {
                if let Some(peer) = net.peers.get(&addr) {
                    if let Some(identity) = peer.identity {
                        let chat = Message::Chat { identity, text };
                        let targets: Vec<SocketAddr> = net.peers.keys().copied().collect();
                        for target in targets {
                            let _ = net.send(target, now, &[chat.clone()], &[]);
                        }
                    }
                }
            }
            InboundEvent::PlayerName { addr, name } => {
                if let Some(peer) = net.peers.get_mut(&addr) {
                    peer.display_name = name;
                }
            }
        }
    }
}

/// Broadcasts this tick's deltas to every connected peer. Deltas are
/// computed once (draining the simulation's per-tick dirty/removed/kill
/// lists) and fanned out unreliably, except `EntityRemove`/`PlayerKill`
/// which travel reliably since a client must never miss them (see
/// DESIGN.md).
fn broadcast_deltas(net: &mut NetServer, session: &mut Session, now: f32) {
    let deltas = replicate::tick_deltas(&mut session.simulation);
    if deltas.is_empty() {
        return;
    }
    let mut reliable = Vec::new();
    let mut unreliable = Vec::new();
    for msg in deltas {
        match msg {
            Message::EntityRemove { .. } | Message::PlayerKill { .. } => reliable.push(msg),
            _ => unreliable.push(msg),
        }
    }
    let targets: Vec<SocketAddr> = net.peers.keys().copied().collect();
    for target in targets {
        let _ = net.send(target, now, &reliable, &unreliable);
    }
}

fn bind_discovery_socket() -> Result<UdpSocket, Box<dyn std::error::Error>> {
    let socket = UdpSocket::bind("[::]:0")?;
    socket.set_multicast_loop_v6(true)?;
    Ok(socket)
}

fn announce_discovery(socket: &UdpSocket, config: &Config, session: &Session) {
    let datagram = Message::Discovery {
        server_name: config.server_name.clone(),
        player_count: session.players.len() as u8,
        max_players: session.max_players,
        port: config.server_port,
    };
    let mut buf = Vec::new();
    datagram.encode(&mut buf);
    let target = format!("[{MULTICAST_GROUP}]:{MULTICAST_PORT}");
    if let Err(e) = socket.send_to(&buf, target) {
        tracing::warn!(error = %e, "discovery multicast send failed");
    }
}
