// net_client.rs — client-side socket, connection state, and message dispatch
//
// Mirror image of arena-server's net_server.rs: one `Connection` instead of
// a `HashMap` keyed by peer address, since a client only ever talks to the
// one server it joined. The send-path sequencing/ack bookkeeping (draw the
// header sequence from `reliable`, `mark_sent` every reliable message
// riding this datagram, read the outgoing ack off `reliable`'s own inbound
// bookkeeping) is identical to `net_server.rs::send` — see
// `Channel::mark_sent` for why both ends need to agree on which channel
// owns the wire sequence.

use std::io;
use std::net::{SocketAddr, UdpSocket};

use arena_common::connection::{Connection, ConnectionState};
use arena_common::entity::{DirtyFlags, EntityVariant};
use arena_common::error::CoreError;
use arena_common::identity::NetworkId;
use arena_common::math::Vec2;
use arena_common::message::Message;
use arena_common::net::{build_packet, parse_packet};
use arena_common::protocol::{AckBlock, MAX_PACKET_SIZE};

const ERROR_THRESHOLD: u32 = 8;

/// One fully decoded inbound event for `session.rs` to act on. Only the
/// tags a client ever legitimately receives are represented; a server
/// accidentally echoing a client-only tag (`Connect`/`Input`) is ignored
/// the same way `net_server.rs::dispatch` ignores the reverse case.
pub enum ServerEvent {
    Accepted { identity: NetworkId, player_name: String },
    Rejected { reason: String },
    ServerFull,
    PlayerName { identity: NetworkId, name: String },
    ClientLeave { identity: NetworkId },
    PlayerKill { killer: NetworkId, victim: NetworkId },
    Chat { identity: NetworkId, text: String },
    EntityAdd { network_id: NetworkId, variant: EntityVariant, position: Vec2, orientation: f32, health: Option<i16> },
    EntityRemove { network_id: NetworkId },
    EntityUpdate { network_id: NetworkId, dirty: DirtyFlags, position: Vec2, orientation: f32, velocity: Vec2, health: Option<i16> },
}

pub struct NetClient {
    socket: UdpSocket,
    server_addr: SocketAddr,
    connection: Connection,
    error_count: u32,
}

impl NetClient {
    /// Binds an ephemeral local socket and begins connecting to
    /// `server_addr`. The caller still has to `send` the initial
    /// `Message::Connect` — `connect` only sets up the socket and
    /// connection-state bookkeeping (Closed -> Connecting).
    pub fn connect(server_addr: SocketAddr, now: f32) -> Result<Self, CoreError> {
        let bind_addr: SocketAddr = if server_addr.is_ipv6() { "[::]:0".parse().unwrap() } else { "0.0.0.0:0".parse().unwrap() };
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_nonblocking(true)?;
        let mut connection = Connection::new(now);
        connection.begin_connecting(now);
        Ok(Self { socket, server_addr, connection, error_count: 0 })
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state
    }

    /// Sends one outbound packet, identical framing/ack/retransmit policy
    /// to `net_server.rs::send` (see its doc comment for the multi-
    /// datagram-overflow caveat).
    pub fn send(&mut self, now: f32, reliable: &[Message], unreliable: &[Message]) -> Result<(), CoreError> {
        let mut outgoing: Vec<Message> = self.connection.reliable.due_retransmits(now);
        for msg in reliable {
            self.connection.reliable.enqueue(msg.clone(), true, now);
            outgoing.push(msg.clone());
        }
        outgoing.extend(unreliable.iter().cloned());

        let ack = self
            .connection
            .reliable
            .highest_received()
            .map(|ack| AckBlock { ack, bitfield: self.connection.reliable.receive_bitfield() });

        let mut remaining: &[Message] = &outgoing;
        let mut first = true;
        loop {
            let sequence = self.connection.reliable.reserve_sequence();
            if first {
                self.connection.reliable.mark_sent(sequence, now);
                first = false;
            }
            let (packet, leftover) = build_packet(sequence, ack, remaining);
            self.socket.send_to(&packet, self.server_addr)?;
            remaining = leftover;
            if remaining.is_empty() {
                break;
            }
        }
        Ok(())
    }

    /// Drains every datagram currently queued on the socket, ignoring
    /// anything not from `server_addr` (the only peer a client trusts).
    pub fn poll(&mut self, now: f32) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        let mut buf = [0u8; MAX_PACKET_SIZE];
        loop {
            let (len, addr) = match self.socket.recv_from(&mut buf) {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!(error = %e, "socket recv error");
                    break;
                }
            };
            if addr != self.server_addr {
                continue;
            }

            let parsed = match parse_packet(&buf[..len]) {
                Ok(Some(p)) => p,
                Ok(None) => continue,
                Err(CoreError::Malformed(reason)) => {
                    self.error_count += 1;
                    tracing::warn!(reason, count = self.error_count, "malformed packet from server");
                    if self.error_count >= ERROR_THRESHOLD {
                        self.connection.state = ConnectionState::Faulted;
                    }
                    continue;
                }
                Err(_) => continue,
            };

            self.connection.on_packet_received(now);
            if let Some(ack) = parsed.ack {
                self.connection.reliable.acknowledge(ack.ack, ack.bitfield);
            }
            self.connection.reliable.receive(parsed.header.sequence);

            for msg in parsed.messages {
                dispatch(msg, &mut events);
            }
        }
        events
    }

    pub fn disconnect(&mut self) {
        self.connection.disconnect();
    }

    pub fn tick(&mut self, now: f32) {
        self.connection.tick(now);
    }
}

fn dispatch(msg: Message, events: &mut Vec<ServerEvent>) {
    match msg {
        Message::ClientJoin { identity, player_name } => events.push(ServerEvent::Accepted { identity, player_name }),
        Message::Reject { reason } => events.push(ServerEvent::Rejected { reason }),
        Message::ServerFull => events.push(ServerEvent::ServerFull),
        Message::PlayerName { identity, name } => events.push(ServerEvent::PlayerName { identity, name }),
        Message::ClientLeave { identity } => events.push(ServerEvent::ClientLeave { identity }),
        Message::PlayerKill { killer, victim } => events.push(ServerEvent::PlayerKill { killer, victim }),
        Message::Chat { identity, text } => events.push(ServerEvent::Chat { identity, text }),
        Message::EntityAdd { network_id, variant, position, orientation, health } => {
            events.push(ServerEvent::EntityAdd { network_id, variant, position, orientation, health })
        }
        Message::EntityRemove { network_id } => events.push(ServerEvent::EntityRemove { network_id }),
        Message::EntityUpdate { network_id, dirty, position, orientation, velocity, health } => {
            events.push(ServerEvent::EntityUpdate { network_id, dirty, position, orientation, velocity, health })
        }
        // Connect/Disconnect/Input/Discovery only ever flow the other way
        // (or over the discovery socket, not this connection); a server
        // sending one is simply ignored, same policy as `net_server.rs`.
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_starts_in_connecting_state() {
        let client = NetClient::connect("127.0.0.1:32455".parse().unwrap(), 0.0).unwrap();
        assert_eq!(client.state(), ConnectionState::Connecting);
    }

    #[test]
    fn poll_is_empty_with_nothing_sent() {
        let mut client = NetClient::connect("127.0.0.1:32455".parse().unwrap(), 0.0).unwrap();
        assert!(client.poll(0.0).is_empty());
    }
}
