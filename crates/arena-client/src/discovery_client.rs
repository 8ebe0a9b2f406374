// discovery_client.rs — LAN server discovery listener (client side)
//
// The server side only ever sends (see arena-server's `main.rs`
// `announce_discovery`); this is the other half: join the multicast group
// and feed `Message::Discovery` datagrams into a `DiscoveryRegistry`.
// Unlike `NetClient`, this socket never talks to one particular peer —
// any datagram on the group is fair game.

use std::io;
use std::net::{Ipv6Addr, UdpSocket};

use arena_common::discovery::{DiscoveryRegistry, MULTICAST_GROUP, MULTICAST_PORT};
use arena_common::message::{Decoded, Message};

pub struct DiscoveryListener {
    socket: UdpSocket,
}

impl DiscoveryListener {
    pub fn join() -> io::Result<Self> {
        let socket = UdpSocket::bind(format!("[::]:{MULTICAST_PORT}"))?;
        let group: Ipv6Addr = MULTICAST_GROUP.parse().expect("MULTICAST_GROUP is a valid literal");
        socket.join_multicast_v6(&group, 0)?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket })
    }

    /// Drains every pending discovery datagram into `registry`, refreshing
    /// or inserting an entry per server. The datagram's source address is
    /// kept alongside the announced game `port` (see `DiscoveredServer::addr`)
    /// — the discovery socket's own source port is ephemeral and not the
    /// one to connect to.
    pub fn poll(&self, registry: &mut DiscoveryRegistry, now: f32) {
        let mut buf = [0u8; arena_common::protocol::MAX_PACKET_SIZE];
        loop {
            let (len, addr) = match self.socket.recv_from(&mut buf) {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!(error = %e, "discovery socket recv error");
                    break;
                }
            };
            let mut reader = arena_common::codec::Reader::new(&buf[..len]);
            if let Ok(Decoded::Message(Message::Discovery { server_name, player_count, max_players, port })) = Message::decode(&mut reader) {
                let server_addr = std::net::SocketAddr::new(addr.ip(), port);
                registry.observe(server_name, player_count, max_players, port, server_addr, now);
            }
        }
    }
}
