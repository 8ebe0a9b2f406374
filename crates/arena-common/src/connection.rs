// connection.rs — per-peer connection state machine
//
// An explicit state machine driven by elapsed time since the last packet
// as well as packet content, rather than inferring liveness from traffic
// alone — a peer that's gone quiet degrades through `Lagging` before it's
// declared `Dropped`, instead of jumping straight from connected to gone.

use crate::channel::Channel;

pub const LAGGING_TIMEOUT: f32 = 0.5;
pub const DROPPED_TIMEOUT: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Connected,
    Lagging,
    Faulted,
    Dropped,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Faulted | ConnectionState::Dropped)
    }
}

pub struct Connection {
    pub state: ConnectionState,
    pub reliable: Channel,
    pub unreliable: Channel,
    last_received_at: f32,
}

impl Connection {
    pub fn new(now: f32) -> Self {
        Self {
            state: ConnectionState::Closed,
            reliable: Channel::new(),
            unreliable: Channel::new(),
            last_received_at: now,
        }
    }

    pub fn begin_connecting(&mut self, now: f32) {
        if self.state == ConnectionState::Closed {
            self.state = ConnectionState::Connecting;
            self.last_received_at = now;
        }
    }

    pub fn accept(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Connected;
        }
    }

    pub fn reject(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Faulted;
        }
    }

    pub fn disconnect(&mut self) {
        if matches!(self.state, ConnectionState::Connected | ConnectionState::Lagging) {
            self.state = ConnectionState::Closed;
        }
    }

    /// Records that a packet arrived from this peer, reviving a
    /// `Lagging` connection back to `Connected`.
    pub fn on_packet_received(&mut self, now: f32) {
        self.last_received_at = now;
        if self.state == ConnectionState::Lagging {
            self.state = ConnectionState::Connected;
        }
    }

    /// Advances the timeout-driven transitions. Called once per tick
    /// with the current monotonic time.
    pub fn tick(&mut self, now: f32) {
        match self.state {
            ConnectionState::Connecting => {
                if now - self.last_received_at >= DROPPED_TIMEOUT {
                    self.state = ConnectionState::Faulted;
                }
            }
            ConnectionState::Connected => {
                let elapsed = now - self.last_received_at;
                if elapsed >= DROPPED_TIMEOUT {
                    // Passed through Lagging's threshold on the way here;
                    // a single tick call models both transitions.
                    self.state = ConnectionState::Dropped;
                } else if elapsed >= LAGGING_TIMEOUT {
                    self.state = ConnectionState::Lagging;
                }
            }
            ConnectionState::Lagging => {
                if now - self.last_received_at >= DROPPED_TIMEOUT {
                    self.state = ConnectionState::Dropped;
                } else if self.reliable.has_dropped_reliable(now) {
                    self.state = ConnectionState::Dropped;
                }
            }
            ConnectionState::Closed | ConnectionState::Faulted | ConnectionState::Dropped => {}
        }
    }
}
