// error.rs — core error taxonomy
//
// The codec only ever signals one condition locally (`Overflow`); everything
// above it either recovers on the spot (discard a packet, fault a
// connection) or is fatal for the session.

/// Raised by the buffer codec when a read would cross the end of its range.
/// This is the only error the codec itself produces; `try_read` uses it to
/// decide whether to roll back the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("buffer overflow")]
pub struct Overflow;

/// Error taxonomy for everything above the codec.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Bytes passed length checks but failed semantic validation: bad
    /// variant tag, invalid identity, oversize string. The whole packet is
    /// discarded and the connection's error counter increments.
    #[error("malformed packet: {0}")]
    Malformed(String),
    /// Socket send/recv failure. The affected connection moves to Faulted.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    /// Join attempt while the roster is full.
    #[error("server full")]
    Capacity,
    /// A connection's `tick` observed it cross into `ConnectionState::
    /// Dropped`. Raised by the session layer when it reaps a dropped
    /// peer, not by `connection.rs` itself (the state machine just
    /// transitions; the session decides this is worth surfacing as an
    /// error for logging).
    #[error("connection timed out")]
    Timeout,
    /// A fatal, unrecoverable invariant violation (pool double-free,
    /// scene-graph re-add). In debug this should have already panicked;
    /// in release it is logged and the caller should drop what it can.
    #[error("invariant violation: {0}")]
    Invariant(String),
}
