// arena-common — shared substrate for the authoritative server and the
// client mirror: serialization, pooling, identity, the scene graph,
// entity/behavior model, collision, the wire protocol, packet framing,
// and the ambient config/clock facades both binaries depend on.

pub mod assets;
pub mod behavior;
pub mod channel;
pub mod clock;
pub mod codec;
pub mod collision;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod entity;
pub mod error;
pub mod identity;
pub mod math;
pub mod message;
pub mod net;
pub mod pool;
pub mod protocol;
pub mod scene;
