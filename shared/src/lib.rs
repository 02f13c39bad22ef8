//! Types shared between the game server, its clients and the master server probe
//!
//! Session traffic between game clients and the game server is serialized with
//! bincode. Traffic to the master server uses the fixed byte layout in [`master`].

pub mod master;

use serde::{Deserialize, Serialize};

pub use master::{
    EncodedMessage, MasterMessageType, RegisterHost, WireError, DEFAULT_MASTER_HOST,
    GAME_SERVER_PORT, MASTER_SERVER_PORT, MAX_CONNECTIONS, REGISTRATION_INTERVAL_SECS,
};

/// Session protocol version spoken by this build
pub const PROTOCOL_VERSION: u32 = 1;
/// Seconds of silence after which the game server drops a client
pub const CLIENT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    KeepAlive,
    Disconnect,

    Connected {
        client_id: u32,
    },
    Disconnected {
        reason: String,
    },
}
