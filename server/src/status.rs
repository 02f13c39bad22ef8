//! Live identity of the running game server
//!
//! Shared between the network loop, which updates the connection count, and
//! the registration scheduler, which reads a snapshot each time it registers.

use crate::registration::ServerIdentity;
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicU16, Ordering};

#[derive(Debug)]
pub struct HostStatus {
    unique_id: u64,
    name: String,
    connections: AtomicU16,
    max_connections: u16,
    public_endpoint: SocketAddrV4,
}

impl HostStatus {
    /// Creates the status with a random instance identifier
    pub fn new(
        name: impl Into<String>,
        max_connections: u16,
        public_endpoint: SocketAddrV4,
    ) -> Self {
        Self::with_id(rand::random(), name, max_connections, public_endpoint)
    }

    pub fn with_id(
        unique_id: u64,
        name: impl Into<String>,
        max_connections: u16,
        public_endpoint: SocketAddrV4,
    ) -> Self {
        Self {
            unique_id,
            name: name.into(),
            connections: AtomicU16::new(0),
            max_connections,
            public_endpoint,
        }
    }

    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }

    pub fn max_connections(&self) -> u16 {
        self.max_connections
    }

    /// Records the current number of connected clients, saturating at the
    /// widest value the registration format carries
    pub fn set_connections(&self, count: usize) {
        let count = u16::try_from(count).unwrap_or(u16::MAX);
        self.connections.store(count, Ordering::Relaxed);
    }

    pub fn connections(&self) -> u16 {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn identity(&self) -> ServerIdentity {
        ServerIdentity {
            unique_id: self.unique_id,
            name: self.name.clone(),
            current_connections: self.connections(),
            max_connections: self.max_connections,
            public_endpoint: self.public_endpoint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn endpoint() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, 14242)
    }

    #[test]
    fn test_identity_snapshot() {
        let status = HostStatus::with_id(42, "Arena-1", 32, endpoint());
        status.set_connections(3);

        let identity = status.identity();
        assert_eq!(identity.unique_id, 42);
        assert_eq!(identity.name, "Arena-1");
        assert_eq!(identity.current_connections, 3);
        assert_eq!(identity.max_connections, 32);
        assert_eq!(identity.public_endpoint, endpoint());
    }

    #[test]
    fn test_snapshot_follows_updates() {
        let status = HostStatus::with_id(1, "a", 32, endpoint());
        let before = status.identity();
        status.set_connections(5);

        assert_eq!(before.current_connections, 0);
        assert_eq!(status.identity().current_connections, 5);
    }

    #[test]
    fn test_connection_count_saturates() {
        let status = HostStatus::with_id(1, "a", 32, endpoint());
        status.set_connections(100_000);
        assert_eq!(status.connections(), u16::MAX);
    }

    #[test]
    fn test_random_ids_differ() {
        let a = HostStatus::new("a", 32, endpoint());
        let b = HostStatus::new("b", 32, endpoint());
        assert_ne!(a.unique_id(), b.unique_id());
    }
}
