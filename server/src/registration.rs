//! Periodic self-registration with the master server
//!
//! The game server advertises itself by sending a `RegisterHost` datagram to
//! the master server once per registration interval. Delivery is fire and
//! forget: the scheduler records the attempt as soon as it hands out a
//! message, so a failing transport just means the next attempt happens one
//! interval later.
//!
//! The pieces:
//! - [`RegistrationScheduler`] decides when a registration is due
//! - [`RegistrationMessageBuilder`] turns a [`ServerIdentity`] into wire bytes
//! - [`resolve_master`] looks up the master endpoint once at startup
//! - [`AddressDiscovery`] supplies the address advertised to clients

use log::{debug, info};
use shared::{
    EncodedMessage, RegisterHost, DEFAULT_MASTER_HOST, GAME_SERVER_PORT, MASTER_SERVER_PORT,
    REGISTRATION_INTERVAL_SECS,
};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket};
use thiserror::Error;

/// Errors raised while setting up registration
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("failed to resolve master server {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("master server {host}:{port} resolved to no addresses")]
    NoAddress { host: String, port: u16 },
}

/// Snapshot of what the game server advertises about itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    pub unique_id: u64,
    pub name: String,
    pub current_connections: u16,
    pub max_connections: u16,
    pub public_endpoint: SocketAddrV4,
}

/// Yields a fresh identity snapshot every time a registration is built
pub trait IdentitySource {
    fn snapshot(&self) -> ServerIdentity;
}

impl<F> IdentitySource for F
where
    F: Fn() -> ServerIdentity,
{
    fn snapshot(&self) -> ServerIdentity {
        self()
    }
}

/// Finds the local address clients should be told to connect to
pub trait AddressDiscovery {
    fn local_ipv4(&self) -> Option<Ipv4Addr>;
}

/// Asks the OS which interface would route towards a public address
///
/// Connecting a UDP socket only selects a route, nothing is transmitted.
#[derive(Debug, Clone, Copy)]
pub struct RouteDiscovery {
    probe: SocketAddr,
}

impl RouteDiscovery {
    pub fn new(probe: SocketAddr) -> Self {
        Self { probe }
    }
}

impl Default for RouteDiscovery {
    fn default() -> Self {
        Self::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 53))
    }
}

impl AddressDiscovery for RouteDiscovery {
    fn local_ipv4(&self) -> Option<Ipv4Addr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
        socket.connect(self.probe).ok()?;
        match socket.local_addr().ok()?.ip() {
            IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
            _ => None,
        }
    }
}

/// Always reports the same address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedAddress(pub Ipv4Addr);

impl AddressDiscovery for FixedAddress {
    fn local_ipv4(&self) -> Option<Ipv4Addr> {
        Some(self.0)
    }
}

/// Builds `RegisterHost` datagrams from identity snapshots
pub struct RegistrationMessageBuilder {
    advertised_port: u16,
    discovery: Box<dyn AddressDiscovery + Send + Sync>,
}

impl RegistrationMessageBuilder {
    pub fn new(
        advertised_port: u16,
        discovery: impl AddressDiscovery + Send + Sync + 'static,
    ) -> Self {
        Self {
            advertised_port,
            discovery: Box::new(discovery),
        }
    }

    /// Encodes `identity`, replacing its public endpoint with the discovered
    /// local address and the advertised port
    ///
    /// Falls back to the identity's own address when discovery finds nothing.
    pub fn encode(&self, identity: &ServerIdentity) -> EncodedMessage {
        let ip = self.discovery.local_ipv4().unwrap_or_else(|| {
            debug!(
                "Local address discovery failed, advertising {}",
                identity.public_endpoint.ip()
            );
            *identity.public_endpoint.ip()
        });

        RegisterHost {
            unique_id: identity.unique_id,
            name: identity.name.clone(),
            current_connections: identity.current_connections,
            max_connections: identity.max_connections,
            public_endpoint: SocketAddrV4::new(ip, self.advertised_port),
        }
        .encode()
    }
}

/// Where and how often to register
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationConfig {
    pub master_host: String,
    pub master_port: u16,
    /// Seconds between registrations
    pub interval: f64,
    /// Port placed in the advertised endpoint
    pub advertised_port: u16,
    /// Use route discovery for the advertised address instead of the
    /// identity's own public address
    pub discover_address: bool,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            master_host: DEFAULT_MASTER_HOST.to_string(),
            master_port: MASTER_SERVER_PORT,
            interval: REGISTRATION_INTERVAL_SECS,
            advertised_port: GAME_SERVER_PORT,
            discover_address: true,
        }
    }
}

/// Resolves the master server, preferring an IPv4 address
///
/// May block on a name lookup, call it once at startup.
pub fn resolve_master(host: &str, port: u16) -> Result<SocketAddr, RegistrationError> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|source| RegistrationError::Resolve {
            host: host.to_string(),
            port,
            source,
        })?
        .collect();

    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| RegistrationError::NoAddress {
            host: host.to_string(),
            port,
        })
}

/// Mutable state of the scheduler
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegistrationState {
    /// `None` until the first registration, which makes the first tick due at
    /// any session time
    last_registered_at: Option<f64>,
    master_endpoint: SocketAddr,
}

impl RegistrationState {
    pub fn new(master_endpoint: SocketAddr) -> Self {
        Self {
            last_registered_at: None,
            master_endpoint,
        }
    }

    fn is_due(&self, now: f64, interval: f64) -> bool {
        match self.last_registered_at {
            None => true,
            Some(last) => now > last + interval,
        }
    }
}

/// Decides when the game server re-registers with the master
///
/// `tick` must be driven from a single task; it takes `&mut self`.
pub struct RegistrationScheduler<I> {
    state: RegistrationState,
    interval: f64,
    builder: RegistrationMessageBuilder,
    identity: I,
}

impl<I: IdentitySource> RegistrationScheduler<I> {
    pub fn new(
        master_endpoint: SocketAddr,
        interval: f64,
        builder: RegistrationMessageBuilder,
        identity: I,
    ) -> Self {
        Self {
            state: RegistrationState::new(master_endpoint),
            interval,
            builder,
            identity,
        }
    }

    /// Resolves the master server from `config` and builds a scheduler for it
    pub fn connect(config: &RegistrationConfig, identity: I) -> Result<Self, RegistrationError> {
        let master_endpoint = resolve_master(&config.master_host, config.master_port)?;
        info!(
            "Master server {}:{} resolved to {}",
            config.master_host, config.master_port, master_endpoint
        );

        let builder = if config.discover_address {
            RegistrationMessageBuilder::new(config.advertised_port, RouteDiscovery::default())
        } else {
            let own = identity.snapshot().public_endpoint;
            info!("Address discovery disabled, advertising {}", own.ip());
            RegistrationMessageBuilder::new(config.advertised_port, FixedAddress(*own.ip()))
        };

        Ok(Self::new(master_endpoint, config.interval, builder, identity))
    }

    /// Returns a registration to send if one is due at `now` (session seconds)
    ///
    /// A due tick records `now` as the last registration whether or not the
    /// caller's send later succeeds.
    pub fn tick(&mut self, now: f64) -> Option<EncodedMessage> {
        if !self.state.is_due(now, self.interval) {
            return None;
        }

        let identity = self.identity.snapshot();
        let message = self.builder.encode(&identity);

        info!("Sending registration to master server");
        debug!(
            "Registering '{}' ({}/{} connections) with {}",
            identity.name,
            identity.current_connections,
            identity.max_connections,
            self.state.master_endpoint
        );

        self.state.last_registered_at = Some(now);
        Some(message)
    }

    pub fn master_endpoint(&self) -> SocketAddr {
        self.state.master_endpoint
    }

    pub fn last_registered_at(&self) -> Option<f64> {
        self.state.last_registered_at
    }
}
