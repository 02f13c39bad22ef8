//! Server network layer handling UDP sessions and the registration heartbeat

use crate::client_manager::ClientManager;
use crate::clock::SessionClock;
use crate::registration::{RegistrationConfig, RegistrationScheduler, ServerIdentity};
use crate::status::HostStatus;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, CLIENT_TIMEOUT_SECS, MAX_CONNECTIONS, PROTOCOL_VERSION};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

/// Identity accessor handed to the registration scheduler
pub type IdentityFn = Box<dyn Fn() -> ServerIdentity + Send + Sync>;

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: u32 },
    Shutdown,
}

/// Messages sent from the main loop to the sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
    /// Raw datagram outside any client session, e.g. a master registration
    SendUnconnected { data: Vec<u8>, addr: SocketAddr },
}

/// Game server accepting client sessions and registering with the master
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    status: Arc<HostStatus>,
    registration: Option<RegistrationScheduler<IdentityFn>>,
    clock: SessionClock,
    tick_duration: Duration,
    tick: u64,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    /// Binds the game socket and, when `registration` is given, resolves the
    /// master server
    ///
    /// A master server that cannot be resolved disables the heartbeat instead
    /// of failing startup.
    pub async fn new(
        addr: &str,
        tick_duration: Duration,
        name: &str,
        registration: Option<RegistrationConfig>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let local_addr = socket.local_addr()?;
        info!("Server listening on {}", local_addr);

        let public_endpoint = match local_addr {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(v6) => SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, v6.port()),
        };
        let status = Arc::new(HostStatus::new(name, MAX_CONNECTIONS, public_endpoint));
        info!("Server '{}' has instance id {:016x}", name, status.unique_id());

        let registration = registration.and_then(|config| {
            let identity: IdentityFn = {
                let status = Arc::clone(&status);
                Box::new(move || status.identity())
            };

            // One-time name lookup; blocking here is accepted at startup
            match RegistrationScheduler::connect(&config, identity) {
                Ok(scheduler) => Some(scheduler),
                Err(e) => {
                    warn!("Master server registration disabled: {}", e);
                    None
                }
            }
        });

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(
                MAX_CONNECTIONS as usize,
                Duration::from_secs(CLIENT_TIMEOUT_SECS),
            ))),
            status,
            registration,
            clock: SessionClock::new(),
            tick_duration,
            tick: 0,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn status(&self) -> Arc<HostStatus> {
        Arc::clone(&self.status)
    }

    /// True when a master server was resolved and heartbeats will be sent
    pub fn is_registering(&self) -> bool {
        self.registration.is_some()
    }

    /// Sender that can stop [`Server::run`] with [`ServerMessage::Shutdown`]
    pub fn shutdown_sender(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        // An unreachable master shows up here as ICMP errors on some platforms
                        debug!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::SendUnconnected { data, addr } => {
                        if let Err(e) = socket.send_to(&data, addr).await {
                            error!("Failed to send unconnected message to {}: {}", addr, e);
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    /// Publishes the current client count to the registration identity
    async fn refresh_connection_count(&self) {
        let count = self.clients.read().await.len();
        self.status.set_connections(count);
    }

    /// Processes incoming session packets
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { client_version } => {
                info!(
                    "Client connecting from {} (version: {})",
                    addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    let response = Packet::Disconnected {
                        reason: "Protocol version mismatch".to_string(),
                    };
                    self.send_packet(response, addr);
                    return;
                }

                let client_id = {
                    let mut clients = self.clients.write().await;

                    // Remove existing connection if present
                    if let Some(existing_id) = clients.find_client_by_addr(addr) {
                        info!("Removing existing client {} from {}", existing_id, addr);
                        clients.remove_client(&existing_id);
                    }

                    clients.add_client(addr)
                };

                let response = match client_id {
                    Some(client_id) => Packet::Connected { client_id },
                    None => Packet::Disconnected {
                        reason: "Server full".to_string(),
                    },
                };
                self.send_packet(response, addr);
                self.refresh_connection_count().await;
            }

            Packet::KeepAlive => {
                let known = self.clients.write().await.touch_client(addr);
                if !known {
                    debug!("Keep-alive from unknown address {}", addr);
                }
            }

            Packet::Disconnect => {
                let removed = {
                    let mut clients = self.clients.write().await;
                    match clients.find_client_by_addr(addr) {
                        Some(client_id) => clients.remove_client(&client_id),
                        None => false,
                    }
                };

                if removed {
                    self.refresh_connection_count().await;
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Queues a master registration if one is due at the current session time
    fn update_registration(&mut self) {
        let Some(scheduler) = self.registration.as_mut() else {
            return;
        };

        if let Some(message) = scheduler.tick(self.clock.now()) {
            let addr = scheduler.master_endpoint();
            let data = message.into_bytes();
            if let Err(e) = self.game_tx.send(GameMessage::SendUnconnected { data, addr }) {
                error!("Failed to queue registration: {}", e);
            }
        }
    }

    /// Tells every connected client the server is going away
    async fn disconnect_all(&self, reason: &str) {
        let client_addrs = self.clients.read().await.get_client_addrs();
        let packet = Packet::Disconnected {
            reason: reason.to_string(),
        };

        for (client_id, addr) in client_addrs {
            if let Err(e) = Self::send_packet_impl(&self.socket, &packet, addr).await {
                error!("Failed to send to client {}: {}", client_id, e);
            }
        }
    }

    /// Main server loop
    ///
    /// Runs until a [`ServerMessage::Shutdown`] arrives. Every tick drives the
    /// registration scheduler; registrations go out through the sender task
    /// without waiting for any reply.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut tick_interval = interval(self.tick_duration);

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            info!("Client {} timed out", client_id);
                            self.refresh_connection_count().await;
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            self.disconnect_all("Server shutting down").await;
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    self.tick += 1;
                    self.update_registration();

                    // Periodic status monitoring
                    if self.tick % 600 == 0 {
                        debug!(
                            "Tick {}: {}/{} clients",
                            self.tick,
                            self.status.connections(),
                            self.status.max_connections()
                        );
                    }
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::RegisterHost;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio_test::assert_ok;

    async fn test_server(name: &str, registration: Option<RegistrationConfig>) -> Server {
        assert_ok!(Server::new("127.0.0.1:0", Duration::from_millis(16), name, registration).await)
    }

    #[test]
    fn test_server_message_creation() {
        let packet = Packet::Connect { client_version: 1 };
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080);

        let msg = ServerMessage::PacketReceived {
            packet: packet.clone(),
            addr,
        };

        match msg {
            ServerMessage::PacketReceived { packet: p, addr: a } => {
                assert_eq!(a, addr);
                assert_eq!(p, packet);
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[test]
    fn test_channel_communication() {
        let (tx, mut rx) = mpsc::unbounded_channel::<GameMessage>();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 15002);

        assert!(tx
            .send(GameMessage::SendUnconnected {
                data: vec![0, 1, 2],
                addr,
            })
            .is_ok());

        match rx.try_recv().unwrap() {
            GameMessage::SendUnconnected { data, addr: a } => {
                assert_eq!(data, vec![0, 1, 2]);
                assert_eq!(a, addr);
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[tokio::test]
    async fn test_server_without_registration() {
        let server = test_server("Solo", None).await;

        assert!(!server.is_registering());
        assert_eq!(server.status().connections(), 0);
        assert_eq!(server.status().max_connections(), MAX_CONNECTIONS);
    }

    #[tokio::test]
    async fn test_unresolvable_master_disables_registration() {
        let config = RegistrationConfig {
            master_host: "no such host.invalid".to_string(),
            ..RegistrationConfig::default()
        };
        let server = test_server("Lost", Some(config)).await;

        assert!(!server.is_registering());
    }

    #[tokio::test]
    async fn test_first_tick_queues_registration() {
        let config = RegistrationConfig {
            master_host: "127.0.0.1".to_string(),
            master_port: 15002,
            discover_address: false,
            ..RegistrationConfig::default()
        };
        let mut server = test_server("Arena-1", Some(config)).await;
        assert!(server.is_registering());

        server.update_registration();
        server.update_registration();

        match server.game_rx.try_recv().unwrap() {
            GameMessage::SendUnconnected { data, addr } => {
                assert_eq!(addr, "127.0.0.1:15002".parse().unwrap());
                let host = RegisterHost::decode(&data).unwrap();
                assert_eq!(host.name, "Arena-1");
                assert_eq!(host.current_connections, 0);
                assert_eq!(host.max_connections, 32);
                assert_eq!(host.public_endpoint.port(), 14242);
                assert_eq!(host.unique_id, server.status().unique_id());
            }
            _ => panic!("Unexpected message type"),
        }

        // Second call in the same interval is not due
        assert!(server.game_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_updates_advertised_count() {
        let mut server = test_server("Arena-1", None).await;
        let client: SocketAddr = "127.0.0.1:40000".parse().unwrap();

        let connect = Packet::Connect {
            client_version: PROTOCOL_VERSION,
        };
        server.handle_packet(connect, client).await;
        assert_eq!(server.status().connections(), 1);
        assert_eq!(server.status().identity().current_connections, 1);

        match server.game_rx.try_recv().unwrap() {
            GameMessage::SendPacket { packet, addr } => {
                assert_eq!(addr, client);
                assert_eq!(packet, Packet::Connected { client_id: 1 });
            }
            _ => panic!("Unexpected message type"),
        }

        server.handle_packet(Packet::Disconnect, client).await;
        assert_eq!(server.status().connections(), 0);
    }

    #[tokio::test]
    async fn test_version_mismatch_is_rejected() {
        let mut server = test_server("Arena-1", None).await;
        let client: SocketAddr = "127.0.0.1:40001".parse().unwrap();

        server
            .handle_packet(Packet::Connect { client_version: 99 }, client)
            .await;

        assert_eq!(server.status().connections(), 0);
        match server.game_rx.try_recv().unwrap() {
            GameMessage::SendPacket { packet, .. } => {
                assert_eq!(
                    packet,
                    Packet::Disconnected {
                        reason: "Protocol version mismatch".to_string()
                    }
                );
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[tokio::test]
    async fn test_reconnect_from_same_address_keeps_one_session() {
        let mut server = test_server("Arena-1", None).await;
        let client: SocketAddr = "127.0.0.1:40002".parse().unwrap();
        let connect = Packet::Connect {
            client_version: PROTOCOL_VERSION,
        };

        server.handle_packet(connect.clone(), client).await;
        server.handle_packet(connect, client).await;

        assert_eq!(server.status().connections(), 1);
    }
}
