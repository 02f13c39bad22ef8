//! # Game Server Library
//!
//! This library provides a UDP game server that keeps itself listed with a
//! master (discovery) server. Clients ask the master for active servers; each
//! server keeps its entry fresh by re-sending a registration heartbeat.
//!
//! ## Heartbeat Protocol
//!
//! Once per registration interval (60 seconds of session time) the server
//! sends one `RegisterHost` datagram to the master server carrying its
//! instance id, display name, current and maximum connection counts, and the
//! endpoint clients should connect to. The first registration goes out on the
//! first tick after startup.
//!
//! Delivery is fire and forget. Nothing is acknowledged and nothing is
//! retried; a lost datagram is covered by the next heartbeat. The master
//! endpoint is resolved once at startup.
//!
//! ## Module Organization
//!
//! ### Registration Module (`registration`)
//! - Scheduling of registrations against the session clock
//! - Encoding identity snapshots into the master wire format
//! - Master endpoint resolution and local address discovery
//!
//! ### Client Manager Module (`client_manager`)
//! - Connection tracking and client ID assignment
//! - Keep-alive refresh and timeout cleanup
//!
//! ### Network Module (`network`)
//! - UDP socket management and session packet processing
//! - The tick loop that drives the registration heartbeat
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use server::registration::RegistrationConfig;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(
//!         "0.0.0.0:14242",
//!         Duration::from_millis(33),
//!         "Arena-1",
//!         Some(RegistrationConfig::default()),
//!     )
//!     .await?;
//!
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod clock;
pub mod network;
pub mod registration;
pub mod status;
