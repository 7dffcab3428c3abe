//! Rust library for controlling Denon and Marantz HEOS devices
//!
//! This library provides an async client for the HEOS control protocol, the
//! line-delimited JSON protocol HEOS devices speak on TCP port 1255. It
//! supports:
//!
//! - One persistent connection per device with automatic re-registration for
//!   change events
//! - Serialized command dispatch with per-command timeouts
//! - Unsolicited device event subscriptions
//! - A watchdog that reconnects after network interruptions
//! - Player, group and browse commands
//! - Power and input control over the plain-text telnet channel
//!
//! # Quick Start
//!
//! ```no_run
//! use denon_heos::{HeosClient, HeosEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = HeosClient::new("192.168.1.100");
//!     let mut events = client.subscribe();
//!     client.connect().await?;
//!
//!     let players = client.players().await?;
//!     if let Some(player) = players.first() {
//!         println!("Found player: {}", player.name());
//!         player.set_volume(20).await?;
//!         player.set_mute(false).await?;
//!     }
//!
//!     // Watch connection changes and device events
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             HeosEvent::Device(event) => println!("Device event: {}", event.name),
//!             other => println!("Event: {:?}", other),
//!         }
//!     }
//!
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Raw Commands
//!
//! Any command path can be sent directly:
//!
//! ```no_run
//! use denon_heos::HeosClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = HeosClient::connect_to("192.168.1.100").await?;
//!     let reply = client.submit("player/get_volume", &[("pid", "-1467431")]).await?;
//!     println!("level = {}", reply.field("level")?);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **Client**: Public facade over the connection and the telnet channel
//! - **Player**: High-level control API for a single player
//! - **Connection**: Lifecycle state machine, socket ownership and watchdog
//! - **Dispatcher**: Command queue with one request in flight
//! - **Protocol**: Request encoding and response classification
//! - **Codec**: Delimiter framing of the byte stream
//! - **Types**: Domain types and payload structures

mod client;
mod codec;
mod config;
mod connection;
mod demux;
mod dispatcher;
mod error;
mod player;
pub mod protocol;
mod subscription;
mod telnet;
mod types;
mod watchdog;

// Public exports
pub use client::HeosClient;
pub use codec::{split_frames, FrameDecoder, CR, CRLF};
pub use config::{HeosConfig, DEFAULT_PORT, DEFAULT_TELNET_PORT};
pub use error::{HeosError, Result};
pub use player::Player;
pub use protocol::{classify, DeviceEvent, EventKind, ParsedMessage, Reply, Request};
pub use subscription::{DeviceEventReceiver, EventReceiver, HeosEvent};
pub use telnet::{TelnetClient, OPTIMISTIC_ACK};
pub use types::{
    ConnectionState, DiscoveredDevice, GroupId, GroupInfo, GroupMember, GroupRole, MusicSource,
    NowPlayingMedia, PlayMode, PlayState, PlayerId, PlayerInfo, PowerState, QueueItem, RepeatMode,
    SourceId, UnknownValue,
};
