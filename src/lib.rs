//! # acconeer-link - host client for Acconeer A111/A121 radar sensors
//!
//! Talks to radar modules and their servers over serial, SPI and TCP links,
//! configures measurement sessions and returns decoded frames.
//!
//! ## Features
//!
//! - **Register protocol**: framed register reads/writes and streamed frames for A111 modules on UART or SPI, with resynchronisation after corrupted bytes.
//! - **JSON protocols**: the A111 legacy streaming server and the A121 exploration server, including per-version protocol variants.
//! - **One lifecycle**: every client shares the same connect / setup / start / stream / stop / disconnect state machine.
//! - **Mocks**: deterministic synthetic A111 and A121 data for tests and demos.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use acconeer_link::a121::SessionConfig;
//! use acconeer_link::client::{Client, ClientInfo, ExplorationClient};
//! use acconeer_link::link::SocketLink;
//!
//! fn main() -> Result<(), acconeer_link::error::ClientError> {
//!     let link = SocketLink::new("192.168.1.10", 6110);
//!     let mut client = Client::new(ExplorationClient::new(link), ClientInfo::socket("192.168.1.10", 6110));
//!     client.connect()?;
//!     client.setup_session(&SessionConfig::default())?;
//!     client.start_session(None)?;
//!     for _ in 0..10 {
//!         let frame = client.get_next()?;
//!         if let Some(result) = frame.single() {
//!             println!("tick {} {:?}", result.tick, result.frame.dim());
//!         }
//!     }
//!     client.disconnect()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`link`] - byte transports (socket, serial, in-memory)
//! - [`registers`] - A111 register catalog and value codec
//! - [`protocol`] - register framing, JSON protocols and version dispatch
//! - [`a111`], [`a121`] - configs, metadata and results per sensor generation
//! - [`client`] - session state machine and the concrete clients
//! - [`config`] - TOML configuration for the binary
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Client<S>      │ ← lifecycle checks
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  Session impls  │ ← UART, SPI, socket, exploration, mock
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  Protocols      │ ← register frames / JSON lines + binary payloads
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  Link           │ ← bytes
//! └─────────────────┘
//! ```

pub mod a111;
pub mod a121;
pub mod alert;
pub mod client;
pub mod config;
pub mod error;
pub mod link;
pub mod logutil;
pub mod metrics;
pub mod protocol;
pub mod record;
pub mod registers;
