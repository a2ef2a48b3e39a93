//! # Wire protocols
//!
//! - [`frame`] - binary register protocol framing, used over UART and SPI
//! - [`json`] - newline-delimited JSON commands with raw binary payloads
//! - [`legacy`] - A111 streaming server messages on top of [`json`]
//! - [`exploration`] - A121 exploration server messages on top of [`json`]
//! - [`version`] - server version parsing and protocol variant selection

pub mod exploration;
pub mod frame;
pub mod json;
pub mod legacy;
pub mod version;

pub use frame::{insert_packet_into_frame, FrameReader, Packet, RegisterProtocol};
pub use json::{decode_stream_payload, ByteOrder, DecodeParams, JsonChannel, Status};
pub use version::{ExplorationVariant, ProtocolFeatures, Version};
