//! Network transport for frame ingest and upstream device calls.
//!
//! The gateway talks to the device over two transports:
//!
//! - **UDP** ([`udp`]): inbound frames, one JPEG per datagram, written into
//!   the shared register by a single long-lived task.
//!
//! - **HTTP** ([`upstream`]): outbound request/response relays for status,
//!   telemetry, control and OTA, plus a pass-through for devices that
//!   already serve a multipart feed.
//!
//! Device protocols such as MQTT, Modbus or S7 are only acknowledged as
//! configured port numbers; no transport is provided for them.

pub mod udp;
pub mod upstream;

pub use udp::UdpFrameSource;
pub use upstream::{RelayedResponse, UpstreamClient};
