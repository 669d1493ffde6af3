//! Beacon scanner library: the portable half of the firmware.
//!
//! Listens to BLE advertisements, keeps only the iBeacon-shaped ones and
//! republishes them as hex lines over a serial link, with every 256th match
//! also pushed through a Sigfox modem on the same link. Everything here is
//! free of platform dependencies and testable on any host with `cargo test`;
//! the ESP32 binary in `main.rs` only provides the radio, the UART and the
//! flash-busy signal.
//!
//! - `serial`: hex/text emitter over a byte sink, banner, receive echo
//! - `beacon`: payload buffer, match predicate, forwarder
//! - `uplink`: sampled Sigfox forwarding
//! - `scheduler`: scan start/defer state machine
//! - `board`, `error`: compile-time board constants and fatal error kinds

#![cfg_attr(not(test), no_std)]

pub mod beacon;
pub mod board;
pub mod error;
pub mod scheduler;
pub mod serial;
pub mod uplink;

pub use error::Error;
