//! Wire protocol for the Celestron Origin control channel.
//!
//! The Origin speaks flat JSON objects over a persistent WebSocket. Every
//! message carries routing metadata (`Source`, `Destination`, `Command`,
//! `Type`, `SequenceID`) alongside verb-specific parameters. This crate
//! models that envelope, classifies the asynchronous notifications the
//! telescope emits, and provides the angular unit conversions between the
//! wire representation (radians) and conventional equatorial units
//! (RA hours, Dec degrees).
//!
//! Transport, session state, and exposure handling live in the
//! `origin-backend` crate; this crate is pure data.

pub mod angle;
pub mod command;
pub mod message;
pub mod notify;

pub use angle::{degrees_to_radians, hours_to_radians, radians_to_degrees, radians_to_hours};
pub use command::OutboundCommand;
pub use message::{MessageKind, ProtocolError, WireMessage};
pub use notify::ImageNotification;
