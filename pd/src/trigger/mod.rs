//! Trigger sources
//!
//! Each trigger source decodes one stimulus channel into an [`Event`] and
//! hands it to the arbitration engine. Three sources exist: bus frames
//! ([`bus::BusTrigger`]), short text commands ([`text::TextTrigger`]), and
//! the Unix socket ([`socket::SocketServer`], which also carries the bus
//! and text payloads on the wire). The engine is agnostic to all of them.
//!
//! [`Event`]: crate::domain::Event

pub mod bus;
pub mod socket;
pub mod text;

pub use bus::BusTrigger;
pub use socket::SocketServer;
pub use text::TextTrigger;
