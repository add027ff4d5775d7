//! Lifecycle management for a single Bluetooth link.
//!
//! A [`Link`] drives discovery, connection (classic pairing or a GATT handshake), service and
//! characteristic resolution, MTU negotiation, and a chunked, serialized data channel on top of
//! a platform driver that implements [`Radio`].
//!
//! The driver is fire-and-forget: requests return immediately and their outcomes come back as
//! [`RadioEvent`]s, which the platform glue hands to [`Link::handle_event`]. Outcomes the
//! application cares about are reported through the callback traits in [`callback`].
//!
//! The [`mock`] module contains a recording radio for tests and for trying the API without
//! hardware. See the `examples` directory for a complete session.

pub mod callback;
mod characteristic;
mod config;
mod connector;
mod descriptor;
mod device;
pub mod error;
mod link;
pub mod mock;
mod radio;
mod scanner;
mod sender;
mod service;
pub mod uuids;

pub use callback::*;
pub use characteristic::*;
pub use config::*;
pub use connector::{AUTO_PAIR_PIN, ConnectionState, Transport, resolve_write_characteristic};
pub use descriptor::*;
pub use device::*;
pub use error::{AttError, Error, ErrorKind, Result};
pub use link::{ConnectorHandle, Link, ScannerHandle, SenderHandle};
pub use radio::*;
pub use sender::ChannelTarget;
pub use service::*;
pub use uuids::BluetoothUuid;
