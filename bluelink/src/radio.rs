//! The boundary with the platform Bluetooth driver.

use std::fmt::Display;
use std::time::Duration;

use crate::characteristic::{Characteristic, CharacteristicWriteType};
use crate::descriptor::Descriptor;
use crate::device::{BondState, DeviceRecord, LinkType};
use crate::error::Result;
use crate::service::Service;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

id_type!(
    /// Identifies one GATT connection attempt. Events carry it so late events from an
    /// abandoned attempt can be told apart from the current one.
    LinkId,
    "link"
);
id_type!(
    /// Identifies one classic connect task and, once connected, its serial stream.
    ClassicTaskId,
    "classic"
);
id_type!(
    /// Identifies one discovery session.
    ScanId,
    "scan"
);

/// Connection states reported by the radio for a GATT link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GattConnectionState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

/// A platform Bluetooth adapter.
///
/// Every operation is fire-and-forget: it returns as soon as the request is handed to the
/// platform, and the outcome is delivered later as a [`RadioEvent`] passed to
/// [`Link::handle_event`](crate::Link::handle_event). An `Err` return means the request was
/// refused before it reached the air.
///
/// The [`Link`](crate::Link) calls these methods while holding its state lock. Implementations
/// must not call back into the `Link` from inside them; events must be delivered from the
/// platform's own execution context.
#[allow(unused_variables)]
pub trait Radio: Send + Sync {
    /// Whether the host has an adapter at all.
    fn is_present(&self) -> bool;

    fn is_enabled(&self) -> bool;

    /// Turns the adapter on.
    fn enable(&self) -> Result<()>;

    fn bonded_devices(&self) -> Vec<DeviceRecord>;

    /// Looks up a device by address, with its current bond state.
    fn remote_device(&self, address: &str) -> Option<DeviceRecord>;

    /// Starts a discovery session. Results arrive as [`RadioEvent::DeviceDiscovered`] and the
    /// session ends with [`RadioEvent::ScanStopped`], either after `duration` or when the platform
    /// stops it.
    fn start_scan(&self, scan: ScanId, kind: LinkType, duration: Option<Duration>) -> Result<()>;

    fn stop_scan(&self, scan: ScanId);

    /// Starts connecting a classic serial stream. Completes with
    /// [`RadioEvent::ClassicConnectFinished`].
    fn connect_classic(&self, task: ClassicTaskId, device: &DeviceRecord) -> Result<()>;

    /// Cancels a classic connect task, or closes its stream if it already completed.
    ///
    /// Must be a no-op for tasks that have already finished or were already cancelled.
    fn cancel_classic(&self, task: ClassicTaskId);

    fn write_stream(&self, task: ClassicTaskId, data: Vec<u8>) -> Result<()>;

    /// Starts a GATT connection. Progress is reported with
    /// [`RadioEvent::ConnectionStateChanged`].
    fn connect_gatt(&self, link: LinkId, device: &DeviceRecord) -> Result<()>;

    fn disconnect_gatt(&self, link: LinkId);

    /// Releases the platform resources of a GATT link. No further events are expected for it.
    fn close_gatt(&self, link: LinkId);

    fn discover_services(&self, link: LinkId) -> Result<()>;

    /// Whether the platform can renegotiate the ATT MTU after connecting.
    fn supports_mtu_negotiation(&self) -> bool {
        true
    }

    fn request_mtu(&self, link: LinkId, mtu: u16) -> Result<()>;

    /// Enables or disables local delivery of notifications for a characteristic. This is a local
    /// operation and completes synchronously.
    fn set_characteristic_notification(
        &self,
        link: LinkId,
        characteristic: &Characteristic,
        enabled: bool,
    ) -> Result<()>;

    fn write_descriptor(&self, link: LinkId, descriptor: &Descriptor, value: Vec<u8>)
    -> Result<()>;

    fn write_characteristic(
        &self,
        link: LinkId,
        characteristic: &Characteristic,
        value: Vec<u8>,
        write_type: CharacteristicWriteType,
    ) -> Result<()>;

    /// Starts observing pairing requests for `address`. Requests arrive as
    /// [`RadioEvent::PairingRequested`].
    fn register_pairing_observer(&self, address: &str);

    fn unregister_pairing_observer(&self, address: &str);

    /// Answers a pairing request with a fixed PIN and confirms it.
    fn attempt_auto_pair(&self, address: &str, pin: &str) -> Result<()>;
}

/// Asynchronous completions and unsolicited events from the radio.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    DeviceDiscovered {
        scan: ScanId,
        device: DeviceRecord,
    },
    ScanStopped {
        scan: ScanId,
    },
    PairingRequested {
        address: String,
    },
    BondStateChanged {
        address: String,
        state: BondState,
    },
    ClassicConnectFinished {
        task: ClassicTaskId,
        result: Result<()>,
    },
    StreamReceived {
        task: ClassicTaskId,
        value: Vec<u8>,
    },
    StreamClosed {
        task: ClassicTaskId,
    },
    ConnectionStateChanged {
        link: LinkId,
        state: GattConnectionState,
        result: Result<()>,
    },
    ServicesDiscovered {
        link: LinkId,
        result: Result<Vec<Service>>,
    },
    MtuChanged {
        link: LinkId,
        mtu: u16,
        result: Result<()>,
    },
    DescriptorWritten {
        link: LinkId,
        descriptor: u16,
        result: Result<()>,
    },
    CharacteristicWritten {
        link: LinkId,
        characteristic: u16,
        result: Result<()>,
    },
    StreamWritten {
        task: ClassicTaskId,
        result: Result<()>,
    },
    CharacteristicChanged {
        link: LinkId,
        characteristic: u16,
        value: Vec<u8>,
    },
}

impl RadioEvent {
    /// Shorthand for a successful connection state change.
    pub fn connection_state(link: LinkId, state: GattConnectionState) -> Self {
        RadioEvent::ConnectionStateChanged {
            link,
            state,
            result: Ok(()),
        }
    }
}
