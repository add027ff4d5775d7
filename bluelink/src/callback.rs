//! Application callbacks.
//!
//! All methods have empty default implementations, so implementors only override what they
//! care about. Callbacks are invoked after the [`Link`](crate::Link) has released its state lock,
//! so it is safe to call back into the `Link` from inside them.

use crate::characteristic::Characteristic;
use crate::device::DeviceRecord;
use crate::error::Error;

/// Progress of a discovery session started with [`Link::start_scan`](crate::Link::start_scan).
#[allow(unused_variables)]
pub trait ScanCallback: Send + Sync {
    fn on_scan_start(&self) {}

    /// Called once for each newly seen device address.
    fn on_scanning(&self, device: &DeviceRecord) {}

    /// Called exactly once per started session, with every device it found.
    fn on_scan_finished(&self, devices: &[DeviceRecord]) {}

    fn on_error(&self, error: Error) {}
}

/// Progress of a connection attempt started with [`Link::connect`](crate::Link::connect).
#[allow(unused_variables)]
pub trait ConnectCallback: Send + Sync {
    fn on_connecting(&self) {}

    /// The link is up. For GATT links, service discovery has been requested.
    fn on_connected(&self) {}

    /// Services are resolved and the data channel is usable.
    fn on_ready(&self) {}

    fn on_disconnecting(&self) {}

    /// Called at most once per attempt.
    fn on_disconnected(&self) {}

    /// Connection, pairing and characteristic resolution failures.
    fn on_error(&self, error: Error) {}
}

/// Outcome of enabling notifications on the resolved characteristic.
#[allow(unused_variables)]
pub trait NotifyCallback: Send + Sync {
    fn on_notify_success(&self, characteristic: &Characteristic) {}

    fn on_notify_failure(&self, error: Error) {}
}

/// Outcome of the MTU request configured with
/// [`LinkConfigurationBuilder::mtu`](crate::LinkConfigurationBuilder::mtu).
#[allow(unused_variables)]
pub trait MtuCallback: Send + Sync {
    fn on_mtu_changed(&self, mtu: u16) {}

    fn on_mtu_failure(&self, mtu: u16, error: Error) {}
}

/// Outcome of [`Link::send`](crate::Link::send), and data received on the channel.
///
/// The callback passed to the most recent `send` also receives incoming data, unless a receive
/// callback was installed with [`SenderHandle::set_receive_callback`](crate::SenderHandle::set_receive_callback).
#[allow(unused_variables)]
pub trait SendCallback: Send + Sync {
    /// The whole payload was written.
    fn on_sent(&self, len: usize) {}

    fn on_received(&self, data: &[u8]) {}

    fn on_error(&self, error: Error) {}
}
