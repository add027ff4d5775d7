use std::sync::Arc;

use tracing::warn;

use crate::callback::MtuCallback;
use crate::error::{Error, ErrorKind, Result};
use crate::uuids::{self, BluetoothUuid, DEFAULT_WRITE_CHARACTERISTIC};

/// The ATT MTU every link starts with.
pub const DEFAULT_MTU: u16 = 23;
/// The largest MTU that can be requested.
pub const MAX_MTU: u16 = 511;

/// Negotiation parameters for one connection attempt.
///
/// Built with [`LinkConfiguration::builder`] and read-only afterwards.
#[derive(Clone, Default)]
pub struct LinkConfiguration {
    service_uuid: Option<BluetoothUuid>,
    write_characteristic_uuid: Option<BluetoothUuid>,
    notify_characteristic_uuid: Option<BluetoothUuid>,
    use_descriptor_for_notify: bool,
    mtu: Option<u16>,
    mtu_callback: Option<Arc<dyn MtuCallback>>,
}

impl std::fmt::Debug for LinkConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkConfiguration")
            .field("service_uuid", &self.service_uuid)
            .field("write_characteristic_uuid", &self.write_characteristic_uuid)
            .field("notify_characteristic_uuid", &self.notify_characteristic_uuid)
            .field("use_descriptor_for_notify", &self.use_descriptor_for_notify)
            .field("mtu", &self.mtu)
            .field("mtu_callback", &self.mtu_callback.is_some())
            .finish()
    }
}

impl LinkConfiguration {
    pub fn builder() -> LinkConfigurationBuilder {
        LinkConfigurationBuilder::default()
    }

    pub fn service_uuid(&self) -> Option<BluetoothUuid> {
        self.service_uuid
    }

    /// The configured write characteristic, or [`DEFAULT_WRITE_CHARACTERISTIC`].
    pub fn write_characteristic_uuid(&self) -> BluetoothUuid {
        self.write_characteristic_uuid
            .unwrap_or(DEFAULT_WRITE_CHARACTERISTIC)
    }

    pub fn notify_characteristic_uuid(&self) -> Option<BluetoothUuid> {
        self.notify_characteristic_uuid
    }

    pub fn use_descriptor_for_notify(&self) -> bool {
        self.use_descriptor_for_notify
    }

    /// The configured MTU. Always within `DEFAULT_MTU..=MAX_MTU`.
    pub fn mtu(&self) -> Option<u16> {
        self.mtu
    }

    /// The MTU worth sending to the radio. The default MTU is never renegotiated.
    pub fn mtu_request(&self) -> Option<u16> {
        self.mtu.filter(|mtu| (DEFAULT_MTU + 1..=MAX_MTU).contains(mtu))
    }

    pub fn mtu_callback(&self) -> Option<&Arc<dyn MtuCallback>> {
        self.mtu_callback.as_ref()
    }
}

#[derive(Default)]
pub struct LinkConfigurationBuilder {
    config: LinkConfiguration,
}

impl LinkConfigurationBuilder {
    /// Restricts characteristic resolution to one service.
    pub fn service_uuid(mut self, uuid: BluetoothUuid) -> Self {
        self.config.service_uuid = Some(uuid);
        self
    }

    pub fn try_service_uuid(self, uuid: &str) -> Result<Self> {
        Ok(self.service_uuid(uuids::parse(uuid)?))
    }

    pub fn write_characteristic_uuid(mut self, uuid: BluetoothUuid) -> Self {
        self.config.write_characteristic_uuid = Some(uuid);
        self
    }

    pub fn try_write_characteristic_uuid(self, uuid: &str) -> Result<Self> {
        Ok(self.write_characteristic_uuid(uuids::parse(uuid)?))
    }

    /// The characteristic to enable notifications on. Defaults to the write characteristic.
    pub fn notify_characteristic_uuid(mut self, uuid: BluetoothUuid) -> Self {
        self.config.notify_characteristic_uuid = Some(uuid);
        self
    }

    pub fn try_notify_characteristic_uuid(self, uuid: &str) -> Result<Self> {
        Ok(self.notify_characteristic_uuid(uuids::parse(uuid)?))
    }

    /// Also write the client characteristic configuration descriptor when enabling
    /// notifications. Some peripherals only start notifying once it is written.
    pub fn use_descriptor_for_notify(mut self, enabled: bool) -> Self {
        self.config.use_descriptor_for_notify = enabled;
        self
    }

    /// Requests an MTU after service discovery.
    ///
    /// Sizes outside `DEFAULT_MTU..=MAX_MTU` are reported to `callback` right away and dropped;
    /// the connection then goes ahead without an MTU request.
    pub fn mtu(mut self, mtu: u16, callback: Arc<dyn MtuCallback>) -> Self {
        if (DEFAULT_MTU..=MAX_MTU).contains(&mtu) {
            self.config.mtu = Some(mtu);
        } else {
            warn!(mtu, "requested MTU out of range");
            self.config.mtu = None;
            callback.on_mtu_failure(
                mtu,
                Error::with_message(
                    ErrorKind::MtuNegotiationFailed,
                    format!("requested MTU must be between {DEFAULT_MTU} and {MAX_MTU}"),
                ),
            );
        }
        self.config.mtu_callback = Some(callback);
        self
    }

    pub fn build(self) -> LinkConfiguration {
        self.config
    }
}
