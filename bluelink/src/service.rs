use crate::characteristic::Characteristic;
use crate::uuids::{self, BluetoothUuid};

/// A GATT service as reported by service discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Service {
    uuid: BluetoothUuid,
    is_primary: bool,
    characteristics: Vec<Characteristic>,
}

impl Service {
    pub fn new(uuid: BluetoothUuid, characteristics: Vec<Characteristic>) -> Self {
        Self {
            uuid,
            is_primary: true,
            characteristics,
        }
    }

    pub fn secondary(mut self) -> Self {
        self.is_primary = false;
        self
    }

    pub fn uuid(&self) -> BluetoothUuid {
        self.uuid
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    /// The characteristics of this service, in the order discovery reported them.
    pub fn characteristics(&self) -> &[Characteristic] {
        &self.characteristics
    }

    /// Returns the first characteristic with the given UUID.
    pub fn characteristic(&self, uuid: BluetoothUuid) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| uuids::same(c.uuid(), uuid))
    }
}
