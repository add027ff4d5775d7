use crate::uuids::{self, BluetoothUuid, CLIENT_CHARACTERISTIC_CONFIGURATION};

/// Value written to the client characteristic configuration descriptor to enable notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];
/// Value written to the client characteristic configuration descriptor to enable indications.
pub const ENABLE_INDICATION_VALUE: [u8; 2] = [0x02, 0x00];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor {
    handle: u16,
    uuid: BluetoothUuid,
}

impl Descriptor {
    pub fn new(handle: u16, uuid: BluetoothUuid) -> Self {
        Self { handle, uuid }
    }

    /// The ATT handle of the descriptor.
    pub fn handle(&self) -> u16 {
        self.handle
    }

    pub fn uuid(&self) -> BluetoothUuid {
        self.uuid
    }

    pub fn is_client_configuration(&self) -> bool {
        uuids::same(self.uuid, CLIENT_CHARACTERISTIC_CONFIGURATION)
    }
}
