use std::ops::{BitOr, BitOrAssign};

use crate::descriptor::Descriptor;
use crate::uuids::{self, BluetoothUuid};

/// The GATT characteristic properties bit field.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicProperties(pub u8);

impl CharacteristicProperties {
    pub const BROADCAST: Self = Self(0x01);
    pub const READ: Self = Self(0x02);
    pub const WRITE_WITHOUT_RESPONSE: Self = Self(0x04);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);
    pub const INDICATE: Self = Self(0x20);
    pub const AUTHENTICATED_SIGNED_WRITES: Self = Self(0x40);
    pub const EXTENDED_PROPERTIES: Self = Self(0x80);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CharacteristicProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CharacteristicProperties {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// How a value is written to a characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacteristicWriteType {
    WithResponse,
    WithoutResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Characteristic {
    handle: u16,
    uuid: BluetoothUuid,
    properties: CharacteristicProperties,
    descriptors: Vec<Descriptor>,
}

impl Characteristic {
    pub fn new(handle: u16, uuid: BluetoothUuid, properties: CharacteristicProperties) -> Self {
        Self {
            handle,
            uuid,
            properties,
            descriptors: Vec::new(),
        }
    }

    pub fn with_descriptor(mut self, descriptor: Descriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// The ATT value handle of the characteristic.
    pub fn handle(&self) -> u16 {
        self.handle
    }

    pub fn uuid(&self) -> BluetoothUuid {
        self.uuid
    }

    pub fn properties(&self) -> CharacteristicProperties {
        self.properties
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub fn descriptor(&self, uuid: BluetoothUuid) -> Option<&Descriptor> {
        self.descriptors.iter().find(|d| uuids::same(d.uuid(), uuid))
    }

    /// Picks write-without-response only when the characteristic offers nothing else.
    pub fn preferred_write_type(&self) -> CharacteristicWriteType {
        if !self.properties.contains(CharacteristicProperties::WRITE)
            && self
                .properties
                .contains(CharacteristicProperties::WRITE_WITHOUT_RESPONSE)
        {
            CharacteristicWriteType::WithoutResponse
        } else {
            CharacteristicWriteType::WithResponse
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_type_prefers_acknowledged_writes() {
        let both = Characteristic::new(
            3,
            BluetoothUuid::from_u16(0xffe1),
            CharacteristicProperties::WRITE | CharacteristicProperties::WRITE_WITHOUT_RESPONSE,
        );
        assert_eq!(both.preferred_write_type(), CharacteristicWriteType::WithResponse);

        let unacked = Characteristic::new(
            3,
            BluetoothUuid::from_u16(0xffe1),
            CharacteristicProperties::WRITE_WITHOUT_RESPONSE | CharacteristicProperties::NOTIFY,
        );
        assert_eq!(unacked.preferred_write_type(), CharacteristicWriteType::WithoutResponse);
    }
}
