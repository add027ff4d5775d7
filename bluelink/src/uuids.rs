//! Well-known UUIDs and comparisons between short and full UUID forms.

pub use btuuid::BluetoothUuid;
use btuuid::{BluetoothUuid16, BluetoothUuid128};
use uuid::Uuid;

use crate::error::{Error, ErrorKind, Result};

/// Write characteristic used when the configuration names none. Common on serial-over-BLE modules.
pub const DEFAULT_WRITE_CHARACTERISTIC: BluetoothUuid = BluetoothUuid::Uuid16(BluetoothUuid16::new(0xffe1));

/// Client Characteristic Configuration descriptor.
pub const CLIENT_CHARACTERISTIC_CONFIGURATION: BluetoothUuid = BluetoothUuid::Uuid16(BluetoothUuid16::new(0x2902));

/// True if both UUIDs name the same attribute, whichever form each is written in.
pub fn same(a: BluetoothUuid, b: BluetoothUuid) -> bool {
    Uuid::from(a) == Uuid::from(b)
}

pub(crate) fn parse(input: &str) -> Result<BluetoothUuid> {
    Uuid::parse_str(input)
        .map(|uuid| BluetoothUuid::Uuid128(BluetoothUuid128::new(uuid.as_u128())))
        .map_err(|err| {
            Error::with_message(
                ErrorKind::InvalidConfiguration,
                format!("{input:?} is not a UUID: {err}"),
            )
        })
}
