use std::fmt::Display;

/// The transport a remote device is reached over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkType {
    /// BR/EDR, connected through a serial stream after pairing.
    Classic,
    /// Bluetooth Low Energy, connected through GATT.
    LowEnergy,
}

/// Whether a persisted pairing exists with the remote device.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BondState {
    #[default]
    NotBonded,
    Bonding,
    Bonded,
}

/// A remote device as reported by a scan, the bonded-device list, or an address lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceRecord {
    address: String,
    name: Option<String>,
    link_type: LinkType,
    bond_state: BondState,
}

impl DeviceRecord {
    pub fn new(address: impl Into<String>, link_type: LinkType) -> Self {
        Self {
            address: address.into(),
            name: None,
            link_type,
            bond_state: BondState::NotBonded,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_bond_state(mut self, bond_state: BondState) -> Self {
        self.bond_state = bond_state;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn link_type(&self) -> LinkType {
        self.link_type
    }

    pub fn bond_state(&self) -> BondState {
        self.bond_state
    }

    pub fn is_bonded(&self) -> bool {
        self.bond_state == BondState::Bonded
    }
}

impl Display for DeviceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({})", self.address),
            None => f.write_str(&self.address),
        }
    }
}
