//! An in-memory [`Radio`] that records every request.
//!
//! It never produces events by itself. Drive a [`Link`](crate::Link) by feeding it
//! [`RadioEvent`](crate::RadioEvent)s the way a platform driver would.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::trace;

use crate::characteristic::{Characteristic, CharacteristicWriteType};
use crate::descriptor::Descriptor;
use crate::device::{DeviceRecord, LinkType};
use crate::error::{Error, Result};
use crate::radio::{ClassicTaskId, LinkId, Radio, ScanId};

/// A request made to a [`MockRadio`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    Enable,
    StartScan {
        scan: ScanId,
        kind: LinkType,
        duration: Option<Duration>,
    },
    StopScan {
        scan: ScanId,
    },
    ConnectClassic {
        task: ClassicTaskId,
        address: String,
    },
    CancelClassic {
        task: ClassicTaskId,
    },
    WriteStream {
        task: ClassicTaskId,
        value: Vec<u8>,
    },
    ConnectGatt {
        link: LinkId,
        address: String,
    },
    DisconnectGatt {
        link: LinkId,
    },
    CloseGatt {
        link: LinkId,
    },
    DiscoverServices {
        link: LinkId,
    },
    RequestMtu {
        link: LinkId,
        mtu: u16,
    },
    SetCharacteristicNotification {
        link: LinkId,
        characteristic: u16,
        enabled: bool,
    },
    WriteDescriptor {
        link: LinkId,
        descriptor: u16,
        value: Vec<u8>,
    },
    WriteCharacteristic {
        link: LinkId,
        characteristic: u16,
        value: Vec<u8>,
        write_type: CharacteristicWriteType,
    },
    RegisterPairingObserver {
        address: String,
    },
    UnregisterPairingObserver {
        address: String,
    },
    AttemptAutoPair {
        address: String,
        pin: String,
    },
}

/// A fallible [`MockRadio`] request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fail {
    Enable,
    StartScan,
    ConnectClassic,
    WriteStream,
    ConnectGatt,
    DiscoverServices,
    RequestMtu,
    SetCharacteristicNotification,
    WriteDescriptor,
    WriteCharacteristic,
    AttemptAutoPair,
}

#[derive(Debug)]
struct MockState {
    present: bool,
    enabled: bool,
    mtu_supported: bool,
    bonded: Vec<DeviceRecord>,
    known: Vec<DeviceRecord>,
    calls: Vec<RadioCall>,
    failures: HashMap<Fail, VecDeque<Error>>,
}

#[derive(Debug)]
pub struct MockRadio {
    state: Mutex<MockState>,
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRadio {
    /// A present, enabled adapter that supports MTU negotiation.
    pub fn new() -> Self {
        MockRadio {
            state: Mutex::new(MockState {
                present: true,
                enabled: true,
                mtu_supported: true,
                bonded: Vec::new(),
                known: Vec::new(),
                calls: Vec::new(),
                failures: HashMap::new(),
            }),
        }
    }

    /// A host without an adapter.
    pub fn absent() -> Self {
        let radio = Self::new();
        radio.lock().present = false;
        radio
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.lock().enabled = enabled;
    }

    pub fn set_mtu_supported(&self, supported: bool) {
        self.lock().mtu_supported = supported;
    }

    /// Adds a bonded device. It is also returned by address lookups.
    pub fn add_bonded(&self, device: DeviceRecord) {
        self.lock().bonded.push(device);
    }

    /// Makes a device known to address lookups.
    pub fn add_device(&self, device: DeviceRecord) {
        self.lock().known.push(device);
    }

    /// Makes the next `request` fail with `error`. Queued failures are consumed in order.
    pub fn fail_next(&self, request: Fail, error: Error) {
        self.lock()
            .failures
            .entry(request)
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self) -> Vec<RadioCall> {
        self.lock().calls.clone()
    }

    /// Returns the recorded calls and clears the record.
    pub fn take_calls(&self) -> Vec<RadioCall> {
        std::mem::take(&mut self.lock().calls)
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: RadioCall) {
        trace!(?call, "radio call");
        self.lock().calls.push(call);
    }

    fn record_fallible(&self, request: Fail, call: RadioCall) -> Result<()> {
        self.record(call);
        match self
            .lock()
            .failures
            .get_mut(&request)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Radio for MockRadio {
    fn is_present(&self) -> bool {
        self.lock().present
    }

    fn is_enabled(&self) -> bool {
        let state = self.lock();
        state.present && state.enabled
    }

    fn enable(&self) -> Result<()> {
        self.record_fallible(Fail::Enable, RadioCall::Enable)?;
        self.lock().enabled = true;
        Ok(())
    }

    fn bonded_devices(&self) -> Vec<DeviceRecord> {
        self.lock().bonded.clone()
    }

    fn remote_device(&self, address: &str) -> Option<DeviceRecord> {
        let state = self.lock();
        state
            .bonded
            .iter()
            .chain(&state.known)
            .find(|d| d.address() == address)
            .cloned()
    }

    fn start_scan(&self, scan: ScanId, kind: LinkType, duration: Option<Duration>) -> Result<()> {
        self.record_fallible(
            Fail::StartScan,
            RadioCall::StartScan {
                scan,
                kind,
                duration,
            },
        )
    }

    fn stop_scan(&self, scan: ScanId) {
        self.record(RadioCall::StopScan { scan });
    }

    fn connect_classic(&self, task: ClassicTaskId, device: &DeviceRecord) -> Result<()> {
        self.record_fallible(
            Fail::ConnectClassic,
            RadioCall::ConnectClassic {
                task,
                address: device.address().to_owned(),
            },
        )
    }

    fn cancel_classic(&self, task: ClassicTaskId) {
        self.record(RadioCall::CancelClassic { task });
    }

    fn write_stream(&self, task: ClassicTaskId, data: Vec<u8>) -> Result<()> {
        self.record_fallible(Fail::WriteStream, RadioCall::WriteStream { task, value: data })
    }

    fn connect_gatt(&self, link: LinkId, device: &DeviceRecord) -> Result<()> {
        self.record_fallible(
            Fail::ConnectGatt,
            RadioCall::ConnectGatt {
                link,
                address: device.address().to_owned(),
            },
        )
    }

    fn disconnect_gatt(&self, link: LinkId) {
        self.record(RadioCall::DisconnectGatt { link });
    }

    fn close_gatt(&self, link: LinkId) {
        self.record(RadioCall::CloseGatt { link });
    }

    fn discover_services(&self, link: LinkId) -> Result<()> {
        self.record_fallible(Fail::DiscoverServices, RadioCall::DiscoverServices { link })
    }

    fn supports_mtu_negotiation(&self) -> bool {
        self.lock().mtu_supported
    }

    fn request_mtu(&self, link: LinkId, mtu: u16) -> Result<()> {
        self.record_fallible(Fail::RequestMtu, RadioCall::RequestMtu { link, mtu })
    }

    fn set_characteristic_notification(
        &self,
        link: LinkId,
        characteristic: &Characteristic,
        enabled: bool,
    ) -> Result<()> {
        self.record_fallible(
            Fail::SetCharacteristicNotification,
            RadioCall::SetCharacteristicNotification {
                link,
                characteristic: characteristic.handle(),
                enabled,
            },
        )
    }

    fn write_descriptor(
        &self,
        link: LinkId,
        descriptor: &Descriptor,
        value: Vec<u8>,
    ) -> Result<()> {
        self.record_fallible(
            Fail::WriteDescriptor,
            RadioCall::WriteDescriptor {
                link,
                descriptor: descriptor.handle(),
                value,
            },
        )
    }

    fn write_characteristic(
        &self,
        link: LinkId,
        characteristic: &Characteristic,
        value: Vec<u8>,
        write_type: CharacteristicWriteType,
    ) -> Result<()> {
        self.record_fallible(
            Fail::WriteCharacteristic,
            RadioCall::WriteCharacteristic {
                link,
                characteristic: characteristic.handle(),
                value,
                write_type,
            },
        )
    }

    fn register_pairing_observer(&self, address: &str) {
        self.record(RadioCall::RegisterPairingObserver {
            address: address.to_owned(),
        });
    }

    fn unregister_pairing_observer(&self, address: &str) {
        self.record(RadioCall::UnregisterPairingObserver {
            address: address.to_owned(),
        });
    }

    fn attempt_auto_pair(&self, address: &str, pin: &str) -> Result<()> {
        self.record_fallible(
            Fail::AttemptAutoPair,
            RadioCall::AttemptAutoPair {
                address: address.to_owned(),
                pin: pin.to_owned(),
            },
        )
    }
}
