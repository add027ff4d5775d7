//! Walks a simulated serial-over-BLE module through scan, connect, MTU negotiation and a write.
//!
//! Run with `RUST_LOG=bluelink=debug` to see the state machine at work.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use bluelink::mock::MockRadio;
use bluelink::uuids::{CLIENT_CHARACTERISTIC_CONFIGURATION, DEFAULT_WRITE_CHARACTERISTIC};
use bluelink::{
    BluetoothUuid, Characteristic, CharacteristicProperties, ConnectCallback, Descriptor, DeviceRecord,
    GattConnectionState, Link, LinkConfiguration, LinkId, LinkType, MtuCallback, NotifyCallback,
    RadioEvent, ScanCallback, ScanId, SendCallback, Service,
};
use tracing::metadata::LevelFilter;
use tracing::{info, warn};

fn main() -> Result<(), Box<dyn Error>> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let radio = Arc::new(MockRadio::new());
    let link = Link::new(radio.clone());
    link.enable_radio()?;

    let module = DeviceRecord::new("C4:7F:51:00:00:01", LinkType::LowEnergy).with_name("HM-10");

    link.start_scan(LinkType::LowEnergy, Some(Duration::from_secs(5)), Arc::new(Printer))?;
    link.handle_event(RadioEvent::DeviceDiscovered {
        scan: ScanId(1),
        device: module.clone(),
    });

    let config = LinkConfiguration::builder()
        .service_uuid(BluetoothUuid::from_u16(0xffe0))
        .use_descriptor_for_notify(true)
        .mtu(185, Arc::new(Printer))
        .build();
    link.connect(&module, config, Arc::new(Printer), Some(Arc::new(Printer)))?;

    // What a platform driver would report for this peripheral.
    let id = LinkId(2);
    let characteristic = Characteristic::new(
        0x0012,
        DEFAULT_WRITE_CHARACTERISTIC,
        CharacteristicProperties::WRITE_WITHOUT_RESPONSE | CharacteristicProperties::NOTIFY,
    )
    .with_descriptor(Descriptor::new(0x0013, CLIENT_CHARACTERISTIC_CONFIGURATION));
    link.handle_event(RadioEvent::connection_state(id, GattConnectionState::Connected));
    link.handle_event(RadioEvent::ServicesDiscovered {
        link: id,
        result: Ok(vec![Service::new(BluetoothUuid::from_u16(0xffe0), vec![characteristic])]),
    });
    link.handle_event(RadioEvent::MtuChanged {
        link: id,
        mtu: 185,
        result: Ok(()),
    });
    link.handle_event(RadioEvent::DescriptorWritten {
        link: id,
        descriptor: 0x0013,
        result: Ok(()),
    });

    link.send(b"AT+VERSION?".to_vec(), Arc::new(Printer))?;
    link.handle_event(RadioEvent::CharacteristicWritten {
        link: id,
        characteristic: 0x0012,
        result: Ok(()),
    });
    link.handle_event(RadioEvent::CharacteristicChanged {
        link: id,
        characteristic: 0x0012,
        value: b"HMSoft V709".to_vec(),
    });

    link.disconnect()?;
    link.handle_event(RadioEvent::connection_state(id, GattConnectionState::Disconnected));
    link.release();

    for call in radio.calls() {
        info!("radio <- {call:?}");
    }
    Ok(())
}

struct Printer;

impl ScanCallback for Printer {
    fn on_scanning(&self, device: &DeviceRecord) {
        info!("found {device}");
    }

    fn on_scan_finished(&self, devices: &[DeviceRecord]) {
        info!("scan finished with {} device(s)", devices.len());
    }
}

impl ConnectCallback for Printer {
    fn on_ready(&self) {
        info!("ready");
    }

    fn on_disconnected(&self) {
        info!("disconnected");
    }

    fn on_error(&self, error: bluelink::Error) {
        warn!("connection error: {error}");
    }
}

impl NotifyCallback for Printer {
    fn on_notify_success(&self, characteristic: &Characteristic) {
        info!("notifications on {:?}", characteristic.uuid());
    }
}

impl MtuCallback for Printer {
    fn on_mtu_changed(&self, mtu: u16) {
        info!("MTU is now {mtu}");
    }
}

impl SendCallback for Printer {
    fn on_sent(&self, len: usize) {
        info!("sent {len} bytes");
    }

    fn on_received(&self, data: &[u8]) {
        info!("received {:?}", String::from_utf8_lossy(data));
    }
}
