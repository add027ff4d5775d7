//! Scans for a simulated module, connects to it and exchanges a command.

use std::error::Error;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use bluelink::mock::MockRadio;
use bluelink::uuids::DEFAULT_WRITE_CHARACTERISTIC;
use bluelink::{
    BluetoothUuid, Characteristic, CharacteristicProperties, DeviceRecord, GattConnectionState,
    LinkConfiguration, LinkId, LinkType, RadioEvent, ScanId, Service,
};
use bluelink_async::LinkAsync;
use futures_lite::StreamExt;
use futures_lite::future::poll_once;
use tracing::info;
use tracing::metadata::LevelFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
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

    let link = LinkAsync::new(Arc::new(MockRadio::new()));
    link.enable_radio()?;

    info!("starting scan");
    let mut scan = link.scan(LinkType::LowEnergy, Some(Duration::from_secs(5)))?;
    let module = DeviceRecord::new("C4:7F:51:00:00:01", LinkType::LowEnergy).with_name("HM-10");
    link.handle_event(RadioEvent::DeviceDiscovered {
        scan: ScanId(1),
        device: module,
    });
    let Some(device) = scan.next().await else {
        return Err("nothing found".into());
    };
    info!("found {device}");

    let config = LinkConfiguration::builder()
        .mtu(185, link.mtu_callback())
        .build();
    let mut mtu = link.mtu_updates();
    let id = LinkId(2);
    let mut connect = pin!(link.connect(&device, config));
    if poll_once(&mut connect).await.is_none() {
        // What a platform driver would report for this peripheral.
        let characteristic = Characteristic::new(
            0x0012,
            DEFAULT_WRITE_CHARACTERISTIC,
            CharacteristicProperties::WRITE_WITHOUT_RESPONSE,
        );
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
    }
    connect.await?;
    info!("connected, MTU {:?}", mtu.recv().await?);

    let mut send = pin!(link.send(b"AT+VERSION?".to_vec()));
    if poll_once(&mut send).await.is_none() {
        link.handle_event(RadioEvent::CharacteristicWritten {
            link: id,
            characteristic: 0x0012,
            result: Ok(()),
        });
    }
    info!("sent {} bytes", send.await?);

    let mut disconnect = pin!(link.disconnect());
    if poll_once(&mut disconnect).await.is_none() {
        link.handle_event(RadioEvent::connection_state(id, GattConnectionState::Disconnected));
    }
    disconnect.await?;
    info!("disconnected");
    link.release();
    Ok(())
}
