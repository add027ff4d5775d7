use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use bluelink::mock::{MockRadio, RadioCall};
use bluelink::uuids::{CLIENT_CHARACTERISTIC_CONFIGURATION, DEFAULT_WRITE_CHARACTERISTIC};
use bluelink::{
    BluetoothUuid, Characteristic, CharacteristicProperties, ConnectionState, Descriptor, DeviceRecord,
    GattConnectionState, LinkConfiguration, LinkId, LinkType, RadioEvent, ScanId, Service,
};
use bluelink_async::{ConnectionEvent, ErrorKind, LinkAsync};
use futures_lite::StreamExt;
use futures_lite::future::poll_once;

fn setup() -> (Arc<MockRadio>, LinkAsync) {
    let radio = Arc::new(MockRadio::new());
    let link = LinkAsync::new(radio.clone());
    link.enable_radio().unwrap();
    (radio, link)
}

fn device() -> DeviceRecord {
    DeviceRecord::new("C4:7F:51:00:00:01", LinkType::LowEnergy)
}

fn serial_service() -> Service {
    let characteristic = Characteristic::new(
        0x0012,
        DEFAULT_WRITE_CHARACTERISTIC,
        CharacteristicProperties::WRITE | CharacteristicProperties::NOTIFY,
    )
    .with_descriptor(Descriptor::new(0x0013, CLIENT_CHARACTERISTIC_CONFIGURATION));
    Service::new(BluetoothUuid::from_u16(0xffe0), vec![characteristic])
}

fn last_gatt_link(radio: &MockRadio) -> LinkId {
    radio
        .calls()
        .iter()
        .rev()
        .find_map(|call| match call {
            RadioCall::ConnectGatt { link, .. } => Some(*link),
            _ => None,
        })
        .unwrap()
}

fn bring_up(link: &LinkAsync, id: LinkId) {
    link.handle_event(RadioEvent::connection_state(id, GattConnectionState::Connected));
    link.handle_event(RadioEvent::ServicesDiscovered {
        link: id,
        result: Ok(vec![serial_service()]),
    });
}

#[tokio::test]
async fn connect_resolves_once_ready() {
    let (radio, link) = setup();
    let mut events = link.connection_events();
    let mut notify = link.notify_updates();

    let device_record = device();
    let mut connect = pin!(link.connect(&device_record, LinkConfiguration::default()));
    assert!(poll_once(&mut connect).await.is_none());

    bring_up(&link, last_gatt_link(&radio));
    connect.await.unwrap();

    assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Connected);
    assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Ready);
    assert_eq!(notify.recv().await.unwrap().unwrap().handle(), 0x0012);
    assert_eq!(link.connection_state(), ConnectionState::Ready);
}

#[tokio::test]
async fn connect_fails_when_the_link_does_not_come_up() {
    let (radio, link) = setup();

    let device_record = device();
    let mut connect = pin!(link.connect(&device_record, LinkConfiguration::default()));
    assert!(poll_once(&mut connect).await.is_none());

    link.handle_event(RadioEvent::ConnectionStateChanged {
        link: last_gatt_link(&radio),
        state: GattConnectionState::Connected,
        result: Err(bluelink::ErrorKind::Other.into()),
    });
    let err = connect.await.unwrap_err();
    assert_eq!(
        err.kind(),
        ErrorKind::Link(bluelink::ErrorKind::ConnectFailed)
    );
    assert!(err.get_ref().is_some());
    assert_eq!(link.connection_state(), ConnectionState::Failed);
}

#[tokio::test]
async fn dropping_connect_disconnects() {
    let (radio, link) = setup();

    {
        let device_record = device();
        let mut connect = pin!(link.connect(&device_record, LinkConfiguration::default()));
        assert!(poll_once(&mut connect).await.is_none());
    }

    let id = last_gatt_link(&radio);
    let calls = radio.take_calls();
    assert!(calls.contains(&RadioCall::DisconnectGatt { link: id }));
    assert!(calls.contains(&RadioCall::CloseGatt { link: id }));
    assert_eq!(link.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn newer_connect_cancels_the_older_one() {
    let (radio, link) = setup();

    let device_record = device();
    let mut first = pin!(link.connect(&device_record, LinkConfiguration::default()));
    assert!(poll_once(&mut first).await.is_none());
    let first_id = last_gatt_link(&radio);

    let device_record = device();
    let mut second = pin!(link.connect(&device_record, LinkConfiguration::default()));
    assert!(poll_once(&mut second).await.is_none());
    let second_id = last_gatt_link(&radio);
    assert_ne!(first_id, second_id);

    assert_eq!(first.await.unwrap_err().kind(), ErrorKind::Canceled);

    bring_up(&link, second_id);
    second.await.unwrap();
    assert!(link.is_connected());
}

#[tokio::test]
async fn dropping_a_replaced_connect_leaves_the_newer_attempt_alone() {
    let (radio, link) = setup();

    let device_record = device();
    let mut first = Box::pin(link.connect(&device_record, LinkConfiguration::default()));
    assert!(poll_once(&mut first).await.is_none());
    let device_record = device();
    let mut second = pin!(link.connect(&device_record, LinkConfiguration::default()));
    assert!(poll_once(&mut second).await.is_none());
    let second_id = last_gatt_link(&radio);

    radio.take_calls();
    drop(first);
    assert!(radio.calls().is_empty());
    assert!(!link.connection_state().is_terminal());

    bring_up(&link, second_id);
    second.await.unwrap();
    assert!(link.is_connected());
}

#[tokio::test]
async fn disconnect_waits_for_the_link_to_drop() {
    let (radio, link) = setup();

    let device_record = device();
    let mut connect = pin!(link.connect(&device_record, LinkConfiguration::default()));
    assert!(poll_once(&mut connect).await.is_none());
    let id = last_gatt_link(&radio);
    bring_up(&link, id);
    connect.await.unwrap();

    let mut disconnect = pin!(link.disconnect());
    assert!(poll_once(&mut disconnect).await.is_none());
    assert_eq!(link.connection_state(), ConnectionState::Disconnecting);

    link.handle_event(RadioEvent::connection_state(id, GattConnectionState::Disconnected));
    disconnect.await.unwrap();
    assert_eq!(link.connection_state(), ConnectionState::Disconnected);

    // Nothing left to wait for.
    link.disconnect().await.unwrap();
}

#[tokio::test]
async fn send_resolves_after_the_write_is_acknowledged() {
    let (radio, link) = setup();
    let mut received = link.received();

    let device_record = device();
    let mut connect = pin!(link.connect(&device_record, LinkConfiguration::default()));
    assert!(poll_once(&mut connect).await.is_none());
    let id = last_gatt_link(&radio);
    bring_up(&link, id);
    connect.await.unwrap();

    let mut send = pin!(link.send(b"AT".to_vec()));
    assert!(poll_once(&mut send).await.is_none());
    link.handle_event(RadioEvent::CharacteristicWritten {
        link: id,
        characteristic: 0x0012,
        result: Ok(()),
    });
    assert_eq!(send.await.unwrap(), 2);

    link.handle_event(RadioEvent::CharacteristicChanged {
        link: id,
        characteristic: 0x0012,
        value: b"OK".to_vec(),
    });
    assert_eq!(received.recv().await.unwrap(), b"OK".to_vec());
}

#[tokio::test]
async fn send_without_a_channel_fails() {
    let (_radio, link) = setup();
    let err = link.send(b"AT".to_vec()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Link(bluelink::ErrorKind::NotConnected));
}

#[tokio::test]
async fn requested_mtu_is_observable() {
    let (radio, link) = setup();
    let mut mtu = link.mtu_updates();
    let config = LinkConfiguration::builder()
        .mtu(185, link.mtu_callback())
        .build();

    let device_record = device();
    let mut connect = pin!(link.connect(&device_record, config));
    assert!(poll_once(&mut connect).await.is_none());
    let id = last_gatt_link(&radio);
    bring_up(&link, id);
    connect.await.unwrap();

    link.handle_event(RadioEvent::MtuChanged {
        link: id,
        mtu: 185,
        result: Ok(()),
    });
    assert_eq!(mtu.recv().await.unwrap(), Ok(185));
    assert_eq!(link.mtu(), 185);
}

#[tokio::test]
async fn scan_streams_each_device_once() {
    let (radio, link) = setup();
    let devices = link
        .scan(LinkType::LowEnergy, Some(Duration::from_secs(10)))
        .unwrap();

    let scan = radio
        .calls()
        .iter()
        .find_map(|call| match call {
            RadioCall::StartScan { scan, .. } => Some(*scan),
            _ => None,
        })
        .unwrap();
    for _ in 0..2 {
        link.handle_event(RadioEvent::DeviceDiscovered {
            scan,
            device: device(),
        });
    }
    link.handle_event(RadioEvent::ScanStopped { scan });

    let found: Vec<DeviceRecord> = devices.collect().await;
    assert_eq!(found, vec![device()]);
}

#[tokio::test]
async fn dropping_the_scan_stream_stops_the_scan() {
    let (radio, link) = setup();
    drop(link.scan(LinkType::LowEnergy, None).unwrap());

    let scan = ScanId(1);
    link.handle_event(RadioEvent::DeviceDiscovered {
        scan,
        device: device(),
    });
    assert!(radio.calls().contains(&RadioCall::StopScan { scan }));
    assert!(!link.scanner().unwrap().is_scanning());
}
