//! The connection state machine.
//!
//! An [`Attempt`] is a plain value. [`Attempt::step`] consumes it together with one
//! [`ConnectorEvent`] and returns the next value plus the [`Effect`]s to carry out. Nothing in
//! this module talks to the radio or calls application code; the [`Link`](crate::Link) executes
//! the effects and feeds refusals back in as events.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::callback::{ConnectCallback, NotifyCallback};
use crate::characteristic::{Characteristic, CharacteristicProperties};
use crate::config::{DEFAULT_MTU, LinkConfiguration};
use crate::descriptor::{Descriptor, ENABLE_INDICATION_VALUE, ENABLE_NOTIFICATION_VALUE};
use crate::device::{BondState, DeviceRecord, LinkType};
use crate::error::{Error, ErrorKind, Result};
use crate::radio::{ClassicTaskId, GattConnectionState, LinkId};
use crate::sender::ChannelTarget;
use crate::service::Service;
use crate::uuids::{self, CLIENT_CHARACTERISTIC_CONFIGURATION};

/// PIN offered when a classic peer asks to pair.
pub const AUTO_PAIR_PIN: &str = "1234";

/// Where a connection attempt is in its lifecycle.
///
/// `Idle`, `Disconnected` and `Failed` are terminal. At most one attempt per [`Link`](crate::Link)
/// is in a non-terminal state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    /// A classic connect to an unbonded device, waiting for pairing to resolve.
    PairingWait,
    ServiceDiscovery,
    Ready,
    Disconnecting,
    Disconnected,
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::Idle | ConnectionState::Disconnected | ConnectionState::Failed
        )
    }

    /// Whether the link to the peer is up.
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            ConnectionState::ServiceDiscovery
                | ConnectionState::Ready
                | ConnectionState::Disconnecting
        )
    }
}

/// The radio resource behind an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Classic(ClassicTaskId),
    Gatt(LinkId),
}

/// A radio request that was refused synchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Request {
    AutoPair,
    ConnectClassic,
    ConnectGatt,
    DiscoverServices,
    RequestMtu,
    WriteDescriptor,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ConnectorEvent {
    PairingRequested,
    BondStateChanged(BondState),
    ClassicConnectFinished(Result<()>),
    StreamReceived(Vec<u8>),
    StreamClosed,
    ConnectionStateChanged(GattConnectionState, Result<()>),
    ServicesDiscovered(Result<Vec<Service>>),
    MtuChanged(u16, Result<()>),
    NotificationSet(Result<()>),
    DescriptorWritten(u16, Result<()>),
    CharacteristicChanged(Vec<u8>),
    Refused(Request, Error),
    /// The application asked to disconnect.
    Disconnect,
    /// A newer attempt is replacing this one.
    Abandon,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Effect {
    RegisterPairingObserver,
    UnregisterPairingObserver,
    AutoPair,
    ConnectClassic,
    CancelClassic,
    ConnectGatt,
    DisconnectGatt,
    CloseGatt,
    DiscoverServices,
    RequestMtu(u16),
    /// Answered with [`ConnectorEvent::NotificationSet`].
    SetNotification(Characteristic),
    WriteDescriptor(Descriptor, [u8; 2]),
    BindChannel(ChannelTarget),
    SetMtu(u16),
    DestroyChannel,
    Report(Report),
}

/// Something the application is told about.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Report {
    Connecting,
    Connected,
    Ready,
    Disconnecting,
    Disconnected,
    Error(Error),
    MtuChanged(u16),
    MtuFailed(u16, Error),
    NotifyEnabled(Characteristic),
    NotifyFailed(Error),
    Received(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
struct PendingNotify {
    characteristic: Characteristic,
    descriptor: Option<(Descriptor, [u8; 2])>,
}

/// One connection attempt.
#[derive(Clone)]
pub(crate) struct Attempt {
    device: DeviceRecord,
    transport: Transport,
    config: LinkConfiguration,
    callback: Option<Arc<dyn ConnectCallback>>,
    notify_callback: Option<Arc<dyn NotifyCallback>>,
    mtu_supported: bool,
    state: ConnectionState,
    observing_pairing: bool,
    mtu: u16,
    pending_mtu: Option<u16>,
    pending_notify: Option<PendingNotify>,
}

impl std::fmt::Debug for Attempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attempt")
            .field("device", &self.device)
            .field("transport", &self.transport)
            .field("state", &self.state)
            .field("mtu", &self.mtu)
            .finish_non_exhaustive()
    }
}

impl Attempt {
    /// Creates an attempt and returns the effects that start it.
    pub(crate) fn start(
        id: u64,
        device: DeviceRecord,
        config: LinkConfiguration,
        callback: Option<Arc<dyn ConnectCallback>>,
        notify_callback: Option<Arc<dyn NotifyCallback>>,
        mtu_supported: bool,
    ) -> (Self, Vec<Effect>) {
        let transport = match device.link_type() {
            LinkType::Classic => Transport::Classic(ClassicTaskId(id)),
            LinkType::LowEnergy => Transport::Gatt(LinkId(id)),
        };
        let mut attempt = Attempt {
            device,
            transport,
            config,
            callback,
            notify_callback,
            mtu_supported,
            state: ConnectionState::Idle,
            observing_pairing: false,
            mtu: DEFAULT_MTU,
            pending_mtu: None,
            pending_notify: None,
        };

        let mut effects = Vec::new();
        attempt.state = match transport {
            Transport::Classic(_) if !attempt.device.is_bonded() => {
                attempt.observing_pairing = true;
                effects.push(Effect::RegisterPairingObserver);
                effects.push(Effect::ConnectClassic);
                effects.push(Effect::Report(Report::Connecting));
                ConnectionState::PairingWait
            }
            Transport::Classic(_) => {
                effects.push(Effect::ConnectClassic);
                effects.push(Effect::Report(Report::Connecting));
                ConnectionState::Connecting
            }
            Transport::Gatt(_) => {
                effects.push(Effect::ConnectGatt);
                ConnectionState::Connecting
            }
        };
        info!(device = %attempt.device, %transport, state = ?attempt.state, "connection attempt started");
        (attempt, effects)
    }

    pub(crate) fn device(&self) -> &DeviceRecord {
        &self.device
    }

    pub(crate) fn transport(&self) -> Transport {
        self.transport
    }

    pub(crate) fn config(&self) -> &LinkConfiguration {
        &self.config
    }

    pub(crate) fn callback(&self) -> Option<&Arc<dyn ConnectCallback>> {
        self.callback.as_ref()
    }

    pub(crate) fn notify_callback(&self) -> Option<&Arc<dyn NotifyCallback>> {
        self.notify_callback.as_ref()
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    /// The current ATT MTU of the link.
    pub(crate) fn mtu(&self) -> u16 {
        self.mtu
    }

    pub(crate) fn is_live(&self) -> bool {
        !self.state.is_terminal()
    }

    pub(crate) fn step(mut self, event: ConnectorEvent) -> (Self, Vec<Effect>) {
        let mut effects = Vec::new();
        if self.state.is_terminal() {
            debug!(state = ?self.state, ?event, "event for finished attempt ignored");
            return (self, effects);
        }

        let next = match self.transport {
            Transport::Classic(task) => self.step_classic(task, event, &mut effects),
            Transport::Gatt(link) => self.step_gatt(link, event, &mut effects),
        };
        if next != self.state {
            debug!(from = ?self.state, to = ?next, "connection state changed");
            self.state = next;
        }
        (self, effects)
    }

    fn step_classic(
        &mut self,
        task: ClassicTaskId,
        event: ConnectorEvent,
        effects: &mut Vec<Effect>,
    ) -> ConnectionState {
        use ConnectionState::*;

        match (self.state, event) {
            (PairingWait, ConnectorEvent::PairingRequested) => {
                effects.push(Effect::AutoPair);
                PairingWait
            }
            (PairingWait, ConnectorEvent::BondStateChanged(BondState::Bonded)) => {
                self.stop_observing_pairing(effects);
                Connecting
            }
            (state, ConnectorEvent::Refused(Request::AutoPair, error)) => {
                warn!(%error, "automatic pairing failed");
                self.stop_observing_pairing(effects);
                effects.push(Effect::Report(Report::Error(Error::with_message(
                    ErrorKind::PairingFailed,
                    format!("{error}, pair the device manually"),
                ))));
                state
            }
            (Connecting | PairingWait, ConnectorEvent::ClassicConnectFinished(Ok(()))) => {
                self.stop_observing_pairing(effects);
                effects.push(Effect::BindChannel(ChannelTarget::Stream(task)));
                effects.push(Effect::Report(Report::Connected));
                effects.push(Effect::Report(Report::Ready));
                Ready
            }
            (Connecting | PairingWait, ConnectorEvent::ClassicConnectFinished(Err(error)))
            | (_, ConnectorEvent::Refused(Request::ConnectClassic, error)) => {
                warn!(%error, "classic connect failed");
                self.stop_observing_pairing(effects);
                effects.push(Effect::Report(Report::Error(
                    error.into_kind(ErrorKind::ConnectFailed),
                )));
                Failed
            }
            (Ready, ConnectorEvent::StreamReceived(value)) => {
                effects.push(Effect::Report(Report::Received(value)));
                Ready
            }
            (Ready, ConnectorEvent::StreamClosed) => {
                info!("classic stream closed");
                effects.push(Effect::DestroyChannel);
                effects.push(Effect::Report(Report::Disconnected));
                Disconnected
            }
            (_, event @ (ConnectorEvent::Disconnect | ConnectorEvent::Abandon)) => {
                self.stop_observing_pairing(effects);
                if event == ConnectorEvent::Disconnect {
                    effects.push(Effect::Report(Report::Disconnecting));
                }
                effects.push(Effect::CancelClassic);
                effects.push(Effect::DestroyChannel);
                effects.push(Effect::Report(Report::Disconnected));
                Disconnected
            }
            (state, event) => {
                debug!(?state, ?event, "event ignored");
                state
            }
        }
    }

    fn step_gatt(
        &mut self,
        link: LinkId,
        event: ConnectorEvent,
        effects: &mut Vec<Effect>,
    ) -> ConnectionState {
        use ConnectionState::*;
        use GattConnectionState as Gatt;

        match (self.state, event) {
            (Connecting, ConnectorEvent::ConnectionStateChanged(Gatt::Connecting, _)) => {
                effects.push(Effect::Report(Report::Connecting));
                Connecting
            }
            (Connecting, ConnectorEvent::ConnectionStateChanged(Gatt::Connected, Ok(()))) => {
                info!(%link, "connected, discovering services");
                effects.push(Effect::Report(Report::Connected));
                effects.push(Effect::DiscoverServices);
                ServiceDiscovery
            }
            (Connecting, ConnectorEvent::ConnectionStateChanged(Gatt::Connected, Err(error)))
            | (_, ConnectorEvent::Refused(Request::ConnectGatt, error)) => {
                self.fail_connect(error, effects)
            }
            (Connecting, ConnectorEvent::ConnectionStateChanged(Gatt::Disconnected, result)) => {
                let error = match result {
                    Ok(()) => Error::with_message(
                        ErrorKind::ConnectFailed,
                        "link dropped before connecting",
                    ),
                    Err(error) => error,
                };
                self.fail_connect(error, effects)
            }
            (Disconnecting, ConnectorEvent::ConnectionStateChanged(Gatt::Disconnecting, _)) => {
                Disconnecting
            }
            (state, ConnectorEvent::ConnectionStateChanged(Gatt::Disconnecting, _)) => {
                effects.push(Effect::Report(Report::Disconnecting));
                state
            }
            (_, ConnectorEvent::ConnectionStateChanged(Gatt::Disconnected, _)) => {
                info!(%link, "disconnected");
                self.pending_mtu = None;
                self.pending_notify = None;
                effects.push(Effect::CloseGatt);
                effects.push(Effect::DestroyChannel);
                effects.push(Effect::Report(Report::Disconnected));
                Disconnected
            }
            (ServiceDiscovery, ConnectorEvent::ServicesDiscovered(Ok(services))) => {
                self.on_services_discovered(link, &services, effects);
                Ready
            }
            (ServiceDiscovery, ConnectorEvent::ServicesDiscovered(Err(error)))
            | (_, ConnectorEvent::Refused(Request::DiscoverServices, error)) => {
                warn!(%link, %error, "service discovery failed");
                effects.push(Effect::DisconnectGatt);
                effects.push(Effect::CloseGatt);
                effects.push(Effect::Report(Report::Error(
                    error.into_kind(ErrorKind::ServiceDiscoveryFailed),
                )));
                Failed
            }
            (state, ConnectorEvent::MtuChanged(mtu, result)) => {
                self.on_mtu_changed(mtu, result, effects);
                state
            }
            (state, ConnectorEvent::Refused(Request::RequestMtu, error)) => {
                if let Some(requested) = self.pending_mtu.take() {
                    effects.push(Effect::Report(Report::MtuFailed(
                        requested,
                        error.into_kind(ErrorKind::MtuNegotiationFailed),
                    )));
                }
                state
            }
            (state, ConnectorEvent::NotificationSet(result)) => {
                self.on_notification_set(result, effects);
                state
            }
            (state, ConnectorEvent::DescriptorWritten(handle, result)) => {
                let matches = self
                    .pending_notify
                    .as_ref()
                    .and_then(|pending| pending.descriptor)
                    .is_some_and(|(descriptor, _)| descriptor.handle() == handle);
                if matches {
                    self.finish_notify(result, effects);
                }
                state
            }
            (state, ConnectorEvent::Refused(Request::WriteDescriptor, error)) => {
                self.finish_notify(Err(error), effects);
                state
            }
            (state @ (ServiceDiscovery | Ready), ConnectorEvent::CharacteristicChanged(value)) => {
                effects.push(Effect::Report(Report::Received(value)));
                state
            }
            (Connecting, ConnectorEvent::Disconnect) => {
                effects.push(Effect::DisconnectGatt);
                effects.push(Effect::CloseGatt);
                effects.push(Effect::Report(Report::Disconnected));
                Disconnected
            }
            (ServiceDiscovery | Ready, ConnectorEvent::Disconnect) => {
                effects.push(Effect::Report(Report::Disconnecting));
                effects.push(Effect::DisconnectGatt);
                Disconnecting
            }
            (_, ConnectorEvent::Abandon) => {
                self.pending_mtu = None;
                self.pending_notify = None;
                effects.push(Effect::DisconnectGatt);
                effects.push(Effect::CloseGatt);
                effects.push(Effect::DestroyChannel);
                effects.push(Effect::Report(Report::Disconnected));
                Disconnected
            }
            (state, event) => {
                debug!(?state, ?event, "event ignored");
                state
            }
        }
    }

    fn fail_connect(&mut self, error: Error, effects: &mut Vec<Effect>) -> ConnectionState {
        warn!(device = %self.device, %error, "GATT connect failed");
        effects.push(Effect::CloseGatt);
        effects.push(Effect::Report(Report::Error(
            error.into_kind(ErrorKind::ConnectFailed),
        )));
        ConnectionState::Failed
    }

    fn stop_observing_pairing(&mut self, effects: &mut Vec<Effect>) {
        if self.observing_pairing {
            self.observing_pairing = false;
            effects.push(Effect::UnregisterPairingObserver);
        }
    }

    fn on_services_discovered(
        &mut self,
        link: LinkId,
        services: &[Service],
        effects: &mut Vec<Effect>,
    ) {
        debug!(%link, count = services.len(), "services discovered");

        // MTU negotiation runs independently of characteristic resolution.
        match self.config.mtu_request() {
            Some(mtu) if self.mtu_supported => {
                self.pending_mtu = Some(mtu);
                effects.push(Effect::RequestMtu(mtu));
            }
            Some(mtu) => debug!(mtu, "radio cannot renegotiate the MTU"),
            None => {}
        }

        match resolve_write_characteristic(services, &self.config) {
            Ok((service, characteristic)) => {
                let uuid = Uuid::from(characteristic.uuid());
                info!(%link, %uuid, "write characteristic resolved");
                effects.push(Effect::BindChannel(ChannelTarget::Characteristic {
                    link,
                    characteristic: characteristic.clone(),
                }));
                self.enable_notifications(services, service, characteristic, effects);
            }
            Err(error) => {
                warn!(%link, %error, "write characteristic not resolved");
                // Notifications hang off the write characteristic, so they fail with it.
                effects.push(Effect::Report(Report::NotifyFailed(error.clone())));
                effects.push(Effect::Report(Report::Error(error)));
            }
        }
        effects.push(Effect::Report(Report::Ready));
    }

    fn enable_notifications(
        &mut self,
        services: &[Service],
        service: &Service,
        write_characteristic: &Characteristic,
        effects: &mut Vec<Effect>,
    ) {
        let target = match self.config.notify_characteristic_uuid() {
            Some(uuid) if self.config.service_uuid().is_some() => service.characteristic(uuid),
            Some(uuid) => services.iter().find_map(|s| s.characteristic(uuid)),
            None => Some(write_characteristic),
        };
        let Some(characteristic) = target else {
            let uuid = self.config.notify_characteristic_uuid().map(Uuid::from);
            effects.push(Effect::Report(Report::NotifyFailed(Error::with_message(
                ErrorKind::CharacteristicNotFound,
                format!("notify characteristic {} not found", uuid.unwrap_or_default()),
            ))));
            return;
        };

        let descriptor = if self.config.use_descriptor_for_notify() {
            let Some(descriptor) = characteristic.descriptor(CLIENT_CHARACTERISTIC_CONFIGURATION)
            else {
                effects.push(Effect::Report(Report::NotifyFailed(Error::with_message(
                    ErrorKind::NotifyEnableFailed,
                    format!(
                        "characteristic {} has no client configuration descriptor",
                        Uuid::from(characteristic.uuid())
                    ),
                ))));
                return;
            };
            let props = characteristic.properties();
            let value = if !props.contains(CharacteristicProperties::NOTIFY)
                && props.contains(CharacteristicProperties::INDICATE)
            {
                ENABLE_INDICATION_VALUE
            } else {
                ENABLE_NOTIFICATION_VALUE
            };
            Some((*descriptor, value))
        } else {
            None
        };

        self.pending_notify = Some(PendingNotify {
            characteristic: characteristic.clone(),
            descriptor,
        });
        effects.push(Effect::SetNotification(characteristic.clone()));
    }

    fn on_notification_set(&mut self, result: Result<()>, effects: &mut Vec<Effect>) {
        let Some(descriptor) = self.pending_notify.as_ref().map(|p| p.descriptor) else {
            return;
        };
        match (result, descriptor) {
            (Ok(()), Some((descriptor, value))) => {
                effects.push(Effect::WriteDescriptor(descriptor, value));
            }
            (result, _) => self.finish_notify(result, effects),
        }
    }

    fn finish_notify(&mut self, result: Result<()>, effects: &mut Vec<Effect>) {
        let Some(pending) = self.pending_notify.take() else {
            return;
        };
        match result {
            Ok(()) => {
                info!(uuid = %Uuid::from(pending.characteristic.uuid()), "notifications enabled");
                effects.push(Effect::Report(Report::NotifyEnabled(pending.characteristic)));
            }
            Err(error) => {
                warn!(%error, "enabling notifications failed");
                effects.push(Effect::Report(Report::NotifyFailed(
                    error.into_kind(ErrorKind::NotifyEnableFailed),
                )));
            }
        }
    }

    fn on_mtu_changed(&mut self, mtu: u16, result: Result<()>, effects: &mut Vec<Effect>) {
        if result.is_ok() {
            self.mtu = mtu;
            effects.push(Effect::SetMtu(mtu));
        }
        let Some(requested) = self.pending_mtu.take() else {
            debug!(mtu, "MTU changed by peer");
            return;
        };
        match result {
            Ok(()) if mtu == requested => {
                info!(mtu, "MTU negotiated");
                effects.push(Effect::Report(Report::MtuChanged(mtu)));
            }
            Ok(()) => {
                warn!(mtu, requested, "peer negotiated a different MTU");
                effects.push(Effect::Report(Report::MtuFailed(
                    mtu,
                    Error::with_message(
                        ErrorKind::MtuNegotiationFailed,
                        format!("requested {requested}, negotiated {mtu}"),
                    ),
                )));
            }
            Err(error) => {
                warn!(mtu, requested, %error, "MTU request failed");
                effects.push(Effect::Report(Report::MtuFailed(
                    mtu,
                    error.into_kind(ErrorKind::MtuNegotiationFailed),
                )));
            }
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Classic(task) => task.fmt(f),
            Transport::Gatt(link) => link.fmt(f),
        }
    }
}

/// Finds the characteristic to write to.
///
/// With a service UUID configured, only that service is searched. Otherwise every service is
/// searched in discovery order and the first characteristic with a matching UUID wins.
pub fn resolve_write_characteristic<'a>(
    services: &'a [Service],
    config: &LinkConfiguration,
) -> Result<(&'a Service, &'a Characteristic)> {
    let uuid = config.write_characteristic_uuid();
    match config.service_uuid() {
        Some(service_uuid) => {
            let service = services
                .iter()
                .find(|s| uuids::same(s.uuid(), service_uuid))
                .ok_or_else(|| {
                    Error::with_message(
                        ErrorKind::ServiceNotFound,
                        format!("service {} not offered by peer", Uuid::from(service_uuid)),
                    )
                })?;
            let characteristic = service.characteristic(uuid).ok_or_else(|| {
                Error::with_message(
                    ErrorKind::CharacteristicNotFound,
                    format!(
                        "characteristic {} not in service {}",
                        Uuid::from(uuid),
                        Uuid::from(service_uuid)
                    ),
                )
            })?;
            Ok((service, characteristic))
        }
        None => services
            .iter()
            .find_map(|s| s.characteristic(uuid).map(|c| (s, c)))
            .ok_or_else(|| {
                Error::with_message(
                    ErrorKind::CharacteristicNotFound,
                    format!("characteristic {} not offered by peer", Uuid::from(uuid)),
                )
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uuids::{BluetoothUuid, DEFAULT_WRITE_CHARACTERISTIC};

    fn write_char(handle: u16) -> Characteristic {
        Characteristic::new(
            handle,
            DEFAULT_WRITE_CHARACTERISTIC,
            CharacteristicProperties::WRITE | CharacteristicProperties::NOTIFY,
        )
        .with_descriptor(Descriptor::new(handle + 1, CLIENT_CHARACTERISTIC_CONFIGURATION))
    }

    fn le_attempt(config: LinkConfiguration) -> Attempt {
        let device = DeviceRecord::new("AA:BB:CC:DD:EE:FF", LinkType::LowEnergy);
        let (attempt, effects) = Attempt::start(7, device, config, None, None, true);
        assert_eq!(effects, vec![Effect::ConnectGatt]);
        attempt
    }

    fn connected(config: LinkConfiguration) -> Attempt {
        let attempt = le_attempt(config);
        let (attempt, effects) = attempt.step(ConnectorEvent::ConnectionStateChanged(
            GattConnectionState::Connected,
            Ok(()),
        ));
        assert_eq!(
            effects,
            vec![Effect::Report(Report::Connected), Effect::DiscoverServices]
        );
        assert_eq!(attempt.state(), ConnectionState::ServiceDiscovery);
        attempt
    }

    #[test]
    fn resolves_fallback_uuid_across_all_services() {
        let services = vec![
            Service::new(BluetoothUuid::from_u16(0x180a), vec![]),
            Service::new(BluetoothUuid::from_u16(0xffe0), vec![write_char(0x10)]),
            Service::new(BluetoothUuid::from_u16(0xfff0), vec![write_char(0x20)]),
        ];
        let config = LinkConfiguration::builder().build();
        let (service, characteristic) = resolve_write_characteristic(&services, &config).unwrap();
        assert_eq!(service.uuid(), BluetoothUuid::from_u16(0xffe0));
        assert_eq!(characteristic.handle(), 0x10);
    }

    #[test]
    fn service_scoped_resolution_reports_what_is_missing() {
        let services = vec![Service::new(BluetoothUuid::from_u16(0xffe0), vec![write_char(0x10)])];

        let config = LinkConfiguration::builder()
            .service_uuid(BluetoothUuid::from_u16(0x1234))
            .build();
        let err = resolve_write_characteristic(&services, &config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServiceNotFound);

        let config = LinkConfiguration::builder()
            .service_uuid(BluetoothUuid::from_u16(0xffe0))
            .write_characteristic_uuid(BluetoothUuid::from_u16(0xffe9))
            .build();
        let err = resolve_write_characteristic(&services, &config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CharacteristicNotFound);
    }

    #[test]
    fn ready_after_discovery_binds_then_enables_notifications() {
        let attempt = connected(LinkConfiguration::builder().build());
        let services = vec![Service::new(BluetoothUuid::from_u16(0xffe0), vec![write_char(0x10)])];
        let (attempt, effects) = attempt.step(ConnectorEvent::ServicesDiscovered(Ok(services)));

        assert_eq!(attempt.state(), ConnectionState::Ready);
        assert_eq!(
            effects,
            vec![
                Effect::BindChannel(ChannelTarget::Characteristic {
                    link: LinkId(7),
                    characteristic: write_char(0x10),
                }),
                Effect::SetNotification(write_char(0x10)),
                Effect::Report(Report::Ready),
            ]
        );

        let (_, effects) = attempt.step(ConnectorEvent::NotificationSet(Ok(())));
        assert_eq!(
            effects,
            vec![Effect::Report(Report::NotifyEnabled(write_char(0x10)))]
        );
    }

    #[test]
    fn descriptor_path_waits_for_the_descriptor_write() {
        let config = LinkConfiguration::builder()
            .use_descriptor_for_notify(true)
            .build();
        let attempt = connected(config);
        let services = vec![Service::new(BluetoothUuid::from_u16(0xffe0), vec![write_char(0x10)])];
        let (attempt, _) = attempt.step(ConnectorEvent::ServicesDiscovered(Ok(services)));

        let (attempt, effects) = attempt.step(ConnectorEvent::NotificationSet(Ok(())));
        let cccd = Descriptor::new(0x11, CLIENT_CHARACTERISTIC_CONFIGURATION);
        assert_eq!(
            effects,
            vec![Effect::WriteDescriptor(cccd, ENABLE_NOTIFICATION_VALUE)]
        );

        // A write to some other descriptor is not ours.
        let (attempt, effects) = attempt.step(ConnectorEvent::DescriptorWritten(0x30, Ok(())));
        assert!(effects.is_empty());

        let (_, effects) = attempt.step(ConnectorEvent::DescriptorWritten(
            0x11,
            Err(crate::error::AttError::WRITE_NOT_PERMITTED.into()),
        ));
        match effects.as_slice() {
            [Effect::Report(Report::NotifyFailed(error))] => {
                assert_eq!(error.kind(), ErrorKind::NotifyEnableFailed)
            }
            other => panic!("unexpected effects {other:?}"),
        }
    }

    #[test]
    fn indicate_only_characteristics_get_the_indication_value() {
        let config = LinkConfiguration::builder()
            .use_descriptor_for_notify(true)
            .build();
        let attempt = connected(config);
        let indicate = Characteristic::new(
            0x10,
            DEFAULT_WRITE_CHARACTERISTIC,
            CharacteristicProperties::WRITE | CharacteristicProperties::INDICATE,
        )
        .with_descriptor(Descriptor::new(0x11, CLIENT_CHARACTERISTIC_CONFIGURATION));
        let services = vec![Service::new(BluetoothUuid::from_u16(0xffe0), vec![indicate])];
        let (attempt, _) = attempt.step(ConnectorEvent::ServicesDiscovered(Ok(services)));
        let (_, effects) = attempt.step(ConnectorEvent::NotificationSet(Ok(())));
        assert_eq!(
            effects,
            vec![Effect::WriteDescriptor(
                Descriptor::new(0x11, CLIENT_CHARACTERISTIC_CONFIGURATION),
                ENABLE_INDICATION_VALUE
            )]
        );
    }

    #[test]
    fn missing_service_still_requests_mtu_and_reaches_ready() {
        struct Quiet;
        impl crate::callback::MtuCallback for Quiet {}

        let config = LinkConfiguration::builder()
            .service_uuid(BluetoothUuid::from_u16(0x1234))
            .mtu(185, Arc::new(Quiet))
            .build();
        let attempt = connected(config);
        let services = vec![Service::new(BluetoothUuid::from_u16(0xffe0), vec![write_char(0x10)])];
        let (attempt, effects) = attempt.step(ConnectorEvent::ServicesDiscovered(Ok(services)));

        assert_eq!(attempt.state(), ConnectionState::Ready);
        assert_eq!(effects.len(), 4);
        assert_eq!(effects[0], Effect::RequestMtu(185));
        assert!(matches!(
            &effects[1],
            Effect::Report(Report::NotifyFailed(e)) if e.kind() == ErrorKind::ServiceNotFound
        ));
        assert!(matches!(
            &effects[2],
            Effect::Report(Report::Error(e)) if e.kind() == ErrorKind::ServiceNotFound
        ));
        assert_eq!(effects[3], Effect::Report(Report::Ready));

        let (attempt, effects) = attempt.step(ConnectorEvent::MtuChanged(185, Ok(())));
        assert_eq!(
            effects,
            vec![Effect::SetMtu(185), Effect::Report(Report::MtuChanged(185))]
        );
        assert_eq!(attempt.mtu(), 185);
    }

    #[test]
    fn mismatched_mtu_is_a_failure_but_still_applies() {
        struct Quiet;
        impl crate::callback::MtuCallback for Quiet {}

        let config = LinkConfiguration::builder()
            .mtu(247, Arc::new(Quiet))
            .build();
        let attempt = connected(config);
        let (attempt, _) = attempt.step(ConnectorEvent::ServicesDiscovered(Ok(vec![])));
        let (attempt, effects) = attempt.step(ConnectorEvent::MtuChanged(185, Ok(())));
        assert_eq!(effects[0], Effect::SetMtu(185));
        assert!(matches!(
            &effects[1],
            Effect::Report(Report::MtuFailed(185, e)) if e.kind() == ErrorKind::MtuNegotiationFailed
        ));

        // Later exchanges initiated by the peer are applied silently.
        let (_, effects) = attempt.step(ConnectorEvent::MtuChanged(247, Ok(())));
        assert_eq!(effects, vec![Effect::SetMtu(247)]);
    }

    #[test]
    fn no_mtu_request_without_radio_support() {
        struct Quiet;
        impl crate::callback::MtuCallback for Quiet {}

        let config = LinkConfiguration::builder()
            .mtu(247, Arc::new(Quiet))
            .build();
        let device = DeviceRecord::new("AA", LinkType::LowEnergy);
        let (attempt, _) = Attempt::start(1, device, config, None, None, false);
        let (attempt, _) = attempt.step(ConnectorEvent::ConnectionStateChanged(
            GattConnectionState::Connected,
            Ok(()),
        ));
        let (_, effects) = attempt.step(ConnectorEvent::ServicesDiscovered(Ok(vec![])));
        assert!(!effects.iter().any(|e| matches!(e, Effect::RequestMtu(_))));
    }

    #[test]
    fn drop_before_connect_fails_and_drop_after_connect_disconnects() {
        let attempt = le_attempt(LinkConfiguration::default());
        let (attempt, effects) = attempt.step(ConnectorEvent::ConnectionStateChanged(
            GattConnectionState::Disconnected,
            Ok(()),
        ));
        assert_eq!(attempt.state(), ConnectionState::Failed);
        assert_eq!(effects[0], Effect::CloseGatt);
        assert!(matches!(
            &effects[1],
            Effect::Report(Report::Error(e)) if e.kind() == ErrorKind::ConnectFailed
        ));

        let attempt = connected(LinkConfiguration::default());
        let (attempt, effects) = attempt.step(ConnectorEvent::ConnectionStateChanged(
            GattConnectionState::Disconnected,
            Ok(()),
        ));
        assert_eq!(attempt.state(), ConnectionState::Disconnected);
        assert_eq!(
            effects,
            vec![
                Effect::CloseGatt,
                Effect::DestroyChannel,
                Effect::Report(Report::Disconnected)
            ]
        );

        // Terminal attempts ignore everything, including a repeated disconnect.
        let (attempt, effects) = attempt.step(ConnectorEvent::ConnectionStateChanged(
            GattConnectionState::Disconnected,
            Ok(()),
        ));
        assert!(effects.is_empty());
        assert_eq!(attempt.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn discovery_failure_is_terminal() {
        let attempt = connected(LinkConfiguration::default());
        let (attempt, effects) = attempt.step(ConnectorEvent::ServicesDiscovered(Err(
            ErrorKind::Other.into(),
        )));
        assert_eq!(attempt.state(), ConnectionState::Failed);
        assert!(matches!(
            effects.last(),
            Some(Effect::Report(Report::Error(e))) if e.kind() == ErrorKind::ServiceDiscoveryFailed
        ));
    }

    #[test]
    fn unbonded_classic_connect_pairs_automatically() {
        let device = DeviceRecord::new("00:11:22:33:44:55", LinkType::Classic);
        let (attempt, effects) =
            Attempt::start(3, device, LinkConfiguration::default(), None, None, true);
        assert_eq!(attempt.state(), ConnectionState::PairingWait);
        assert_eq!(
            effects,
            vec![
                Effect::RegisterPairingObserver,
                Effect::ConnectClassic,
                Effect::Report(Report::Connecting)
            ]
        );

        let (attempt, effects) = attempt.step(ConnectorEvent::PairingRequested);
        assert_eq!(effects, vec![Effect::AutoPair]);

        let (attempt, effects) = attempt.step(ConnectorEvent::Refused(
            Request::AutoPair,
            ErrorKind::Other.into(),
        ));
        assert_eq!(effects[0], Effect::UnregisterPairingObserver);
        assert!(matches!(
            &effects[1],
            Effect::Report(Report::Error(e)) if e.kind() == ErrorKind::PairingFailed
        ));
        assert_eq!(attempt.state(), ConnectionState::PairingWait);

        // The user paired by hand; the connect task finishes normally.
        let (attempt, effects) = attempt.step(ConnectorEvent::ClassicConnectFinished(Ok(())));
        assert_eq!(attempt.state(), ConnectionState::Ready);
        assert_eq!(
            effects,
            vec![
                Effect::BindChannel(ChannelTarget::Stream(ClassicTaskId(3))),
                Effect::Report(Report::Connected),
                Effect::Report(Report::Ready),
            ]
        );
    }

    #[test]
    fn bonded_classic_connect_skips_pairing() {
        let device = DeviceRecord::new("00:11:22:33:44:55", LinkType::Classic)
            .with_bond_state(BondState::Bonded);
        let (attempt, effects) =
            Attempt::start(3, device, LinkConfiguration::default(), None, None, true);
        assert_eq!(attempt.state(), ConnectionState::Connecting);
        assert_eq!(
            effects,
            vec![Effect::ConnectClassic, Effect::Report(Report::Connecting)]
        );

        let (attempt, effects) = attempt.step(ConnectorEvent::Abandon);
        assert_eq!(attempt.state(), ConnectionState::Disconnected);
        assert_eq!(
            effects,
            vec![
                Effect::CancelClassic,
                Effect::DestroyChannel,
                Effect::Report(Report::Disconnected)
            ]
        );
    }
}
