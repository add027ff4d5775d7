//! The application's entry point.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::callback::{ConnectCallback, NotifyCallback, ScanCallback, SendCallback};
use crate::config::{DEFAULT_MTU, LinkConfiguration};
use crate::connector::{
    AUTO_PAIR_PIN, Attempt, ConnectionState, ConnectorEvent, Effect, Report, Request, Transport,
};
use crate::device::{DeviceRecord, LinkType};
use crate::error::{Error, ErrorKind, Result};
use crate::radio::{Radio, RadioEvent, ScanId};
use crate::scanner::Scanner;
use crate::sender::{ChannelTarget, Sender};

/// Application callbacks collected while the state lock is held, run once it is released.
#[derive(Default)]
pub(crate) struct Notifier {
    pending: Vec<Box<dyn FnOnce() + Send>>,
}

impl Notifier {
    pub(crate) fn push(&mut self, f: impl FnOnce() + Send + 'static) {
        self.pending.push(Box::new(f));
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub(crate) fn run(self) {
        for f in self.pending {
            f();
        }
    }
}

fn call<C: ?Sized + Send + Sync + 'static>(
    out: &mut Notifier,
    callback: Option<&Arc<C>>,
    f: impl FnOnce(&C) + Send + 'static,
) {
    if let Some(callback) = callback.cloned() {
        out.push(move || f(&callback));
    }
}

#[derive(Default)]
struct LinkInner {
    enabled: bool,
    next_id: u64,
    scanner: Scanner,
    attempt: Option<Attempt>,
    sender: Sender,
}

/// Owns the adapter, the active scan, the active connection attempt and the data channel.
///
/// There is one scan, one live connection attempt and one data channel at a time. Starting a
/// new scan or connection tears down the previous one first.
///
/// Platform events are delivered with [`Link::handle_event`]. Application callbacks never run
/// while internal state is locked.
pub struct Link {
    radio: Arc<dyn Radio>,
    inner: Mutex<LinkInner>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Link")
            .field("enabled", &inner.enabled)
            .field("scanning", &inner.scanner.is_scanning())
            .field("attempt", &inner.attempt)
            .field("channel", &inner.sender.target())
            .finish()
    }
}

impl Link {
    pub fn new(radio: Arc<dyn Radio>) -> Self {
        Link {
            radio,
            inner: Mutex::new(LinkInner::default()),
        }
    }

    pub fn radio(&self) -> &Arc<dyn Radio> {
        &self.radio
    }

    /// Checks for an adapter and turns it on if needed. Required before any scanning, connecting
    /// or sending.
    pub fn enable_radio(&self) -> Result<()> {
        if !self.radio.is_present() {
            warn!("no bluetooth adapter");
            return Err(Error::with_message(
                ErrorKind::AdapterUnavailable,
                "host has no bluetooth adapter",
            ));
        }
        if !self.radio.is_enabled() {
            info!("enabling bluetooth adapter");
            self.radio
                .enable()
                .map_err(|err| err.into_kind(ErrorKind::AdapterUnavailable))?;
        }
        self.lock().enabled = true;
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    pub fn bonded_devices(&self) -> Result<Vec<DeviceRecord>> {
        self.ensure_enabled()?;
        Ok(self.radio.bonded_devices())
    }

    pub fn scanner(&self) -> Result<ScannerHandle<'_>> {
        self.ensure_enabled()?;
        Ok(ScannerHandle { link: self })
    }

    pub fn connector(&self) -> Result<ConnectorHandle<'_>> {
        self.ensure_enabled()?;
        Ok(ConnectorHandle { link: self })
    }

    pub fn sender(&self) -> Result<SenderHandle<'_>> {
        self.ensure_enabled()?;
        Ok(SenderHandle { link: self })
    }

    /// Starts discovering devices, stopping any scan in progress.
    ///
    /// With a `duration`, the scan ends on its own; otherwise it runs until [`Link::stop_scan`]
    /// or until the platform ends it.
    pub fn start_scan(
        &self,
        kind: LinkType,
        duration: Option<Duration>,
        callback: Arc<dyn ScanCallback>,
    ) -> Result<()> {
        self.scanner()?.scan(kind, duration, callback);
        Ok(())
    }

    /// Stops the active scan. Does nothing if there is none.
    pub fn stop_scan(&self) {
        self.with(|inner, radio, out| inner.scanner.stop_scan(radio, out));
    }

    /// Starts connecting to `device`.
    ///
    /// Any live attempt is abandoned, the data channel destroyed and the active scan stopped
    /// before the radio is asked to connect. Progress and failures are reported to `callback`.
    ///
    /// Returns the transport of the new attempt, which identifies it in later events.
    pub fn connect(
        &self,
        device: &DeviceRecord,
        config: LinkConfiguration,
        callback: Arc<dyn ConnectCallback>,
        notify_callback: Option<Arc<dyn NotifyCallback>>,
    ) -> Result<Transport> {
        Ok(self
            .connector()?
            .connect(device, config, callback, notify_callback))
    }

    /// Disconnects the live attempt, if any.
    pub fn disconnect(&self) -> Result<()> {
        self.connector()?.disconnect();
        Ok(())
    }

    /// Writes `payload` to the data channel. The outcome is reported to `callback`, which also
    /// becomes the receiver of incoming data.
    pub fn send(&self, payload: impl Into<Vec<u8>>, callback: Arc<dyn SendCallback>) -> Result<()> {
        self.sender()?.send(payload, callback);
        Ok(())
    }

    /// Unbinds the data channel. Does nothing if none is bound.
    pub fn destroy_channel(&self) {
        self.with(|inner, _, out| {
            inner.sender.destroy_channel(out);
        });
    }

    /// Stops scanning and destroys the data channel. The adapter stays enabled and a connected
    /// peer stays connected.
    pub fn release(&self) {
        info!("releasing link resources");
        self.with(|inner, radio, out| {
            inner.scanner.stop_scan(radio, out);
            inner.sender.destroy_channel(out);
        });
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    /// The state of the most recent connection attempt.
    pub fn connection_state(&self) -> ConnectionState {
        self.lock()
            .attempt
            .as_ref()
            .map_or(ConnectionState::Idle, Attempt::state)
    }

    /// The ATT MTU of the current link.
    pub fn mtu(&self) -> u16 {
        self.lock()
            .attempt
            .as_ref()
            .map_or(DEFAULT_MTU, Attempt::mtu)
    }

    /// The configuration of the most recent connection attempt.
    pub fn configuration(&self) -> Option<LinkConfiguration> {
        self.lock().attempt.as_ref().map(|a| a.config().clone())
    }

    /// The device of the most recent connection attempt.
    pub fn device(&self) -> Option<DeviceRecord> {
        self.lock().attempt.as_ref().map(|a| a.device().clone())
    }

    /// Delivers an event from the platform driver.
    ///
    /// Events that belong to an abandoned attempt, a finished scan or an unbound channel are
    /// dropped.
    pub fn handle_event(&self, event: RadioEvent) {
        self.with(|inner, radio, out| inner.dispatch(radio, event, out));
    }

    fn lock(&self) -> MutexGuard<'_, LinkInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_enabled(&self) -> Result<()> {
        if self.lock().enabled {
            Ok(())
        } else {
            warn!("link used before enable_radio()");
            Err(ErrorKind::Usage.into())
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut LinkInner, &dyn Radio, &mut Notifier) -> R) -> R {
        let mut out = Notifier::default();
        let result = {
            let mut inner = self.lock();
            f(&mut *inner, &*self.radio, &mut out)
        };
        out.run();
        result
    }
}

/// Access to discovery. Obtained with [`Link::scanner`].
#[derive(Debug, Clone, Copy)]
pub struct ScannerHandle<'a> {
    link: &'a Link,
}

impl ScannerHandle<'_> {
    pub fn scan(&self, kind: LinkType, duration: Option<Duration>, callback: Arc<dyn ScanCallback>) {
        self.link.with(|inner, radio, out| {
            let id = ScanId(inner.next_id());
            inner.scanner.scan(radio, id, kind, duration, callback, out);
        });
    }

    /// Returns whether a scan was active.
    pub fn stop(&self) -> bool {
        self.link
            .with(|inner, radio, out| inner.scanner.stop_scan(radio, out))
    }

    pub fn is_scanning(&self) -> bool {
        self.link.lock().scanner.is_scanning()
    }
}

/// Access to the connection state machine. Obtained with [`Link::connector`].
#[derive(Debug, Clone, Copy)]
pub struct ConnectorHandle<'a> {
    link: &'a Link,
}

impl ConnectorHandle<'_> {
    pub fn connect(
        &self,
        device: &DeviceRecord,
        config: LinkConfiguration,
        callback: Arc<dyn ConnectCallback>,
        notify_callback: Option<Arc<dyn NotifyCallback>>,
    ) -> Transport {
        self.link.with(|inner, radio, out| {
            inner.connect(radio, device, config, callback, notify_callback, out)
        })
    }

    pub fn disconnect(&self) {
        self.link.with(|inner, radio, out| {
            if inner.attempt.as_ref().is_some_and(Attempt::is_live) {
                info!("disconnect requested");
                inner.drive(radio, ConnectorEvent::Disconnect, out);
            }
        });
    }

    pub fn state(&self) -> ConnectionState {
        self.link.connection_state()
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub fn transport(&self) -> Option<Transport> {
        self.link.lock().attempt.as_ref().map(Attempt::transport)
    }
}

/// Access to the data channel. Obtained with [`Link::sender`].
#[derive(Debug, Clone, Copy)]
pub struct SenderHandle<'a> {
    link: &'a Link,
}

impl SenderHandle<'_> {
    pub fn send(&self, payload: impl Into<Vec<u8>>, callback: Arc<dyn SendCallback>) {
        let payload = payload.into();
        self.link
            .with(|inner, radio, out| inner.sender.send(radio, payload, callback, out));
    }

    /// Routes incoming data to `callback` until the next `send`.
    pub fn set_receive_callback(&self, callback: Arc<dyn SendCallback>) {
        self.link.lock().sender.set_receive_callback(callback);
    }

    pub fn destroy_channel(&self) {
        self.link.destroy_channel();
    }

    pub fn is_bound(&self) -> bool {
        self.link.lock().sender.is_bound()
    }

    pub fn target(&self) -> Option<ChannelTarget> {
        self.link.lock().sender.target().cloned()
    }

    /// The MTU writes are currently chunked for.
    pub fn mtu(&self) -> Option<u16> {
        self.link.lock().sender.mtu()
    }
}

impl LinkInner {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn connect(
        &mut self,
        radio: &dyn Radio,
        device: &DeviceRecord,
        config: LinkConfiguration,
        callback: Arc<dyn ConnectCallback>,
        notify_callback: Option<Arc<dyn NotifyCallback>>,
        out: &mut Notifier,
    ) -> Transport {
        // Tear down everything from before, in this order, before the first request for the new
        // attempt reaches the radio.
        if self.attempt.as_ref().is_some_and(Attempt::is_live) {
            info!("abandoning previous connection attempt");
            self.drive(radio, ConnectorEvent::Abandon, out);
        }
        self.sender.destroy_channel(out);
        self.scanner.stop_scan(radio, out);

        let bond_state = radio
            .remote_device(device.address())
            .map_or(device.bond_state(), |remote| remote.bond_state());
        let device = device.clone().with_bond_state(bond_state);

        let id = self.next_id();
        let (attempt, effects) = Attempt::start(
            id,
            device,
            config,
            Some(callback),
            notify_callback,
            radio.supports_mtu_negotiation(),
        );
        let transport = attempt.transport();
        self.attempt = Some(attempt);
        self.run(radio, effects, out);
        transport
    }

    fn drive(&mut self, radio: &dyn Radio, event: ConnectorEvent, out: &mut Notifier) {
        let Some(attempt) = self.attempt.take() else {
            return;
        };
        let (attempt, effects) = attempt.step(event);
        self.attempt = Some(attempt);
        self.run(radio, effects, out);
    }

    fn run(&mut self, radio: &dyn Radio, effects: Vec<Effect>, out: &mut Notifier) {
        let mut feedback = VecDeque::new();
        for effect in effects {
            if let Some(event) = self.apply(radio, effect, out) {
                feedback.push_back(event);
            }
        }
        while let Some(event) = feedback.pop_front() {
            self.drive(radio, event, out);
        }
    }

    /// Carries out one effect. Returns the event to feed back, if any.
    fn apply(
        &mut self,
        radio: &dyn Radio,
        effect: Effect,
        out: &mut Notifier,
    ) -> Option<ConnectorEvent> {
        let attempt = self.attempt.as_ref()?;
        let address = attempt.device().address();
        let refused = |request: Request| move |error: Error| ConnectorEvent::Refused(request, error);

        match (attempt.transport(), effect) {
            (_, Effect::RegisterPairingObserver) => {
                radio.register_pairing_observer(address);
                None
            }
            (_, Effect::UnregisterPairingObserver) => {
                radio.unregister_pairing_observer(address);
                None
            }
            (_, Effect::AutoPair) => {
                info!(address, "answering pairing request");
                radio
                    .attempt_auto_pair(address, AUTO_PAIR_PIN)
                    .err()
                    .map(refused(Request::AutoPair))
            }
            (Transport::Classic(task), Effect::ConnectClassic) => radio
                .connect_classic(task, attempt.device())
                .err()
                .map(refused(Request::ConnectClassic)),
            (Transport::Classic(task), Effect::CancelClassic) => {
                radio.cancel_classic(task);
                None
            }
            (Transport::Gatt(link), Effect::ConnectGatt) => radio
                .connect_gatt(link, attempt.device())
                .err()
                .map(refused(Request::ConnectGatt)),
            (Transport::Gatt(link), Effect::DisconnectGatt) => {
                radio.disconnect_gatt(link);
                None
            }
            (Transport::Gatt(link), Effect::CloseGatt) => {
                radio.close_gatt(link);
                None
            }
            (Transport::Gatt(link), Effect::DiscoverServices) => radio
                .discover_services(link)
                .err()
                .map(refused(Request::DiscoverServices)),
            (Transport::Gatt(link), Effect::RequestMtu(mtu)) => {
                debug!(%link, mtu, "requesting MTU");
                radio
                    .request_mtu(link, mtu)
                    .err()
                    .map(refused(Request::RequestMtu))
            }
            (Transport::Gatt(link), Effect::SetNotification(characteristic)) => {
                let result = radio.set_characteristic_notification(link, &characteristic, true);
                Some(ConnectorEvent::NotificationSet(result))
            }
            (Transport::Gatt(link), Effect::WriteDescriptor(descriptor, value)) => radio
                .write_descriptor(link, &descriptor, value.to_vec())
                .err()
                .map(refused(Request::WriteDescriptor)),
            (_, Effect::BindChannel(target)) => {
                if let Err(error) = self.sender.initialize(target, attempt.mtu()) {
                    warn!(%error, "data channel not bound");
                }
                None
            }
            (_, Effect::SetMtu(mtu)) => {
                self.sender.set_mtu(mtu);
                None
            }
            (_, Effect::DestroyChannel) => {
                self.sender.destroy_channel(out);
                None
            }
            (_, Effect::Report(report)) => {
                notify(attempt, &self.sender, report, out);
                None
            }
            (transport, effect) => {
                debug!(%transport, ?effect, "effect does not apply to transport");
                None
            }
        }
    }

    fn dispatch(&mut self, radio: &dyn Radio, event: RadioEvent, out: &mut Notifier) {
        match event {
            RadioEvent::DeviceDiscovered { scan, device } => {
                self.scanner.on_device_discovered(radio, scan, device, out)
            }
            RadioEvent::ScanStopped { scan } => self.scanner.on_scan_stopped(scan, out),
            RadioEvent::CharacteristicWritten {
                link,
                characteristic,
                result,
            } => {
                let bound = matches!(
                    self.sender.target(),
                    Some(ChannelTarget::Characteristic { link: l, characteristic: c })
                        if *l == link && c.handle() == characteristic
                );
                if bound {
                    self.sender.on_write_complete(radio, result, out);
                } else {
                    debug!(%link, characteristic, "write completion for unbound channel ignored");
                }
            }
            RadioEvent::StreamWritten { task, result } => {
                if self.sender.target() == Some(&ChannelTarget::Stream(task)) {
                    self.sender.on_write_complete(radio, result, out);
                } else {
                    debug!(%task, "write completion for unbound stream ignored");
                }
            }
            event => {
                if let Some(event) = self.route(event) {
                    self.drive(radio, event, out);
                }
            }
        }
    }

    /// Maps a radio event onto the live attempt, dropping events meant for any other.
    fn route(&self, event: RadioEvent) -> Option<ConnectorEvent> {
        let Some(attempt) = &self.attempt else {
            debug!(?event, "event without a connection attempt ignored");
            return None;
        };
        let address = attempt.device().address();
        let transport = attempt.transport();

        let routed = match event {
            RadioEvent::PairingRequested { address: from } if from == address => {
                ConnectorEvent::PairingRequested
            }
            RadioEvent::BondStateChanged { address: from, state } if from == address => {
                ConnectorEvent::BondStateChanged(state)
            }
            RadioEvent::ClassicConnectFinished { task, result }
                if transport == Transport::Classic(task) =>
            {
                ConnectorEvent::ClassicConnectFinished(result)
            }
            RadioEvent::StreamReceived { task, value } if transport == Transport::Classic(task) => {
                ConnectorEvent::StreamReceived(value)
            }
            RadioEvent::StreamClosed { task } if transport == Transport::Classic(task) => {
                ConnectorEvent::StreamClosed
            }
            RadioEvent::ConnectionStateChanged {
                link,
                state,
                result,
            } if transport == Transport::Gatt(link) => {
                ConnectorEvent::ConnectionStateChanged(state, result)
            }
            RadioEvent::ServicesDiscovered { link, result } if transport == Transport::Gatt(link) => {
                ConnectorEvent::ServicesDiscovered(result)
            }
            RadioEvent::MtuChanged { link, mtu, result } if transport == Transport::Gatt(link) => {
                ConnectorEvent::MtuChanged(mtu, result)
            }
            RadioEvent::DescriptorWritten {
                link,
                descriptor,
                result,
            } if transport == Transport::Gatt(link) => {
                ConnectorEvent::DescriptorWritten(descriptor, result)
            }
            RadioEvent::CharacteristicChanged { link, value, .. }
                if transport == Transport::Gatt(link) =>
            {
                ConnectorEvent::CharacteristicChanged(value)
            }
            event => {
                debug!(?event, "stale event ignored");
                return None;
            }
        };
        Some(routed)
    }
}

fn notify(attempt: &Attempt, sender: &Sender, report: Report, out: &mut Notifier) {
    let callback = attempt.callback();
    match report {
        Report::Connecting => call(out, callback, |cb| cb.on_connecting()),
        Report::Connected => call(out, callback, |cb| cb.on_connected()),
        Report::Ready => call(out, callback, |cb| cb.on_ready()),
        Report::Disconnecting => call(out, callback, |cb| cb.on_disconnecting()),
        Report::Disconnected => call(out, callback, |cb| cb.on_disconnected()),
        Report::Error(error) => call(out, callback, move |cb| cb.on_error(error)),
        Report::MtuChanged(mtu) => {
            call(out, attempt.config().mtu_callback(), move |cb| {
                cb.on_mtu_changed(mtu)
            });
        }
        Report::MtuFailed(mtu, error) => {
            call(out, attempt.config().mtu_callback(), move |cb| {
                cb.on_mtu_failure(mtu, error)
            });
        }
        Report::NotifyEnabled(characteristic) => {
            call(out, attempt.notify_callback(), move |cb| {
                cb.on_notify_success(&characteristic)
            });
        }
        Report::NotifyFailed(error) => {
            call(out, attempt.notify_callback(), move |cb| {
                cb.on_notify_failure(error)
            });
        }
        Report::Received(value) => sender.on_received(value, out),
    }
}
