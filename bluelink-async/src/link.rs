use std::ops::Deref;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bluelink::{
    Characteristic, ConnectCallback, DeviceRecord, Link, LinkConfiguration, LinkType, MtuCallback,
    NotifyCallback, Radio, ScanCallback, SendCallback,
};
use futures_channel::{mpsc, oneshot};
use tracing::debug;

use crate::error::{Error, ErrorKind, Result};
use crate::util::{BroadcastReceiver, BroadcastSender, broadcast, defer, lock, watch};

/// Progress of connection attempts, in the order they were reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connecting,
    Connected,
    Ready,
    Disconnecting,
    Disconnected,
    Error(bluelink::Error),
}

/// A [`Link`] whose operations are futures and whose callbacks are channels.
///
/// Platform events are still delivered with [`Link::handle_event`], which this type derefs to.
#[derive(Clone)]
pub struct LinkAsync {
    inner: Arc<Link>,
    delegate: Arc<LinkAsyncDelegate>,
}

impl std::fmt::Debug for LinkAsync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LinkAsync").field(&self.inner).finish()
    }
}

impl Deref for LinkAsync {
    type Target = Link;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl LinkAsync {
    pub fn new(radio: Arc<dyn Radio>) -> Self {
        LinkAsync {
            inner: Arc::new(Link::new(radio)),
            delegate: Arc::new(LinkAsyncDelegate::new()),
        }
    }

    /// Enables the adapter and routes incoming data to [`LinkAsync::received`].
    pub fn enable_radio(&self) -> Result<()> {
        self.inner.enable_radio()?;
        self.inner
            .sender()?
            .set_receive_callback(self.delegate.clone());
        Ok(())
    }

    /// Connects to `device` and waits until the link is ready.
    ///
    /// Dropping the future before it completes disconnects the attempt it started. The future
    /// fails with [`ErrorKind::Canceled`] if the attempt is abandoned for a newer one.
    pub async fn connect(&self, device: &DeviceRecord, config: LinkConfiguration) -> Result<()> {
        let (sender, receiver) = oneshot::channel();
        let callback = Arc::new(AttemptCallback {
            delegate: self.delegate.clone(),
            pending: Mutex::new(Some(sender)),
        });
        let notify: Arc<dyn NotifyCallback> = self.delegate.clone();
        let transport = self.inner.connect(device, config, callback, Some(notify))?;

        let guard = defer(|| {
            let connector = self.inner.connector();
            if let Ok(connector) = connector {
                if connector.transport() == Some(transport) && !connector.state().is_terminal() {
                    debug!(?transport, "connect future dropped, disconnecting");
                    connector.disconnect();
                }
            }
        });

        let res = receiver.await;
        guard.defuse();
        res?
    }

    /// Disconnects the live attempt and waits until the link is down.
    pub async fn disconnect(&self) -> Result<()> {
        let mut events = self.delegate.connection_events.new_receiver();
        self.inner.disconnect()?;

        while !self.inner.connection_state().is_terminal() {
            match events.recv().await {
                Ok(ConnectionEvent::Disconnected) => break,
                Ok(_) | Err(async_broadcast::RecvError::Overflowed(_)) => {}
                Err(async_broadcast::RecvError::Closed) => return Err(ErrorKind::Canceled.into()),
            }
        }
        Ok(())
    }

    /// Writes `payload` to the data channel and waits until every chunk is acknowledged.
    /// Returns the number of bytes written.
    pub async fn send(&self, payload: impl Into<Vec<u8>>) -> Result<usize> {
        let (sender, receiver) = oneshot::channel();
        self.inner.send(
            payload,
            Arc::new(SendOnce {
                delegate: self.delegate.clone(),
                pending: Mutex::new(Some(sender)),
            }),
        )?;
        receiver.await?
    }

    /// Starts a scan and streams each newly found device.
    ///
    /// The stream ends when the scan finishes. Dropping the receiver stops the scan at the next
    /// discovery.
    pub fn scan(
        &self,
        kind: LinkType,
        duration: Option<Duration>,
    ) -> Result<mpsc::UnboundedReceiver<DeviceRecord>> {
        let (sender, receiver) = mpsc::unbounded();
        self.inner.start_scan(
            kind,
            duration,
            Arc::new(ScanStream {
                sender,
                link: Arc::downgrade(&self.inner),
            }),
        )?;
        Ok(receiver)
    }

    /// Pass this to [`LinkConfigurationBuilder::mtu`](bluelink::LinkConfigurationBuilder::mtu)
    /// to observe negotiation through [`LinkAsync::mtu_updates`].
    pub fn mtu_callback(&self) -> Arc<dyn MtuCallback> {
        self.delegate.clone()
    }

    pub fn connection_events(&self) -> BroadcastReceiver<ConnectionEvent> {
        self.delegate.connection_events.new_receiver()
    }

    /// Every error reported to a connection attempt.
    pub fn errors(&self) -> BroadcastReceiver<bluelink::Error> {
        self.delegate.errors.new_receiver()
    }

    pub fn received(&self) -> BroadcastReceiver<Vec<u8>> {
        self.delegate.received.new_receiver()
    }

    pub fn mtu_updates(&self) -> BroadcastReceiver<std::result::Result<u16, bluelink::Error>> {
        self.delegate.mtu_updates.new_receiver()
    }

    pub fn notify_updates(
        &self,
    ) -> BroadcastReceiver<std::result::Result<Characteristic, bluelink::Error>> {
        self.delegate.notify_updates.new_receiver()
    }
}

struct LinkAsyncDelegate {
    connection_events: BroadcastSender<ConnectionEvent>,
    errors: BroadcastSender<bluelink::Error>,
    received: BroadcastSender<Vec<u8>>,
    mtu_updates: BroadcastSender<std::result::Result<u16, bluelink::Error>>,
    notify_updates: BroadcastSender<std::result::Result<Characteristic, bluelink::Error>>,
}

impl LinkAsyncDelegate {
    fn new() -> Self {
        LinkAsyncDelegate {
            connection_events: broadcast(16),
            errors: broadcast(16),
            received: broadcast(16),
            mtu_updates: watch(),
            notify_updates: watch(),
        }
    }

    fn connection_event(&self, event: ConnectionEvent) {
        let _ = self.connection_events.try_broadcast(event);
    }
}

impl NotifyCallback for LinkAsyncDelegate {
    fn on_notify_success(&self, characteristic: &Characteristic) {
        let _ = self.notify_updates.try_broadcast(Ok(characteristic.clone()));
    }

    fn on_notify_failure(&self, error: bluelink::Error) {
        let _ = self.notify_updates.try_broadcast(Err(error));
    }
}

impl MtuCallback for LinkAsyncDelegate {
    fn on_mtu_changed(&self, mtu: u16) {
        let _ = self.mtu_updates.try_broadcast(Ok(mtu));
    }

    fn on_mtu_failure(&self, _mtu: u16, error: bluelink::Error) {
        let _ = self.mtu_updates.try_broadcast(Err(error));
    }
}

impl SendCallback for LinkAsyncDelegate {
    fn on_received(&self, data: &[u8]) {
        let _ = self.received.try_broadcast(data.to_vec());
    }
}

/// Resolves one `connect` future and mirrors its attempt onto the shared channels.
struct AttemptCallback {
    delegate: Arc<LinkAsyncDelegate>,
    pending: Mutex<Option<oneshot::Sender<Result<()>>>>,
}

impl AttemptCallback {
    fn resolve(&self, result: Result<()>) {
        if let Some(sender) = lock(&self.pending).take() {
            let _ = sender.send(result);
        }
    }
}

impl ConnectCallback for AttemptCallback {
    fn on_connecting(&self) {
        self.delegate.connection_event(ConnectionEvent::Connecting);
    }

    fn on_connected(&self) {
        self.delegate.connection_event(ConnectionEvent::Connected);
    }

    fn on_ready(&self) {
        self.delegate.connection_event(ConnectionEvent::Ready);
        self.resolve(Ok(()));
    }

    fn on_disconnecting(&self) {
        self.delegate.connection_event(ConnectionEvent::Disconnecting);
    }

    fn on_disconnected(&self) {
        self.delegate.connection_event(ConnectionEvent::Disconnected);
        self.resolve(Err(ErrorKind::Canceled.into()));
    }

    fn on_error(&self, error: bluelink::Error) {
        let _ = self.delegate.errors.try_broadcast(error.clone());
        self.delegate
            .connection_event(ConnectionEvent::Error(error.clone()));
        // Resolution errors leave the attempt usable and are followed by `on_ready`.
        if matches!(
            error.kind(),
            bluelink::ErrorKind::ConnectFailed | bluelink::ErrorKind::ServiceDiscoveryFailed
        ) {
            self.resolve(Err(Error::from(error)));
        }
    }
}

struct SendOnce {
    delegate: Arc<LinkAsyncDelegate>,
    pending: Mutex<Option<oneshot::Sender<Result<usize>>>>,
}

impl SendOnce {
    fn resolve(&self, result: Result<usize>) {
        if let Some(sender) = lock(&self.pending).take() {
            let _ = sender.send(result);
        }
    }
}

impl SendCallback for SendOnce {
    fn on_sent(&self, len: usize) {
        self.resolve(Ok(len));
    }

    fn on_received(&self, data: &[u8]) {
        self.delegate.on_received(data);
    }

    fn on_error(&self, error: bluelink::Error) {
        self.resolve(Err(error.into()));
    }
}

struct ScanStream {
    sender: mpsc::UnboundedSender<DeviceRecord>,
    link: Weak<Link>,
}

impl ScanCallback for ScanStream {
    fn on_scanning(&self, device: &DeviceRecord) {
        if self.sender.unbounded_send(device.clone()).is_err() {
            if let Some(link) = self.link.upgrade() {
                debug!("scan receiver dropped, stopping scan");
                link.stop_scan();
            }
        }
    }

    fn on_scan_finished(&self, _devices: &[DeviceRecord]) {
        self.sender.close_channel();
    }

    fn on_error(&self, _error: bluelink::Error) {
        self.sender.close_channel();
    }
}

