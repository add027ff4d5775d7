use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::callback::ScanCallback;
use crate::device::{DeviceRecord, LinkType};
use crate::link::Notifier;
use crate::radio::{Radio, ScanId};

struct ScanSession {
    id: ScanId,
    kind: LinkType,
    deadline: Option<Instant>,
    callback: Arc<dyn ScanCallback>,
    devices: Vec<DeviceRecord>,
}

impl ScanSession {
    fn finish(self, out: &mut Notifier) {
        info!(scan = %self.id, kind = ?self.kind, found = self.devices.len(), "scan finished");
        let ScanSession {
            callback, devices, ..
        } = self;
        out.push(move || callback.on_scan_finished(&devices));
    }
}

/// Tracks the single active discovery session.
#[derive(Default)]
pub(crate) struct Scanner {
    session: Option<ScanSession>,
}

impl Scanner {
    pub(crate) fn is_scanning(&self) -> bool {
        self.session.is_some()
    }

    /// Starts a session, stopping the active one first.
    pub(crate) fn scan(
        &mut self,
        radio: &dyn Radio,
        id: ScanId,
        kind: LinkType,
        duration: Option<Duration>,
        callback: Arc<dyn ScanCallback>,
        out: &mut Notifier,
    ) {
        self.stop_scan(radio, out);

        if let Err(error) = radio.start_scan(id, kind, duration) {
            warn!(scan = %id, %error, "scan refused");
            out.push(move || callback.on_error(error));
            return;
        }
        info!(scan = %id, ?kind, ?duration, "scan started");
        let start_callback = callback.clone();
        out.push(move || start_callback.on_scan_start());
        self.session = Some(ScanSession {
            id,
            kind,
            deadline: duration.map(|d| Instant::now() + d),
            callback,
            devices: Vec::new(),
        });
    }

    /// Stops the active session, if any. Returns whether one was active.
    pub(crate) fn stop_scan(&mut self, radio: &dyn Radio, out: &mut Notifier) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };
        radio.stop_scan(session.id);
        session.finish(out);
        true
    }

    pub(crate) fn on_device_discovered(
        &mut self,
        radio: &dyn Radio,
        scan: ScanId,
        device: DeviceRecord,
        out: &mut Notifier,
    ) {
        let Some(session) = self.session.as_mut().filter(|s| s.id == scan) else {
            debug!(%scan, %device, "result from stale scan ignored");
            return;
        };
        if session.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            debug!(%scan, "scan past its deadline");
            self.stop_scan(radio, out);
            return;
        }

        match session
            .devices
            .iter_mut()
            .find(|known| known.address() == device.address())
        {
            // Late names are kept, but the device is only reported once.
            Some(known) if known.name().is_none() && device.name().is_some() => *known = device,
            Some(_) => {}
            None => {
                debug!(%scan, %device, "device found");
                session.devices.push(device.clone());
                let callback = session.callback.clone();
                out.push(move || callback.on_scanning(&device));
            }
        }
    }

    /// The radio ended the session on its own.
    pub(crate) fn on_scan_stopped(&mut self, scan: ScanId, out: &mut Notifier) {
        if self.session.as_ref().is_some_and(|s| s.id == scan) {
            if let Some(session) = self.session.take() {
                session.finish(out);
            }
        }
    }
}
