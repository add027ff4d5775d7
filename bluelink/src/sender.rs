//! The data channel bound once a connection is ready.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::callback::SendCallback;
use crate::characteristic::{Characteristic, CharacteristicWriteType};
use crate::config::DEFAULT_MTU;
use crate::device::LinkType;
use crate::error::{Error, ErrorKind, Result};
use crate::link::Notifier;
use crate::radio::{ClassicTaskId, LinkId, Radio};

/// ATT header bytes taken from every write.
const ATT_HEADER_LEN: u16 = 3;

/// What a bound channel writes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelTarget {
    /// The resolved write characteristic of a GATT link.
    Characteristic {
        link: LinkId,
        characteristic: Characteristic,
    },
    /// The serial stream of a classic link.
    Stream(ClassicTaskId),
}

impl ChannelTarget {
    pub fn link_type(&self) -> LinkType {
        match self {
            ChannelTarget::Characteristic { .. } => LinkType::LowEnergy,
            ChannelTarget::Stream(_) => LinkType::Classic,
        }
    }
}

struct Outgoing {
    chunks: VecDeque<Vec<u8>>,
    len: usize,
    callback: Arc<dyn SendCallback>,
}

struct DataChannel {
    target: ChannelTarget,
    write_type: CharacteristicWriteType,
    mtu: u16,
    queue: VecDeque<Outgoing>,
    in_flight: bool,
}

impl DataChannel {
    /// Largest write the target accepts in one go. Streams take whole payloads.
    fn chunk_len(&self) -> Option<usize> {
        match self.target {
            ChannelTarget::Characteristic { .. } => {
                Some(usize::from(self.mtu.max(DEFAULT_MTU) - ATT_HEADER_LEN))
            }
            ChannelTarget::Stream(_) => None,
        }
    }

    fn write(&self, radio: &dyn Radio, chunk: Vec<u8>) -> Result<()> {
        match &self.target {
            ChannelTarget::Characteristic {
                link,
                characteristic,
            } => radio.write_characteristic(*link, characteristic, chunk, self.write_type),
            ChannelTarget::Stream(task) => radio.write_stream(*task, chunk),
        }
    }
}

/// Serializes writes on the bound channel and hands incoming data to the receive callback.
///
/// At most one write is in flight. Payloads larger than the MTU allows are split into chunks,
/// and each payload's callback fires once, after its last chunk completes or on its first error.
#[derive(Default)]
pub(crate) struct Sender {
    channel: Option<DataChannel>,
    receive_callback: Option<Arc<dyn SendCallback>>,
}

impl Sender {
    pub(crate) fn initialize(&mut self, target: ChannelTarget, mtu: u16) -> Result<()> {
        if self.channel.is_some() {
            return Err(Error::with_message(
                ErrorKind::Usage,
                "data channel already bound",
            ));
        }
        let write_type = match &target {
            ChannelTarget::Characteristic { characteristic, .. } => {
                characteristic.preferred_write_type()
            }
            ChannelTarget::Stream(_) => CharacteristicWriteType::WithResponse,
        };
        debug!(?target, mtu, ?write_type, "data channel bound");
        self.channel = Some(DataChannel {
            target,
            write_type,
            mtu,
            queue: VecDeque::new(),
            in_flight: false,
        });
        Ok(())
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.channel.is_some()
    }

    pub(crate) fn target(&self) -> Option<&ChannelTarget> {
        self.channel.as_ref().map(|c| &c.target)
    }

    pub(crate) fn mtu(&self) -> Option<u16> {
        self.channel.as_ref().map(|c| c.mtu)
    }

    /// Applies a renegotiated MTU to writes that have not started yet.
    pub(crate) fn set_mtu(&mut self, mtu: u16) {
        if let Some(channel) = &mut self.channel {
            channel.mtu = mtu;
        }
    }

    pub(crate) fn set_receive_callback(&mut self, callback: Arc<dyn SendCallback>) {
        self.receive_callback = Some(callback);
    }

    pub(crate) fn send(
        &mut self,
        radio: &dyn Radio,
        payload: Vec<u8>,
        callback: Arc<dyn SendCallback>,
        out: &mut Notifier,
    ) {
        self.receive_callback = Some(callback.clone());

        let Some(channel) = &mut self.channel else {
            warn!(len = payload.len(), "send without a data channel");
            out.push(move || callback.on_error(ErrorKind::NotConnected.into()));
            return;
        };

        let len = payload.len();
        if len == 0 {
            out.push(move || callback.on_sent(0));
            return;
        }

        let chunks: VecDeque<Vec<u8>> = match channel.chunk_len() {
            Some(chunk_len) => payload.chunks(chunk_len).map(<[u8]>::to_vec).collect(),
            None => VecDeque::from([payload]),
        };
        trace!(len, chunks = chunks.len(), "payload queued");
        channel.queue.push_back(Outgoing {
            chunks,
            len,
            callback,
        });
        self.pump(radio, out);
    }

    /// Starts the next write if none is in flight.
    fn pump(&mut self, radio: &dyn Radio, out: &mut Notifier) {
        let Some(channel) = &mut self.channel else {
            return;
        };
        while !channel.in_flight {
            let Some(outgoing) = channel.queue.front_mut() else {
                return;
            };
            let Some(chunk) = outgoing.chunks.pop_front() else {
                // Every chunk of this payload has been written.
                if let Some(done) = channel.queue.pop_front() {
                    out.push(move || done.callback.on_sent(done.len));
                }
                continue;
            };
            match channel.write(radio, chunk) {
                Ok(()) => channel.in_flight = true,
                Err(error) => {
                    warn!(%error, "write refused");
                    if let Some(failed) = channel.queue.pop_front() {
                        let error = error.into_kind(ErrorKind::WriteFailed);
                        out.push(move || failed.callback.on_error(error));
                    }
                }
            }
        }
    }

    /// Completion of the write in flight.
    pub(crate) fn on_write_complete(
        &mut self,
        radio: &dyn Radio,
        result: Result<()>,
        out: &mut Notifier,
    ) {
        let Some(channel) = &mut self.channel else {
            return;
        };
        if !channel.in_flight {
            debug!("unexpected write completion ignored");
            return;
        }
        channel.in_flight = false;

        if let Err(error) = result {
            warn!(%error, "write failed");
            if let Some(failed) = channel.queue.pop_front() {
                let error = error.into_kind(ErrorKind::WriteFailed);
                out.push(move || failed.callback.on_error(error));
            }
        }
        self.pump(radio, out);
    }

    pub(crate) fn on_received(&self, value: Vec<u8>, out: &mut Notifier) {
        match &self.receive_callback {
            Some(callback) => {
                let callback = callback.clone();
                out.push(move || callback.on_received(&value));
            }
            None => trace!(len = value.len(), "received data without a receive callback"),
        }
    }

    /// Unbinds the channel. Queued payloads fail with [`ErrorKind::NotConnected`].
    ///
    /// Returns `false` if no channel was bound.
    pub(crate) fn destroy_channel(&mut self, out: &mut Notifier) -> bool {
        let Some(channel) = self.channel.take() else {
            return false;
        };
        debug!(target = ?channel.target, pending = channel.queue.len(), "data channel destroyed");
        for outgoing in channel.queue {
            out.push(move || outgoing.callback.on_error(ErrorKind::NotConnected.into()));
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::characteristic::CharacteristicProperties;
    use crate::mock::{MockRadio, RadioCall};
    use crate::uuids::DEFAULT_WRITE_CHARACTERISTIC;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl SendCallback for Recorder {
        fn on_sent(&self, len: usize) {
            self.events.lock().unwrap().push(format!("sent {len}"));
        }

        fn on_received(&self, data: &[u8]) {
            self.events.lock().unwrap().push(format!("received {data:?}"));
        }

        fn on_error(&self, error: Error) {
            self.events.lock().unwrap().push(format!("error {:?}", error.kind()));
        }
    }

    impl Recorder {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    fn gatt_target() -> ChannelTarget {
        ChannelTarget::Characteristic {
            link: LinkId(1),
            characteristic: Characteristic::new(
                0x10,
                DEFAULT_WRITE_CHARACTERISTIC,
                CharacteristicProperties::WRITE,
            ),
        }
    }

    fn written(radio: &MockRadio) -> Vec<Vec<u8>> {
        radio
            .take_calls()
            .into_iter()
            .filter_map(|call| match call {
                RadioCall::WriteCharacteristic { value, .. } => Some(value),
                RadioCall::WriteStream { value, .. } => Some(value),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn payloads_are_chunked_and_serialized() {
        let radio = MockRadio::new();
        let recorder = Arc::new(Recorder::default());
        let mut sender = Sender::default();
        let mut out = Notifier::default();
        sender.initialize(gatt_target(), DEFAULT_MTU).unwrap();

        let payload: Vec<u8> = (0..45).collect();
        sender.send(&radio, payload.clone(), recorder.clone(), &mut out);
        sender.send(&radio, vec![0xaa], recorder.clone(), &mut out);

        // Only the first 20-byte chunk is on the air.
        assert_eq!(written(&radio), vec![payload[..20].to_vec()]);

        sender.on_write_complete(&radio, Ok(()), &mut out);
        sender.on_write_complete(&radio, Ok(()), &mut out);
        assert_eq!(
            written(&radio),
            vec![payload[20..40].to_vec(), payload[40..].to_vec()]
        );
        out.run();
        assert!(recorder.take().is_empty());

        let mut out = Notifier::default();
        sender.on_write_complete(&radio, Ok(()), &mut out);
        assert_eq!(written(&radio), vec![vec![0xaa]]);
        sender.on_write_complete(&radio, Ok(()), &mut out);
        out.run();
        assert_eq!(recorder.take(), vec!["sent 45", "sent 1"]);
    }

    #[test]
    fn larger_mtu_means_larger_chunks() {
        let radio = MockRadio::new();
        let mut sender = Sender::default();
        let mut out = Notifier::default();
        sender.initialize(gatt_target(), DEFAULT_MTU).unwrap();
        sender.set_mtu(103);

        sender.send(&radio, vec![1; 150], Arc::new(Recorder::default()), &mut out);
        assert_eq!(written(&radio)[0].len(), 100);
        assert_eq!(sender.mtu(), Some(103));
    }

    #[test]
    fn failed_chunk_drops_the_rest_of_its_payload() {
        let radio = MockRadio::new();
        let recorder = Arc::new(Recorder::default());
        let mut sender = Sender::default();
        let mut out = Notifier::default();
        sender.initialize(gatt_target(), DEFAULT_MTU).unwrap();

        sender.send(&radio, vec![1; 50], recorder.clone(), &mut out);
        sender.send(&radio, vec![2; 5], recorder.clone(), &mut out);
        sender.on_write_complete(&radio, Err(ErrorKind::Other.into()), &mut out);

        // The next payload starts right away.
        assert_eq!(written(&radio), vec![vec![1; 20], vec![2; 5]]);
        sender.on_write_complete(&radio, Ok(()), &mut out);
        out.run();
        assert_eq!(recorder.take(), vec!["error WriteFailed", "sent 5"]);
    }

    #[test]
    fn streams_are_written_whole() {
        let radio = MockRadio::new();
        let recorder = Arc::new(Recorder::default());
        let mut sender = Sender::default();
        let mut out = Notifier::default();
        sender
            .initialize(ChannelTarget::Stream(ClassicTaskId(4)), DEFAULT_MTU)
            .unwrap();

        sender.send(&radio, vec![7; 300], recorder.clone(), &mut out);
        assert_eq!(written(&radio), vec![vec![7; 300]]);
    }

    #[test]
    fn send_without_channel_reports_not_connected() {
        let radio = MockRadio::new();
        let recorder = Arc::new(Recorder::default());
        let mut sender = Sender::default();
        let mut out = Notifier::default();

        sender.send(&radio, vec![1, 2, 3], recorder.clone(), &mut out);
        out.run();
        assert_eq!(recorder.take(), vec!["error NotConnected"]);
        assert!(radio.take_calls().is_empty());
    }

    #[test]
    fn destroy_is_idempotent_and_fails_queued_payloads() {
        let radio = MockRadio::new();
        let recorder = Arc::new(Recorder::default());
        let mut sender = Sender::default();
        let mut out = Notifier::default();

        assert!(!sender.destroy_channel(&mut out));
        sender.initialize(gatt_target(), DEFAULT_MTU).unwrap();
        assert!(sender.initialize(gatt_target(), DEFAULT_MTU).is_err());
        sender.send(&radio, vec![1; 4], recorder.clone(), &mut out);
        sender.send(&radio, vec![2; 4], recorder.clone(), &mut out);

        assert!(sender.destroy_channel(&mut out));
        assert!(!sender.destroy_channel(&mut out));
        assert!(!sender.is_bound());
        out.run();
        assert_eq!(recorder.take(), vec!["error NotConnected", "error NotConnected"]);
    }

    #[test]
    fn latest_send_callback_receives() {
        let radio = MockRadio::new();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let mut sender = Sender::default();
        let mut out = Notifier::default();
        sender.initialize(gatt_target(), DEFAULT_MTU).unwrap();

        sender.send(&radio, vec![1], first.clone(), &mut out);
        sender.send(&radio, vec![2], second.clone(), &mut out);
        sender.on_received(vec![9, 9], &mut out);
        out.run();

        assert!(first.take().is_empty());
        assert_eq!(second.take(), vec!["received [9, 9]"]);
    }
}
