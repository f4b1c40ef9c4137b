//! the one network loop servicing every stream in the process
//!
//! Transmit streams: drain the ring, stamp sequence and timestamp, encode,
//! send.  Receive streams: pull everything off the socket, decode into the
//! jitter buffer, then top the ring up so the callback always finds a
//! frame.  All socket work is nonblocking; the loop sleeps for a fraction
//! of one audio cycle between passes so no stream can starve another.
//!
//! Streams arrive over an mpsc channel from the manager and leave by
//! cooperative stop flag or terminal failure.  The loop exits once the
//! manager is gone and the last stream has been dropped.
use log::{debug, error, warn};
use std::sync::{mpsc, Arc};
use std::thread::sleep;
use std::time::Duration;

use crate::common::{
    get_micro_time,
    midi_chunk::MidiChunk,
    multicast_socket::MulticastSocket,
    net_packet::{MediaPayload, NetMessage, StreamType},
    ring_buffer::{FrameConsumer, FrameProducer},
    stream_stat::MicroTimer,
};

use super::{jitter_buffer::JitterBuffer, stream_shared::StreamShared};

/// sleep between passes; well under one 128 frame cycle at 48kHz
const POLL_INTERVAL_US: u64 = 500;
/// status log cadence
const STATUS_INTERVAL_US: u128 = 2_000_000;

/// network end of a transmit stream
pub struct SendStream {
    shared: Arc<StreamShared>,
    sock: MulticastSocket,
    rx: FrameConsumer<MediaPayload>,
    /// empty frames going back to the callback for refilling
    recycle: FrameProducer<MediaPayload>,
    msg: NetMessage,
    seq: u32,
    /// frames since the stream started, advanced one block per packet
    frame_clock: u64,
    block_size: usize,
}

impl SendStream {
    pub fn build(
        shared: Arc<StreamShared>,
        sock: MulticastSocket,
        rx: FrameConsumer<MediaPayload>,
        recycle: FrameProducer<MediaPayload>,
        block_size: usize,
    ) -> SendStream {
        SendStream {
            shared,
            sock,
            rx,
            recycle,
            msg: NetMessage::build(),
            seq: 0,
            frame_clock: 0,
            block_size,
        }
    }

    /// returns false when the stream should be dropped from the loop
    fn service(&mut self) -> bool {
        if self.shared.is_stopped() {
            self.rx.drain();
            return false;
        }
        while self.rx.slots() > 0 {
            let mut payload = match self.rx.try_pop() {
                Some(p) => p,
                None => break,
            };
            match &payload {
                MediaPayload::Audio(samples) => self.msg.encode_audio(samples),
                MediaPayload::Midi(chunk) => self.msg.encode_midi(chunk),
            };
            self.msg.set_sequence_num(self.seq);
            self.msg.set_timestamp(self.frame_clock);
            match self.sock.send(self.msg.get_send_buffer()) {
                Ok(_) => {
                    self.shared.count_sent();
                }
                Err(e) => {
                    error!("stream {}: send failed: {}", self.shared.get_name(), e);
                    self.shared.mark_failed();
                    return false;
                }
            }
            // the spent frame goes back to the callback empty; the
            // recycle ring holds every frame in circulation, so this
            // push cannot fail
            match &mut payload {
                MediaPayload::Audio(samples) => samples.clear(),
                MediaPayload::Midi(chunk) => chunk.clear(),
            }
            self.recycle.try_push(payload);
            self.seq = self.seq.wrapping_add(1);
            self.frame_clock += self.block_size as u64;
        }
        true
    }
}

/// network end of a receive stream
pub struct RecvStream {
    shared: Arc<StreamShared>,
    sock: MulticastSocket,
    tx: FrameProducer<MediaPayload>,
    /// spent frames coming back from the callback to be freed here
    recycle: FrameConsumer<MediaPayload>,
    jitter: JitterBuffer<MediaPayload>,
    msg: NetMessage,
    stream_type: StreamType,
    block_size: usize,
    status_timer: MicroTimer,
}

impl RecvStream {
    pub fn build(
        shared: Arc<StreamShared>,
        sock: MulticastSocket,
        tx: FrameProducer<MediaPayload>,
        recycle: FrameConsumer<MediaPayload>,
        jitter: JitterBuffer<MediaPayload>,
        stream_type: StreamType,
        block_size: usize,
    ) -> RecvStream {
        RecvStream {
            shared,
            sock,
            tx,
            recycle,
            jitter,
            msg: NetMessage::build(),
            stream_type,
            block_size,
            status_timer: MicroTimer::build(get_micro_time(), STATUS_INTERVAL_US),
        }
    }

    /// what a lost or not-yet-arrived cycle sounds like
    fn gap_payload(&self) -> MediaPayload {
        match self.stream_type {
            StreamType::Audio => MediaPayload::Audio(vec![0.0; self.block_size]),
            StreamType::Midi => MediaPayload::Midi(Box::new(MidiChunk::build())),
        }
    }

    fn pull_socket(&mut self) -> bool {
        loop {
            match self.sock.recv_nonblocking(self.msg.get_buffer()) {
                Ok(Some(nbytes)) => {
                    if self.msg.set_nbytes(nbytes).is_err() {
                        self.shared.count_decode_error();
                        continue;
                    }
                    match self.msg.decode_payload() {
                        Ok(payload) => {
                            self.shared.count_received();
                            self.jitter.put(self.msg.get_sequence_num(), payload);
                        }
                        Err(e) => {
                            // a mangled packet is dropped, not fatal
                            debug!("stream {}: {}", self.shared.get_name(), e);
                            self.shared.count_decode_error();
                        }
                    }
                }
                Ok(None) => return true,
                Err(e) => {
                    error!("stream {}: receive failed: {}", self.shared.get_name(), e);
                    self.shared.mark_failed();
                    return false;
                }
            }
        }
    }

    fn service(&mut self) -> bool {
        if self.shared.is_stopped() {
            return false;
        }
        // spent frames from the callback get freed on this thread, so
        // the real time side never deallocates
        self.recycle.drain();
        if !self.pull_socket() {
            return false;
        }
        // top up the ring so the callback has one frame per cycle, gaps
        // and all; the scheduler never holds output back for a packet
        while self.tx.slots() > 0 {
            let frame = match self.jitter.take_next() {
                Some(p) => p,
                None => self.gap_payload(),
            };
            self.tx.try_push(frame);
        }
        self.shared.store_jitter_counts(
            self.jitter.get_gaps(),
            self.jitter.get_late_drops(),
            self.jitter.get_duplicates(),
            self.jitter.get_resyncs(),
        );
        let now = get_micro_time();
        if self.status_timer.expired(now) {
            self.status_timer.reset(now);
            debug!("stream {} jitter: {}", self.shared.get_name(), self.jitter);
        }
        true
    }
}

pub enum NetStream {
    Send(SendStream),
    Recv(RecvStream),
}

impl NetStream {
    fn service(&mut self) -> bool {
        match self {
            NetStream::Send(s) => s.service(),
            NetStream::Recv(r) => r.service(),
        }
    }
}

/// Body of the process-wide network thread.  Runs until the manager drops
/// its channel end and every stream has been retired.
pub fn run(stream_rx: mpsc::Receiver<NetStream>) -> () {
    debug!("network thread started");
    let mut streams: Vec<NetStream> = Vec::new();
    let mut disconnected = false;
    loop {
        loop {
            match stream_rx.try_recv() {
                Ok(stream) => streams.push(stream),
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }
        streams.retain_mut(|s| s.service());
        if disconnected && streams.is_empty() {
            break;
        }
        sleep(Duration::from_micros(POLL_INTERVAL_US));
    }
    warn!("network thread exiting");
}

#[cfg(test)]
mod test_network_thread {
    use super::*;
    use crate::common::ring_buffer::FramePipe;
    use crate::common::stream_spec::{StreamKind, StreamSpec};
    use std::net::Ipv4Addr;

    fn spec(kind: StreamKind, port: u16) -> StreamSpec {
        StreamSpec {
            name: "net:test".to_string(),
            kind,
            group: Ipv4Addr::new(239, 88, 77, 65),
            port,
            ttl: 1,
            interface: "127.0.0.1".to_string(),
            jitter_target: 2,
        }
    }

    #[test]
    fn send_stream_ships_queued_frames() {
        let rx_sock =
            MulticastSocket::receiver(&spec(StreamKind::AudioReceiver, 41310)).unwrap();
        let tx_sock =
            MulticastSocket::transmitter(&spec(StreamKind::AudioTransmitter, 41310)).unwrap();
        let shared = Arc::new(StreamShared::build("net:test"));
        let (mut tx, rx) = FramePipe::build(4);
        let (recycle_tx, mut recycle_rx) = FramePipe::build(5);
        let mut stream = SendStream::build(shared.clone(), tx_sock, rx, recycle_tx, 8);
        assert!(tx.try_push(MediaPayload::Audio(vec![0.5; 8])));
        assert!(tx.try_push(MediaPayload::Audio(vec![0.25; 8])));
        assert!(stream.service());
        // spent frames come back empty with their storage intact, ready
        // for the callback to refill without allocating
        assert_eq!(recycle_rx.slots(), 2);
        match recycle_rx.try_pop() {
            Some(MediaPayload::Audio(buf)) => {
                assert!(buf.is_empty());
                assert!(buf.capacity() >= 8);
            }
            other => panic!("wrong frame on the recycle ring: {:?}", other),
        }
        // both frames should arrive with sequence numbers 0 and 1
        let mut msg = NetMessage::build();
        for want_seq in 0u32..2 {
            let mut got = None;
            for _ in 0..100 {
                if let Some(n) = rx_sock.recv_nonblocking(msg.get_buffer()).unwrap() {
                    got = Some(n);
                    break;
                }
                std::thread::sleep(Duration::from_millis(2));
            }
            msg.set_nbytes(got.expect("datagram did not arrive")).unwrap();
            assert_eq!(msg.get_sequence_num(), want_seq);
            assert_eq!(msg.get_timestamp(), want_seq as u64 * 8);
            assert!(matches!(
                msg.decode_payload().unwrap(),
                MediaPayload::Audio(_)
            ));
        }
    }

    #[test]
    fn recv_stream_fills_ring_with_preroll_gaps() {
        // before any packet arrives the callback still gets frames
        let sock = MulticastSocket::receiver(&spec(StreamKind::AudioReceiver, 41311)).unwrap();
        let shared = Arc::new(StreamShared::build("net:test"));
        let (tx, mut ring_rx) = FramePipe::build(4);
        let (mut spent_tx, recycle) = FramePipe::build(6);
        let jitter = JitterBuffer::build(2, 16);
        let mut stream =
            RecvStream::build(shared, sock, tx, recycle, jitter, StreamType::Audio, 8);
        assert!(stream.service());
        let frame = ring_rx.try_pop().unwrap();
        assert_eq!(frame, MediaPayload::Audio(vec![0.0; 8]));
        // a spent frame handed back gets cleaned up on the next pass
        assert!(spent_tx.try_push(frame));
        assert!(stream.service());
        assert_eq!(spent_tx.slots(), 6);
    }

    #[test]
    fn stopped_stream_retires() {
        let sock = MulticastSocket::receiver(&spec(StreamKind::AudioReceiver, 41312)).unwrap();
        let shared = Arc::new(StreamShared::build("net:test"));
        let (tx, _ring_rx) = FramePipe::build(4);
        let (_spent_tx, recycle) = FramePipe::build(6);
        let jitter = JitterBuffer::build(2, 16);
        let mut stream =
            RecvStream::build(shared.clone(), sock, tx, recycle, jitter, StreamType::Audio, 8);
        shared.request_stop();
        assert!(!stream.service());
    }
}
