//! per stream jack client setup
//!
//! Like the original tool, every stream gets its own jack client with a
//! single registered port.  That keeps teardown honest: deactivating the
//! client joins the process callback, so when `deactivate` returns the
//! audio thread is provably done with this stream's ring end and the port
//! is unregistered with the client.
use log::{info, warn};
use simple_error::bail;
use std::sync::Arc;

use crate::common::{
    box_error::BoxError,
    midi_chunk::MidiChunk,
    multicast_socket::MulticastSocket,
    net_packet::{MediaPayload, StreamType, MAX_BLOCK_SIZE},
    ring_buffer::{FramePipe, DEFAULT_PIPE_CAPACITY},
    stream_spec::{StreamKind, StreamSpec},
};

use super::{
    jitter_buffer::{JitterBuffer, JITTER_WINDOW_CAPACITY},
    network_thread::{NetStream, RecvStream, SendStream},
    process::{BridgePort, BridgeProcess},
    stream_shared::StreamShared,
};

pub type ActiveClient = jack::AsyncClient<Notifications, BridgeProcess>;

/// everything one stream needs, built but not yet running
pub struct StreamParts {
    client: jack::Client,
    process: BridgeProcess,
    /// handed to the network thread before activation
    pub net: Option<NetStream>,
    pub block_size: usize,
    pub sample_rate: usize,
}

impl StreamParts {
    /// Create the jack client, register the stream's port, and wire the
    /// ring pipe between the callback side and the network side.
    pub fn build(
        spec: &StreamSpec,
        shared: Arc<StreamShared>,
        sock: MulticastSocket,
    ) -> Result<StreamParts, BoxError> {
        let (client, _status) =
            jack::Client::new(&spec.client_name(), jack::ClientOptions::NO_START_SERVER)?;
        let block_size = client.buffer_size() as usize;
        let sample_rate = client.sample_rate();
        if block_size > MAX_BLOCK_SIZE {
            bail!(
                "jack block size {} exceeds the wire maximum {}",
                block_size,
                MAX_BLOCK_SIZE
            );
        }
        info!(
            "stream {}: jack client '{}', {} frames @ {} Hz",
            spec.name,
            spec.client_name(),
            block_size,
            sample_rate
        );

        // data pipe carries filled frames toward the network (transmit)
        // or toward the callback (receive); the recycle pipe carries the
        // same frames back the other way so the callback never allocates.
        // Transmit pools are seeded here with every frame that will ever
        // circulate; receive frames are born in the decoder and die on
        // the network thread.
        let (pipe_tx, pipe_rx) = FramePipe::build(DEFAULT_PIPE_CAPACITY);
        let (mut recycle_tx, recycle_rx) = FramePipe::build(DEFAULT_PIPE_CAPACITY + 2);
        if spec.kind.is_transmitter() {
            for _ in 0..DEFAULT_PIPE_CAPACITY + 1 {
                let frame = if spec.kind.is_audio() {
                    MediaPayload::Audio(Vec::with_capacity(block_size))
                } else {
                    MediaPayload::Midi(Box::new(MidiChunk::build()))
                };
                recycle_tx.try_push(frame);
            }
        }
        let (bridge_port, net) = match spec.kind {
            StreamKind::AudioTransmitter => {
                let port = client.register_port(spec.port_name(), jack::AudioIn::default())?;
                (
                    BridgePort::AudioIn {
                        port,
                        tx: pipe_tx,
                        recycle: recycle_rx,
                    },
                    NetStream::Send(SendStream::build(
                        shared.clone(),
                        sock,
                        pipe_rx,
                        recycle_tx,
                        block_size,
                    )),
                )
            }
            StreamKind::MidiTransmitter => {
                let port = client.register_port(spec.port_name(), jack::MidiIn::default())?;
                (
                    BridgePort::MidiIn {
                        port,
                        tx: pipe_tx,
                        recycle: recycle_rx,
                    },
                    NetStream::Send(SendStream::build(
                        shared.clone(),
                        sock,
                        pipe_rx,
                        recycle_tx,
                        block_size,
                    )),
                )
            }
            StreamKind::AudioReceiver => {
                let port = client.register_port(spec.port_name(), jack::AudioOut::default())?;
                let jitter = JitterBuffer::build(spec.jitter_target, JITTER_WINDOW_CAPACITY);
                (
                    BridgePort::AudioOut {
                        port,
                        rx: pipe_rx,
                        recycle: recycle_tx,
                    },
                    NetStream::Recv(RecvStream::build(
                        shared.clone(),
                        sock,
                        pipe_tx,
                        recycle_rx,
                        jitter,
                        StreamType::Audio,
                        block_size,
                    )),
                )
            }
            StreamKind::MidiReceiver => {
                let port = client.register_port(spec.port_name(), jack::MidiOut::default())?;
                let jitter = JitterBuffer::build(spec.jitter_target, JITTER_WINDOW_CAPACITY);
                (
                    BridgePort::MidiOut {
                        port,
                        rx: pipe_rx,
                        recycle: recycle_tx,
                    },
                    NetStream::Recv(RecvStream::build(
                        shared.clone(),
                        sock,
                        pipe_tx,
                        recycle_rx,
                        jitter,
                        StreamType::Midi,
                        block_size,
                    )),
                )
            }
        };

        Ok(StreamParts {
            client,
            process: BridgeProcess::build(bridge_port, shared),
            net: Some(net),
            block_size,
            sample_rate,
        })
    }

    /// start the callback running
    pub fn activate(self, stream_name: &str) -> Result<ActiveClient, BoxError> {
        let active = self
            .client
            .activate_async(Notifications::build(stream_name), self.process)?;
        Ok(active)
    }
}

pub struct Notifications {
    stream: String,
}

impl Notifications {
    pub fn build(stream: &str) -> Notifications {
        Notifications {
            stream: stream.to_string(),
        }
    }
}

impl jack::NotificationHandler for Notifications {
    fn shutdown(&mut self, status: jack::ClientStatus, reason: &str) {
        warn!(
            "stream {}: jack shutdown with status {:?}: \"{}\"",
            self.stream, status, reason
        );
    }

    fn sample_rate(&mut self, _: &jack::Client, srate: jack::Frames) -> jack::Control {
        info!("stream {}: jack sample rate changed to {}", self.stream, srate);
        jack::Control::Continue
    }

    fn xrun(&mut self, _: &jack::Client) -> jack::Control {
        warn!("stream {}: jack xrun", self.stream);
        jack::Control::Continue
    }
}
