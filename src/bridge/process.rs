//! the real time side of one stream
//!
//! [`BridgeProcess`] is the process handler jack calls every cycle.  The
//! only thing it is allowed to touch besides its own port is the stream's
//! ring pipes and the shared atomics.  No sockets, no locks, no logging,
//! and no allocation: frames are fixed storage that circulates between
//! the callback and the network thread on a pair of rings.  Capture sides
//! pop an empty frame off the recycle ring, fill it in place, and queue
//! it; playback sides pop a filled frame, copy it out, and return the
//! spent frame on the recycle ring.  When no frame is available the cycle
//! is silence plus a counter, never a wait.
use std::sync::Arc;

use crate::common::{
    net_packet::MediaPayload,
    ring_buffer::{FrameConsumer, FrameProducer},
};

use super::stream_shared::StreamShared;

/// the stream's port plus the ring ends this thread owns
pub enum BridgePort {
    /// capture a jack audio port and queue its blocks for transmit
    AudioIn {
        port: jack::Port<jack::AudioIn>,
        tx: FrameProducer<MediaPayload>,
        recycle: FrameConsumer<MediaPayload>,
    },
    /// play received blocks out a jack audio port
    AudioOut {
        port: jack::Port<jack::AudioOut>,
        rx: FrameConsumer<MediaPayload>,
        recycle: FrameProducer<MediaPayload>,
    },
    /// capture jack MIDI events and queue one chunk per cycle
    MidiIn {
        port: jack::Port<jack::MidiIn>,
        tx: FrameProducer<MediaPayload>,
        recycle: FrameConsumer<MediaPayload>,
    },
    /// play received MIDI chunks out a jack MIDI port
    MidiOut {
        port: jack::Port<jack::MidiOut>,
        rx: FrameConsumer<MediaPayload>,
        recycle: FrameProducer<MediaPayload>,
    },
}

pub struct BridgeProcess {
    port: BridgePort,
    shared: Arc<StreamShared>,
}

impl BridgeProcess {
    pub fn build(port: BridgePort, shared: Arc<StreamShared>) -> BridgeProcess {
        BridgeProcess { port, shared }
    }

    fn silence(&mut self, ps: &jack::ProcessScope) -> () {
        match &mut self.port {
            BridgePort::AudioOut { port, .. } => {
                for s in port.as_mut_slice(ps) {
                    *s = 0.0;
                }
            }
            BridgePort::MidiOut { port, .. } => {
                // taking the writer clears the port buffer
                let _writer = port.writer(ps);
            }
            _ => {}
        }
    }
}

impl jack::ProcessHandler for BridgeProcess {
    fn process(&mut self, _: &jack::Client, ps: &jack::ProcessScope) -> jack::Control {
        self.shared.tick();
        if self.shared.is_stopped() {
            // quiet output while the control thread tears us down
            self.silence(ps);
            return jack::Control::Continue;
        }
        match &mut self.port {
            BridgePort::AudioIn { port, tx, recycle } => {
                let samples = port.as_slice(ps);
                match recycle.try_pop() {
                    Some(MediaPayload::Audio(mut buf)) => {
                        // copy within the buffer's preallocated capacity
                        buf.clear();
                        let n = samples.len().min(buf.capacity());
                        buf.extend_from_slice(&samples[..n]);
                        if !tx.try_push(MediaPayload::Audio(buf)) {
                            self.shared.count_overrun();
                        }
                    }
                    _ => {
                        // the network thread hasn't returned a frame yet
                        self.shared.count_overrun();
                    }
                }
            }
            BridgePort::AudioOut { port, rx, recycle } => {
                let out = port.as_mut_slice(ps);
                match rx.try_pop() {
                    Some(MediaPayload::Audio(frame)) => {
                        let n = frame.len().min(out.len());
                        out[..n].copy_from_slice(&frame[..n]);
                        for s in &mut out[n..] {
                            *s = 0.0;
                        }
                        // hand the spent frame back for the network
                        // thread to free or refill
                        recycle.try_push(MediaPayload::Audio(frame));
                    }
                    _ => {
                        // starved: play silence, keep the cadence
                        self.shared.count_underrun();
                        for s in out {
                            *s = 0.0;
                        }
                    }
                }
            }
            BridgePort::MidiIn { port, tx, recycle } => {
                match recycle.try_pop() {
                    Some(MediaPayload::Midi(mut chunk)) => {
                        chunk.clear();
                        for raw in port.iter(ps) {
                            let offset = raw.time.min(u16::MAX as u32) as u16;
                            if !chunk.push(offset, raw.bytes) {
                                // a cycle so stuffed it overflows the
                                // chunk loses the tail, not the stream
                                self.shared.count_overrun();
                            }
                        }
                        // empty chunks go too, so the receiver's loss
                        // detection has a packet per cycle to sequence
                        // against
                        if !tx.try_push(MediaPayload::Midi(chunk)) {
                            self.shared.count_overrun();
                        }
                    }
                    _ => {
                        self.shared.count_overrun();
                    }
                }
            }
            BridgePort::MidiOut { port, rx, recycle } => {
                let mut writer = port.writer(ps);
                match rx.try_pop() {
                    Some(MediaPayload::Midi(chunk)) => {
                        let last_frame = ps.n_frames().saturating_sub(1);
                        for (offset, bytes) in chunk.iter() {
                            let time = (offset as u32).min(last_frame);
                            let _ = writer.write(&jack::RawMidi { time, bytes });
                        }
                        recycle.try_push(MediaPayload::Midi(chunk));
                    }
                    _ => {
                        self.shared.count_underrun();
                    }
                }
            }
        }
        jack::Control::Continue
    }
}
