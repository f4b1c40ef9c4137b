//! chunk of bytes that carries one audio cycle or one MIDI batch
//!
//! This is the stuff that goes on the wire between transmit and receive
//! bridges.  It is very intentionally simple.  No compression, no variable
//! sample formats.  On a LAN there is nothing to gain from shaving bytes
//! and a lot to lose in encode latency, so audio rides as the raw f32
//! samples jack hands us, big endian.
use byteorder::{ByteOrder, NetworkEndian};
use simple_error::bail;
use std::fmt;

use super::{box_error::BoxError, midi_chunk::MidiChunk};

/// largest jack block we will bridge; one datagram per cycle
pub const MAX_BLOCK_SIZE: usize = 4096;

// Wire header layout, all fields network endian:
//   stream type     1 byte   (0 = audio, 1 = midi)
//   sequence        4 bytes
//   timestamp       8 bytes  (frames since stream start, from cycle count)
//   payload length  4 bytes
pub const NET_HEADER_SIZE: usize = 1 + 4 + 8 + 4;
pub const NET_BUF_SIZE: usize = NET_HEADER_SIZE + MAX_BLOCK_SIZE * 4;

const TYPE_AUDIO: u8 = 0;
const TYPE_MIDI: u8 = 1;

/// Kind tag carried in the first header byte.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StreamType {
    Audio,
    Midi,
}

/// Payload decoded off the wire.  Both variants are reusable storage: the
/// vector keeps its capacity and the chunk its fixed buffer, so frames can
/// circulate between the callback and the network thread without fresh
/// allocation.
#[derive(Clone, Debug, PartialEq)]
pub enum MediaPayload {
    Audio(Vec<f32>),
    Midi(Box<MidiChunk>),
}

/// the message that gets read/written on the udp socket
///
/// super simple by design.  just getters/setters over a packed buffer to
/// make sure everything is network endian.
pub struct NetMessage {
    buffer: [u8; NET_BUF_SIZE],
    nbytes: usize,
}

impl NetMessage {
    /// build an empty message
    pub fn build() -> NetMessage {
        NetMessage {
            buffer: [0; NET_BUF_SIZE],
            nbytes: NET_HEADER_SIZE,
        }
    }
    pub fn get_stream_type(&self) -> Result<StreamType, BoxError> {
        match self.buffer[0] {
            TYPE_AUDIO => Ok(StreamType::Audio),
            TYPE_MIDI => Ok(StreamType::Midi),
            t => bail!("unknown stream type tag: {}", t),
        }
    }
    pub fn set_stream_type(&mut self, t: StreamType) -> () {
        self.buffer[0] = match t {
            StreamType::Audio => TYPE_AUDIO,
            StreamType::Midi => TYPE_MIDI,
        };
    }
    /// per stream sequence number, assigned by the transmitter
    pub fn get_sequence_num(&self) -> u32 {
        NetworkEndian::read_u32(&self.buffer[1..5])
    }
    pub fn set_sequence_num(&mut self, seq: u32) -> () {
        NetworkEndian::write_u32(&mut self.buffer[1..5], seq)
    }
    /// capture timestamp in frames since the stream started
    pub fn get_timestamp(&self) -> u64 {
        NetworkEndian::read_u64(&self.buffer[5..13])
    }
    pub fn set_timestamp(&mut self, t: u64) -> () {
        NetworkEndian::write_u64(&mut self.buffer[5..13], t)
    }
    /// payload length the sender declared in the header
    pub fn get_payload_len(&self) -> usize {
        NetworkEndian::read_u32(&self.buffer[13..17]) as usize
    }
    fn set_payload_len(&mut self, len: usize) -> () {
        NetworkEndian::write_u32(&mut self.buffer[13..17], len as u32)
    }
    /// Get the address of the whole buffer (for reading from the socket)
    pub fn get_buffer(&mut self) -> &mut [u8] {
        &mut self.buffer
    }
    /// Get the slice of buffer that has data to put on the wire
    pub fn get_send_buffer(&self) -> &[u8] {
        &self.buffer[0..self.nbytes]
    }
    pub fn get_nbytes(&self) -> usize {
        self.nbytes
    }

    /// Encode one cycle of audio into the message.  Returns the number of
    /// bytes ready to send.
    pub fn encode_audio(&mut self, samples: &[f32]) -> usize {
        self.set_stream_type(StreamType::Audio);
        let mut idx = NET_HEADER_SIZE;
        for v in samples {
            NetworkEndian::write_f32(&mut self.buffer[idx..idx + 4], *v);
            idx += 4;
        }
        self.set_payload_len(idx - NET_HEADER_SIZE);
        self.nbytes = idx;
        idx
    }

    /// Encode one cycle's MIDI chunk.  Wire layout is a u16 event count
    /// then repeated (offset: u16, length: u16, raw bytes) triples, which
    /// is exactly how the chunk packs itself, so this is one copy.  A
    /// chunk can never outgrow the message buffer: its capacity is a
    /// fraction of the payload area and `MidiChunk::push` enforces it.
    pub fn encode_midi(&mut self, chunk: &MidiChunk) -> usize {
        self.set_stream_type(StreamType::Midi);
        let payload = chunk.as_payload();
        let idx = NET_HEADER_SIZE + payload.len();
        self.buffer[NET_HEADER_SIZE..idx].copy_from_slice(payload);
        self.set_payload_len(payload.len());
        self.nbytes = idx;
        idx
    }

    /// Decode the payload of a received message into typed form.
    ///
    /// Anything that does not check out is an error the receive loop drops
    /// and counts.  Nothing in here is fatal to the stream.
    pub fn decode_payload(&self) -> Result<MediaPayload, BoxError> {
        let declared = self.get_payload_len();
        if NET_HEADER_SIZE + declared != self.nbytes {
            bail!(
                "payload length mismatch: header says {}, datagram has {}",
                declared,
                self.nbytes - NET_HEADER_SIZE
            );
        }
        match self.get_stream_type()? {
            StreamType::Audio => self.decode_audio(declared),
            StreamType::Midi => self.decode_midi(declared),
        }
    }

    fn decode_audio(&self, declared: usize) -> Result<MediaPayload, BoxError> {
        if declared % 4 != 0 {
            bail!("audio payload is not whole samples: {} bytes", declared);
        }
        let mut samples: Vec<f32> = Vec::with_capacity(declared / 4);
        let mut idx = NET_HEADER_SIZE;
        for _ in 0..declared / 4 {
            samples.push(NetworkEndian::read_f32(&self.buffer[idx..idx + 4]));
            idx += 4;
        }
        Ok(MediaPayload::Audio(samples))
    }

    fn decode_midi(&self, declared: usize) -> Result<MediaPayload, BoxError> {
        let end = NET_HEADER_SIZE + declared;
        let chunk = MidiChunk::from_wire(&self.buffer[NET_HEADER_SIZE..end])?;
        Ok(MediaPayload::Midi(chunk))
    }

    /// set the number of bytes read off the socket into the buffer
    pub fn set_nbytes(&mut self, amt: usize) -> Result<(), BoxError> {
        if !self.is_valid(amt) {
            bail!("invalid packet size: {}", amt);
        }
        self.nbytes = amt;
        Ok(())
    }
    /// sanity check on a received size before anything trusts the content
    pub fn is_valid(&self, amt: usize) -> bool {
        amt >= NET_HEADER_SIZE && amt <= NET_BUF_SIZE
    }
}

impl fmt::Display for NetMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ type: {}, seq: {}, ts: {}, nbytes: {} }}",
            self.buffer[0],
            self.get_sequence_num(),
            self.get_timestamp(),
            self.nbytes
        )
    }
}

#[cfg(test)]
mod test_net_packet {
    use super::*;

    #[test]
    fn build() {
        // You should be able to build an empty message
        let mut msg = NetMessage::build();
        msg.set_sequence_num(33);
        assert_eq!(msg.get_sequence_num(), 33);
        assert_eq!(msg.get_nbytes(), NET_HEADER_SIZE);
    }
    #[test]
    fn timestamps() {
        let mut msg = NetMessage::build();
        msg.set_timestamp(44_321);
        assert_eq!(msg.get_timestamp(), 44_321);
    }
    #[test]
    fn is_valid() {
        // it should reject sizes that can't hold a header
        let msg = NetMessage::build();
        assert_eq!(msg.is_valid(0), false);
        assert_eq!(msg.is_valid(NET_HEADER_SIZE - 1), false);
        assert_eq!(msg.is_valid(NET_HEADER_SIZE + 128 * 4), true);
        assert_eq!(msg.is_valid(NET_BUF_SIZE + 1), false);
    }
    #[test]
    fn audio_round_trip() {
        // samples must come back bit exact, no lossy conversion
        let samples: Vec<f32> = (0..128).map(|n| (n as f32) / 128.0 - 0.5).collect();
        let mut msg = NetMessage::build();
        msg.set_sequence_num(7);
        msg.set_timestamp(7 * 128);
        let n = msg.encode_audio(&samples);
        assert_eq!(n, NET_HEADER_SIZE + 128 * 4);
        assert_eq!(msg.get_sequence_num(), 7);
        assert_eq!(msg.get_timestamp(), 7 * 128);
        match msg.decode_payload().unwrap() {
            MediaPayload::Audio(decoded) => assert_eq!(decoded, samples),
            _ => panic!("expected audio payload"),
        }
    }
    #[test]
    fn midi_round_trip() {
        // events at offsets [0, 64] in a 128 sample cycle, byte exact
        let mut chunk = MidiChunk::build();
        chunk.push(0, &[0x90, 0x3c, 0x7f]);
        chunk.push(64, &[0x80, 0x3c, 0x00]);
        let mut msg = NetMessage::build();
        msg.encode_midi(&chunk);
        match msg.decode_payload().unwrap() {
            MediaPayload::Midi(decoded) => assert_eq!(*decoded, chunk),
            _ => panic!("expected midi payload"),
        }
    }
    #[test]
    fn empty_midi_batch() {
        // a silent cycle still makes a well formed packet
        let mut msg = NetMessage::build();
        let n = msg.encode_midi(&MidiChunk::build());
        assert_eq!(n, NET_HEADER_SIZE + 2);
        match msg.decode_payload().unwrap() {
            MediaPayload::Midi(decoded) => assert!(decoded.is_empty()),
            _ => panic!("expected midi payload"),
        }
    }
    #[test]
    fn sysex_flood_is_clipped_not_fatal() {
        // five 4000 byte sysex dumps in one cycle: only what fits the
        // chunk is carried, encoding stays inside the message buffer, and
        // the packet decodes cleanly
        let mut chunk = MidiChunk::build();
        let sysex = vec![0x42u8; 4000];
        let mut accepted = 0;
        for _ in 0..5 {
            if chunk.push(0, &sysex) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        let mut msg = NetMessage::build();
        let n = msg.encode_midi(&chunk);
        assert!(n <= NET_BUF_SIZE);
        match msg.decode_payload().unwrap() {
            MediaPayload::Midi(decoded) => assert_eq!(decoded.count(), 1),
            _ => panic!("expected midi payload"),
        }
    }
    #[test]
    fn length_mismatch_is_error() {
        let samples = vec![0.25f32; 64];
        let mut msg = NetMessage::build();
        let n = msg.encode_audio(&samples);
        // pretend the datagram came up short
        msg.set_nbytes(n - 8).unwrap();
        assert!(msg.decode_payload().is_err());
    }
    #[test]
    fn truncated_midi_is_error() {
        let mut chunk = MidiChunk::build();
        chunk.push(10, &[0xf0, 0x01, 0x02, 0x03, 0xf7]);
        let mut msg = NetMessage::build();
        let n = msg.encode_midi(&chunk);
        // chop the tail off the sysex but fix up the header to match
        NetworkEndian::write_u32(&mut msg.get_buffer()[13..17], (n - NET_HEADER_SIZE - 2) as u32);
        msg.set_nbytes(n - 2).unwrap();
        assert!(msg.decode_payload().is_err());
    }
    #[test]
    fn bad_type_tag_is_error() {
        let mut msg = NetMessage::build();
        let n = msg.encode_audio(&[0.0; 4]);
        msg.get_buffer()[0] = 9;
        msg.set_nbytes(n).unwrap();
        assert!(msg.decode_payload().is_err());
    }
}
