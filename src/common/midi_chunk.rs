//! one audio cycle's worth of raw MIDI, packed into a fixed buffer.
//!
//! The bridge never interprets MIDI.  Each event is the bytes jack gave us
//! plus the frame offset inside the cycle where it happened, packed as
//! [count:2][offset:2][len:2][bytes]... — the same layout the wire payload
//! uses, so encoding is a straight copy.  The buffer is fixed size and
//! every operation is bounds checked, which lets the real time callback
//! fill a recycled chunk without ever allocating.  An event that does not
//! fit is refused, never a panic.
use byteorder::{ByteOrder, NetworkEndian};
use simple_error::bail;
use std::fmt;

use super::box_error::BoxError;

/// packed bytes available for one cycle's events; plenty for hardware
/// MIDI rates, clips pathological software sysex floods
pub const MIDI_CHUNK_CAPACITY: usize = 4096;

pub struct MidiChunk {
    data: [u8; MIDI_CHUNK_CAPACITY],
    used: usize,
}

impl MidiChunk {
    /// build an empty chunk (count slot zeroed)
    pub fn build() -> MidiChunk {
        MidiChunk {
            data: [0; MIDI_CHUNK_CAPACITY],
            used: 2,
        }
    }

    /// empty the chunk for reuse without touching its storage
    pub fn clear(&mut self) -> () {
        NetworkEndian::write_u16(&mut self.data[0..2], 0);
        self.used = 2;
    }

    pub fn count(&self) -> u16 {
        NetworkEndian::read_u16(&self.data[0..2])
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Append one event.  false means it did not fit and was refused; the
    /// chunk stays well formed either way.
    pub fn push(&mut self, offset: u16, bytes: &[u8]) -> bool {
        if self.used + 4 + bytes.len() > MIDI_CHUNK_CAPACITY {
            return false;
        }
        NetworkEndian::write_u16(&mut self.data[self.used..self.used + 2], offset);
        NetworkEndian::write_u16(
            &mut self.data[self.used + 2..self.used + 4],
            bytes.len() as u16,
        );
        self.data[self.used + 4..self.used + 4 + bytes.len()].copy_from_slice(bytes);
        self.used += 4 + bytes.len();
        let count = self.count() + 1;
        NetworkEndian::write_u16(&mut self.data[0..2], count);
        true
    }

    /// the packed bytes as they go on the wire
    pub fn as_payload(&self) -> &[u8] {
        &self.data[..self.used]
    }

    /// Rebuild a chunk from a received wire payload, validating the whole
    /// structure first.  Anything inconsistent is an error the caller
    /// drops and counts.
    pub fn from_wire(payload: &[u8]) -> Result<Box<MidiChunk>, BoxError> {
        if payload.len() < 2 {
            bail!("midi payload too short for event count");
        }
        if payload.len() > MIDI_CHUNK_CAPACITY {
            bail!("midi payload of {} bytes exceeds chunk capacity", payload.len());
        }
        let count = NetworkEndian::read_u16(&payload[0..2]);
        let mut idx = 2;
        for _ in 0..count {
            if idx + 4 > payload.len() {
                bail!("midi payload truncated in event header");
            }
            let len = NetworkEndian::read_u16(&payload[idx + 2..idx + 4]) as usize;
            idx += 4;
            if idx + len > payload.len() {
                bail!("midi payload truncated in event bytes");
            }
            idx += len;
        }
        if idx != payload.len() {
            bail!("midi payload has {} trailing bytes", payload.len() - idx);
        }
        let mut chunk = Box::new(MidiChunk::build());
        chunk.data[..payload.len()].copy_from_slice(payload);
        chunk.used = payload.len();
        Ok(chunk)
    }

    /// walk the events as (offset, bytes) pairs
    pub fn iter(&self) -> MidiChunkIter {
        MidiChunkIter {
            data: &self.data[..self.used],
            idx: 2,
            remaining: self.count(),
        }
    }
}

/// Yields each event in chunk order.  The chunk was validated when it was
/// filled, so the walk trusts the packed lengths.
pub struct MidiChunkIter<'a> {
    data: &'a [u8],
    idx: usize,
    remaining: u16,
}

impl<'a> Iterator for MidiChunkIter<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<(u16, &'a [u8])> {
        if self.remaining == 0 || self.idx + 4 > self.data.len() {
            return None;
        }
        let offset = NetworkEndian::read_u16(&self.data[self.idx..self.idx + 2]);
        let len = NetworkEndian::read_u16(&self.data[self.idx + 2..self.idx + 4]) as usize;
        let start = self.idx + 4;
        if start + len > self.data.len() {
            return None;
        }
        self.idx = start + len;
        self.remaining -= 1;
        Some((offset, &self.data[start..start + len]))
    }
}

impl Clone for MidiChunk {
    fn clone(&self) -> MidiChunk {
        MidiChunk {
            data: self.data,
            used: self.used,
        }
    }
}

impl PartialEq for MidiChunk {
    fn eq(&self, other: &MidiChunk) -> bool {
        self.as_payload() == other.as_payload()
    }
}

impl fmt::Debug for MidiChunk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "MidiChunk {{ count: {}, used: {} }}",
            self.count(),
            self.used
        )
    }
}
