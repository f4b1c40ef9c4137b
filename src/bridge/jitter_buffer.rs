//! sequence ordered jitter buffer and playback scheduler
//!
//! The receive side's answer to loss, reordering, and timing variance.
//! Arriving packets go into a bounded window keyed by sequence number.  A
//! playback cursor walks the sequence space one step per audio cycle and
//! takes whatever is at the cursor, present or not.  The cursor never
//! waits for a packet: a miss comes out as a gap the caller renders as
//! silence (audio) or an empty batch (MIDI).  That trade is deliberate.
//! Real time output can stall for nothing, so occasional silence buys
//! unconditional forward progress.
//!
//! Three behaviors:
//! - Filling: until `target_depth` packets are buffered the scheduler
//!   hands out pre-roll gaps and leaves the cursor unset.  Playback then
//!   starts at the lowest buffered sequence.
//! - Steady: one `take_next` per cycle, present-or-gap, cursor +1.
//! - Resync: a packet behind the cursor is stale and dropped.  A packet
//!   at or past `cursor + capacity` means the window died (sender restart
//!   or a long stall), so the cursor jumps to `newest - target_depth` and
//!   the dead span is discarded rather than buffered without bound.
use std::collections::BTreeMap;
use std::fmt;

use crate::common::stream_stat::StreamStat;

/// how far ahead of the cursor the window will hold packets
pub const JITTER_WINDOW_CAPACITY: usize = 64;

pub struct JitterBuffer<T> {
    window: BTreeMap<u32, T>,
    cursor: u32,
    target_depth: usize,
    capacity: usize,
    filling: bool,
    /// consecutive steady-state misses, used to fall back to filling
    miss_run: usize,
    depth_stats: StreamStat,
    puts: usize,
    gets: usize,
    gaps: usize,
    preroll: usize,
    late_drops: usize,
    duplicates: usize,
    resyncs: usize,
}

impl<T> JitterBuffer<T> {
    pub fn build(target_depth: usize, capacity: usize) -> JitterBuffer<T> {
        // a window smaller than its fill target can never leave Filling
        let capacity = capacity.max(target_depth);
        JitterBuffer {
            window: BTreeMap::new(),
            cursor: 0,
            target_depth,
            capacity,
            filling: true,
            miss_run: 0,
            depth_stats: StreamStat::build(50),
            puts: 0,
            gets: 0,
            gaps: 0,
            preroll: 0,
            late_drops: 0,
            duplicates: 0,
            resyncs: 0,
        }
    }

    /// Offer an arriving packet to the window.
    pub fn put(&mut self, seq: u32, payload: T) -> () {
        self.puts += 1;
        if self.filling {
            if self.window.insert(seq, payload).is_some() {
                self.duplicates += 1;
            }
            if self.window.len() >= self.target_depth {
                // playback starts at the oldest thing we have
                self.filling = false;
                self.miss_run = 0;
                if let Some(first) = self.window.keys().next() {
                    self.cursor = *first;
                }
            }
            return;
        }
        if seq < self.cursor {
            // the cursor already played a gap for this slot
            self.late_drops += 1;
            return;
        }
        if (seq - self.cursor) as usize >= self.capacity {
            // window died; jump to the newest arrival and keep a cushion
            self.resyncs += 1;
            self.cursor = seq.saturating_sub(self.target_depth as u32);
            self.window = self.window.split_off(&self.cursor);
        }
        if self.window.insert(seq, payload).is_some() {
            self.duplicates += 1;
        }
    }

    /// Emit the payload for the next audio cycle.  None means gap: the
    /// caller renders silence or an empty batch.  Called exactly once per
    /// cycle's worth of output; the cursor advances regardless.
    pub fn take_next(&mut self) -> Option<T> {
        self.gets += 1;
        self.depth_stats.add_sample(self.window.len() as f64);
        if self.filling {
            self.preroll += 1;
            return None;
        }
        let payload = self.window.remove(&self.cursor);
        self.cursor = self.cursor.wrapping_add(1);
        match payload {
            Some(p) => {
                self.miss_run = 0;
                Some(p)
            }
            None => {
                self.gaps += 1;
                self.miss_run += 1;
                if self.miss_run > self.capacity && self.window.is_empty() {
                    // the stream went away; re-arm so the next burst of
                    // packets gets a fresh pre-roll instead of a sprint
                    self.filling = true;
                    self.miss_run = 0;
                }
                None
            }
        }
    }

    pub fn is_filling(&self) -> bool {
        self.filling
    }
    /// next sequence number the scheduler will emit
    pub fn cursor(&self) -> u32 {
        self.cursor
    }
    pub fn depth(&self) -> usize {
        self.window.len()
    }
    pub fn avg_depth(&self) -> f64 {
        self.depth_stats.get_mean()
    }
    pub fn get_gaps(&self) -> usize {
        self.gaps
    }
    pub fn get_preroll(&self) -> usize {
        self.preroll
    }
    pub fn get_late_drops(&self) -> usize {
        self.late_drops
    }
    pub fn get_duplicates(&self) -> usize {
        self.duplicates
    }
    pub fn get_resyncs(&self) -> usize {
        self.resyncs
    }
}

impl<T> fmt::Display for JitterBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ cursor: {}, depth: {}, avg_depth: {:.2}, gaps: {}, late: {}, dups: {}, resyncs: {} }}",
            self.cursor,
            self.window.len(),
            self.depth_stats.get_mean(),
            self.gaps,
            self.late_drops,
            self.duplicates,
            self.resyncs
        )
    }
}

#[cfg(test)]
mod test_jitter_buffer {
    use super::*;

    fn filled_from(first_seq: u32) -> JitterBuffer<u32> {
        // target 3, capacity 8, loaded until steady
        let mut buf = JitterBuffer::build(3, 8);
        for n in 0..3 {
            buf.put(first_seq + n, first_seq + n);
        }
        assert!(!buf.is_filling());
        buf
    }

    #[test]
    fn fills_before_playing() {
        // It should hand out pre-roll gaps until target_depth packets are in
        let mut buf: JitterBuffer<u32> = JitterBuffer::build(3, 8);
        assert!(buf.is_filling());
        assert!(buf.take_next().is_none());
        buf.put(100, 100);
        buf.put(101, 101);
        assert!(buf.is_filling());
        assert!(buf.take_next().is_none());
        buf.put(102, 102);
        assert!(!buf.is_filling());
        // playback starts at the oldest buffered sequence
        assert_eq!(buf.cursor(), 100);
        assert_eq!(buf.take_next(), Some(100));
        assert_eq!(buf.get_preroll(), 2);
        assert_eq!(buf.get_gaps(), 0);
    }

    #[test]
    fn missing_packet_is_one_gap() {
        // packets [100..110) minus 105: cycle 105 is the gap, the rest play
        let mut buf: JitterBuffer<u32> = JitterBuffer::build(3, 16);
        for seq in 100u32..110 {
            if seq != 105 {
                buf.put(seq, seq);
            }
        }
        for seq in 100u32..110 {
            let out = buf.take_next();
            if seq == 105 {
                assert_eq!(out, None);
            } else {
                assert_eq!(out, Some(seq));
            }
        }
        assert_eq!(buf.get_gaps(), 1);
    }

    #[test]
    fn reordered_arrivals_play_in_order() {
        let mut buf: JitterBuffer<u32> = JitterBuffer::build(3, 8);
        for seq in [2u32, 0, 1, 4, 3] {
            buf.put(seq, seq);
        }
        for seq in 0u32..5 {
            assert_eq!(buf.take_next(), Some(seq));
        }
        assert_eq!(buf.get_gaps(), 0);
    }

    #[test]
    fn stale_packet_is_dropped() {
        let mut buf = filled_from(100);
        assert_eq!(buf.take_next(), Some(100));
        assert_eq!(buf.take_next(), Some(101));
        // 100 shows up again after its slot already played
        buf.put(100, 100);
        assert_eq!(buf.get_late_drops(), 1);
        assert_eq!(buf.take_next(), Some(102));
    }

    #[test]
    fn duplicate_is_counted_not_fatal() {
        let mut buf = filled_from(0);
        buf.put(2, 2);
        assert_eq!(buf.get_duplicates(), 1);
        assert_eq!(buf.take_next(), Some(0));
    }

    #[test]
    fn burst_ahead_resyncs() {
        // a packet past cursor + capacity must jump the cursor forward,
        // land within target_depth of the newest sequence, and leave the
        // window bounded
        let mut buf = filled_from(0);
        buf.put(1000, 1000);
        assert_eq!(buf.get_resyncs(), 1);
        assert_eq!(buf.cursor(), 1000 - 3);
        assert!(buf.depth() <= 8);
        // the cursor gaps its way up to the new packet, then plays it
        assert_eq!(buf.take_next(), None);
        assert_eq!(buf.take_next(), None);
        assert_eq!(buf.take_next(), None);
        assert_eq!(buf.take_next(), Some(1000));
    }

    #[test]
    fn long_silence_rearms_filling() {
        let mut buf = filled_from(0);
        for _ in 0..3 {
            buf.take_next();
        }
        // window is dry; spin well past capacity worth of misses
        for _ in 0..12 {
            buf.take_next();
        }
        assert!(buf.is_filling());
    }

    #[test]
    fn cursor_never_regresses_in_steady_state() {
        // arbitrary loss, duplication, and reordering: cursor is monotone
        use rand::{rngs::StdRng, Rng, SeedableRng};
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut buf: JitterBuffer<u32> = JitterBuffer::build(3, 16);
        let mut last_cursor = 0;
        let mut seq = 0u32;
        for _ in 0..2000 {
            // a few arrivals per cycle, shuffled around the nominal order
            for _ in 0..rng.gen_range(0..3) {
                let jitter: i64 = rng.gen_range(-4..8);
                let s = (seq as i64 + jitter).max(0) as u32;
                if rng.gen_range(0..200) != 0 {
                    buf.put(s, s);
                }
                seq = seq.wrapping_add(1);
            }
            let _ = buf.take_next();
            if buf.is_filling() {
                // re-arming starts a new playback epoch
                last_cursor = 0;
            } else {
                assert!(buf.cursor() >= last_cursor);
                last_cursor = buf.cursor();
            }
            assert!(buf.depth() <= 16);
        }
    }
}
