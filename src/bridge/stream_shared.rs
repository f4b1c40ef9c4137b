//! per stream state shared between the callback, network, and control threads
//!
//! All of it is atomics.  The real time callback only ever does relaxed
//! loads and stores here, never locks.  The counters exist for status
//! reporting; nothing in the data path makes decisions off them except
//! the stop and failed flags.
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

pub struct StreamShared {
    name: String,
    stop: AtomicBool,
    failed: AtomicBool,
    /// cycles the jack callback has run for this stream
    cycles: AtomicU64,
    overruns: AtomicUsize,
    underruns: AtomicUsize,
    packets_sent: AtomicUsize,
    packets_received: AtomicUsize,
    decode_errors: AtomicUsize,
    gap_frames: AtomicUsize,
    late_drops: AtomicUsize,
    duplicates: AtomicUsize,
    resyncs: AtomicUsize,
}

impl StreamShared {
    pub fn build(name: &str) -> StreamShared {
        StreamShared {
            name: name.to_string(),
            stop: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
            overruns: AtomicUsize::new(0),
            underruns: AtomicUsize::new(0),
            packets_sent: AtomicUsize::new(0),
            packets_received: AtomicUsize::new(0),
            decode_errors: AtomicUsize::new(0),
            gap_frames: AtomicUsize::new(0),
            late_drops: AtomicUsize::new(0),
            duplicates: AtomicUsize::new(0),
            resyncs: AtomicUsize::new(0),
        }
    }
    pub fn get_name(&self) -> &str {
        &self.name
    }

    /// cooperative stop: both threads check this each pass
    pub fn request_stop(&self) -> () {
        self.stop.store(true, Ordering::Release);
    }
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
    /// terminal failure: the stream stops but stays reportable
    pub fn mark_failed(&self) -> () {
        self.failed.store(true, Ordering::Release);
        self.request_stop();
    }
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn tick(&self) -> () {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }
    pub fn get_cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }
    pub fn count_overrun(&self) -> () {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }
    pub fn count_underrun(&self) -> () {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }
    pub fn count_sent(&self) -> () {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }
    pub fn count_received(&self) -> () {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }
    pub fn count_decode_error(&self) -> () {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }
    /// network thread publishes the jitter buffer's counters each pass
    pub fn store_jitter_counts(
        &self,
        gaps: usize,
        late_drops: usize,
        duplicates: usize,
        resyncs: usize,
    ) -> () {
        self.gap_frames.store(gaps, Ordering::Relaxed);
        self.late_drops.store(late_drops, Ordering::Relaxed);
        self.duplicates.store(duplicates, Ordering::Relaxed);
        self.resyncs.store(resyncs, Ordering::Relaxed);
    }

    pub fn get_status(&self) -> serde_json::Value {
        json!({
            "name": self.name,
            "failed": self.is_failed(),
            "cycles": self.get_cycles(),
            "overruns": self.overruns.load(Ordering::Relaxed),
            "underruns": self.underruns.load(Ordering::Relaxed),
            "packets_sent": self.packets_sent.load(Ordering::Relaxed),
            "packets_received": self.packets_received.load(Ordering::Relaxed),
            "decode_errors": self.decode_errors.load(Ordering::Relaxed),
            "gap_frames": self.gap_frames.load(Ordering::Relaxed),
            "late_drops": self.late_drops.load(Ordering::Relaxed),
            "duplicates": self.duplicates.load(Ordering::Relaxed),
            "resyncs": self.resyncs.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod test_stream_shared {
    use super::*;

    #[test]
    fn stop_and_fail_flags() {
        let shared = StreamShared::build("test:port");
        assert!(!shared.is_stopped());
        shared.request_stop();
        assert!(shared.is_stopped());
        assert!(!shared.is_failed());
        shared.mark_failed();
        assert!(shared.is_failed());
    }

    #[test]
    fn status_has_counters() {
        let shared = StreamShared::build("test:port");
        shared.count_sent();
        shared.count_sent();
        shared.tick();
        let status = shared.get_status();
        assert_eq!(status["name"], "test:port");
        assert_eq!(status["packets_sent"], 2);
        assert_eq!(status["cycles"], 1);
    }
}
