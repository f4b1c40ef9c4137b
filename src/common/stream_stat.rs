//! small windowed statistics and timing helpers for the network loop
use std::fmt;

use serde::Serialize;

/// Exponentially windowed mean/deviation over a stream of samples.  Used
/// to watch jitter window depth without keeping history.
#[derive(Debug, Serialize)]
pub struct StreamStat {
    mean: f64,
    sigma: f64,
    window: u64,
}

impl StreamStat {
    pub fn build(window_size: u64) -> StreamStat {
        StreamStat {
            mean: 0.0,
            sigma: 0.0,
            window: window_size,
        }
    }
    pub fn clear(&mut self) -> () {
        self.mean = 0.0;
        self.sigma = 0.0;
    }
    pub fn get_mean(&self) -> f64 {
        self.mean
    }
    pub fn get_sigma(&self) -> f64 {
        self.sigma
    }
    pub fn add_sample(&mut self, sample: f64) -> () {
        let scale = (self.window as f64 - 1.0) / self.window as f64;
        self.mean = scale * (self.mean + sample / self.window as f64);
        self.sigma = scale * (self.sigma + (self.mean - sample).abs() / self.window as f64);
    }
}

impl fmt::Display for StreamStat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ mean: {:.2}, sigma: {:.2}, window: {} }}",
            self.mean, self.sigma, self.window
        )
    }
}

/// interval timer in microseconds, driven by the caller's clock
pub struct MicroTimer {
    last_time: u128,
    interval: u128,
}

impl MicroTimer {
    pub fn build(now: u128, interval: u128) -> MicroTimer {
        MicroTimer {
            last_time: now,
            interval,
        }
    }
    pub fn expired(&self, now: u128) -> bool {
        (self.last_time + self.interval) < now
    }
    pub fn reset(&mut self, now: u128) {
        self.last_time = now;
    }
}

#[cfg(test)]
mod test_stream_stat {
    use super::*;

    #[test]
    fn build() {
        let stat = StreamStat::build(100);
        assert_eq!(stat.get_mean(), 0.0);
    }
    #[test]
    fn add_sample() {
        let mut stat = StreamStat::build(2);
        stat.add_sample(1.0);
        assert_eq!(stat.get_mean(), 0.25);
        stat.add_sample(1.0);
        stat.add_sample(1.0);
        assert!(stat.get_mean() > 0.25);
        stat.clear();
        assert_eq!(stat.get_mean(), 0.0);
    }
}

#[cfg(test)]
mod test_micro_timer {
    use super::*;

    #[test]
    fn expiration() {
        let mut now = 1000;
        let mut mt = MicroTimer::build(now, 100);
        assert!(!mt.expired(now));
        now += 99;
        assert!(!mt.expired(now));
        now += 2;
        assert!(mt.expired(now));
        mt.reset(now);
        assert!(!mt.expired(now));
    }
}
