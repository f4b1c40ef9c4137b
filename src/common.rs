//! These modules are shared plumbing under the stream components.
pub mod box_error;
pub mod config;
pub mod midi_chunk;
pub mod multicast_socket;
pub mod net_packet;
pub mod ring_buffer;
pub mod stream_spec;
pub mod stream_stat;

use std::time::{SystemTime, UNIX_EPOCH};

/// get the current time in microseconds
pub fn get_micro_time() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_micros()
}
