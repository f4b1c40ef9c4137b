//! rtbridge - bridge JACK audio and MIDI ports onto a LAN
//!
//! provides library elements to forward periodic audio buffers and MIDI
//! events between JACK ports and UDP multicast groups.  Transmit streams
//! capture a port in the real time callback and ship its blocks out as
//! sequenced datagrams.  Receive streams reassemble those datagrams through
//! a jitter buffer and play them back on a port, one block per audio cycle.
pub mod bridge;
pub mod common;
