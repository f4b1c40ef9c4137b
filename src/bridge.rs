//! stream components: jitter scheduling, the jack callback, the network
//! loop, and the manager that wires one set of parts per configured stream.
pub mod jack_client;
pub mod jitter_buffer;
pub mod network_thread;
pub mod process;
pub mod stream_manager;
pub mod stream_shared;
