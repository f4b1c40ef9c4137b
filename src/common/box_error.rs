//! boxed error type shared by all the threads.
//!
//! Socket setup, jack setup, and the network loop all run on their own
//! threads, so errors that cross a spawn need to be Send + Sync.
pub type BoxError = std::boxed::Box<
    dyn std::error::Error // must implement Error to satisfy ?
        + std::marker::Send // needed for threads
        + std::marker::Sync, // needed for threads
>;
