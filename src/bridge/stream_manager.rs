//! owns the set of running streams and their lifecycle
//!
//! One manager per process is the normal shape, but nothing here is
//! global: managers are plain values, so tests can run several side by
//! side.  `build` spawns the process-wide network thread; `start` wires a
//! spec into a running stream; `stop` tears one down without touching the
//! others.  A stream that fails mid-flight goes terminal on its own and
//! shows up as failed in `get_status`, it never takes a sibling with it.
use log::{error, info, warn};
use simple_error::bail;
use std::collections::HashMap;
use std::sync::{mpsc, Arc};
use std::thread::sleep;
use std::time::Duration;
use thread_priority::{ThreadBuilder, ThreadPriority};

use crate::common::{
    box_error::BoxError, multicast_socket::MulticastSocket, stream_spec::StreamSpec,
};

use super::{
    jack_client::{ActiveClient, StreamParts},
    network_thread::{self, NetStream},
    stream_shared::StreamShared,
};

/// attempts to bind a stream's socket before giving up on start
const BIND_ATTEMPTS: usize = 3;
const BIND_RETRY_MS: u64 = 250;

/// opaque ticket for a started stream
#[derive(Clone, Debug, PartialEq)]
pub struct StreamHandle {
    name: String,
}

impl StreamHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
}

struct StreamEntry {
    spec: StreamSpec,
    shared: Arc<StreamShared>,
    client: Option<ActiveClient>,
}

pub struct StreamManager {
    streams: HashMap<String, StreamEntry>,
    net_tx: mpsc::Sender<NetStream>,
    net_handle: Option<std::thread::JoinHandle<()>>,
}

impl StreamManager {
    /// build a manager and spawn its network thread
    pub fn build() -> Result<StreamManager, BoxError> {
        let (net_tx, net_rx) = mpsc::channel();
        let builder = ThreadBuilder::default()
            .name("rtbridge_net".to_string())
            .priority(ThreadPriority::Max);
        let net_handle = builder.spawn(move |prio_result| {
            if prio_result.is_err() {
                warn!("network thread running without elevated priority");
            }
            network_thread::run(net_rx);
        })?;
        Ok(StreamManager {
            streams: HashMap::new(),
            net_tx,
            net_handle: Some(net_handle),
        })
    }

    /// Start one stream from its validated spec.
    ///
    /// The transport is bound first (with bounded retries) so an unusable
    /// address or interface fails before any jack state exists.  Only a
    /// fully wired stream is recorded.
    pub fn start(&mut self, spec: StreamSpec) -> Result<StreamHandle, BoxError> {
        if self.streams.contains_key(&spec.name) {
            bail!("stream '{}' is already started", spec.name);
        }
        let sock = Self::bind_with_retries(&spec)?;
        let shared = Arc::new(StreamShared::build(&spec.name));
        let mut parts = StreamParts::build(&spec, shared.clone(), sock)?;
        // the network thread owns the socket-facing half from here on
        if let Some(net) = parts.net.take() {
            self.net_tx.send(net).map_err(|_| "network thread is gone")?;
        }
        let client = parts.activate(&spec.name)?;
        info!("started stream {}", spec);
        let handle = StreamHandle {
            name: spec.name.clone(),
        };
        self.streams.insert(
            spec.name.clone(),
            StreamEntry {
                spec,
                shared,
                client: Some(client),
            },
        );
        Ok(handle)
    }

    fn bind_with_retries(spec: &StreamSpec) -> Result<MulticastSocket, BoxError> {
        let mut last_err: Option<BoxError> = None;
        for attempt in 1..=BIND_ATTEMPTS {
            let result = if spec.kind.is_transmitter() {
                MulticastSocket::transmitter(spec)
            } else {
                MulticastSocket::receiver(spec)
            };
            match result {
                Ok(sock) => return Ok(sock),
                Err(e) => {
                    warn!(
                        "stream {}: bind attempt {}/{} failed: {}",
                        spec.name, attempt, BIND_ATTEMPTS, e
                    );
                    last_err = Some(e);
                    if attempt < BIND_ATTEMPTS {
                        sleep(Duration::from_millis(BIND_RETRY_MS));
                    }
                }
            }
        }
        bail!(
            "stream '{}': could not bind {}:{} on '{}': {}",
            spec.name,
            spec.group,
            spec.port,
            spec.interface,
            last_err.map_or_else(|| "unknown".to_string(), |e| e.to_string())
        );
    }

    /// Stop one stream and release everything it held.
    ///
    /// The stop flag retires the network end (socket and ring) on the
    /// next poll; deactivating the jack client joins the callback, so by
    /// the time this returns the audio thread is out of the stream and
    /// its port is unregistered.
    pub fn stop(&mut self, handle: StreamHandle) -> Result<(), BoxError> {
        let mut entry = match self.streams.remove(handle.name()) {
            Some(e) => e,
            None => bail!("no stream named '{}'", handle.name()),
        };
        entry.shared.request_stop();
        if let Some(client) = entry.client.take() {
            client
                .deactivate()
                .map_err(|e| format!("stream '{}': deactivate failed: {}", entry.spec.name, e))?;
        }
        info!("stopped stream {}", entry.spec);
        Ok(())
    }

    /// stop every stream, logging rather than failing on the way down
    pub fn stop_all(&mut self) -> () {
        let names: Vec<String> = self.streams.keys().cloned().collect();
        for name in names {
            if let Err(e) = self.stop(StreamHandle { name }) {
                error!("{}", e);
            }
        }
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn is_failed(&self, handle: &StreamHandle) -> bool {
        self.streams
            .get(handle.name())
            .map_or(false, |e| e.shared.is_failed())
    }

    /// per stream counters for diagnostics
    pub fn get_status(&self) -> serde_json::Value {
        let statuses: Vec<serde_json::Value> = self
            .streams
            .values()
            .map(|e| e.shared.get_status())
            .collect();
        serde_json::json!({ "streams": statuses })
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        self.stop_all();
        // dropping the sender lets the network thread run down and exit
        let (dead_tx, _) = mpsc::channel();
        drop(std::mem::replace(&mut self.net_tx, dead_tx));
        if let Some(handle) = self.net_handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod test_stream_manager {
    use super::*;
    use crate::common::stream_spec::StreamKind;
    use std::net::Ipv4Addr;

    fn bad_iface_spec() -> StreamSpec {
        StreamSpec {
            name: "bogus:port".to_string(),
            kind: StreamKind::AudioReceiver,
            group: Ipv4Addr::new(239, 88, 77, 64),
            port: 41400,
            ttl: 1,
            interface: "definitely_not_an_iface0".to_string(),
            jitter_target: 3,
        }
    }

    #[test]
    fn build_and_drop() {
        // manager comes up with no streams and shuts its thread down
        let manager = StreamManager::build().unwrap();
        assert_eq!(manager.stream_count(), 0);
        drop(manager);
    }

    #[test]
    fn unusable_interface_fails_start() {
        // bind failure surfaces before any jack state is created, and
        // leaves nothing behind
        let mut manager = StreamManager::build().unwrap();
        let err = manager.start(bad_iface_spec()).unwrap_err();
        assert!(err.to_string().contains("bogus:port"));
        assert_eq!(manager.stream_count(), 0);
    }

    #[test]
    fn stop_unknown_stream_is_error() {
        let mut manager = StreamManager::build().unwrap();
        let handle = StreamHandle {
            name: "never:started".to_string(),
        };
        assert!(manager.stop(handle).is_err());
    }

    #[test]
    fn status_is_empty_without_streams() {
        let manager = StreamManager::build().unwrap();
        let status = manager.get_status();
        assert_eq!(status["streams"].as_array().unwrap().len(), 0);
    }
}
