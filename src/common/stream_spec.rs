//! validated configuration for a single bridged stream.
//!
//! A [`StreamSpec`] is immutable once built.  The config loader (or the
//! command line shim) builds them, the [`crate::bridge::stream_manager`]
//! owns them for the life of the stream.  Block size and sample rate are
//! process wide jack values, discovered when the stream's client is
//! created, so they are deliberately not part of the spec.
use json::JsonValue;
use serde::Serialize;
use std::{error::Error, fmt, net::Ipv4Addr, str::FromStr};

/// how many packets the receive side buffers before playback starts
pub const DEFAULT_JITTER_TARGET: usize = 3;
/// default hop limit for transmitted datagrams
pub const DEFAULT_MULTICAST_TTL: u32 = 2;

/// Closed set of stream flavors.  Dispatch is a match on this tag, so a
/// config file with a type outside the set fails at load, not at runtime.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub enum StreamKind {
    AudioTransmitter,
    AudioReceiver,
    MidiTransmitter,
    MidiReceiver,
}

impl StreamKind {
    pub fn is_transmitter(&self) -> bool {
        matches!(
            self,
            StreamKind::AudioTransmitter | StreamKind::MidiTransmitter
        )
    }
    pub fn is_audio(&self) -> bool {
        matches!(self, StreamKind::AudioTransmitter | StreamKind::AudioReceiver)
    }
}

impl FromStr for StreamKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<StreamKind, ConfigError> {
        match s {
            "AudioTransmitter" => Ok(StreamKind::AudioTransmitter),
            "AudioReceiver" => Ok(StreamKind::AudioReceiver),
            "MidiTransmitter" => Ok(StreamKind::MidiTransmitter),
            "MidiReceiver" => Ok(StreamKind::MidiReceiver),
            _ => Err(ConfigError::new(s, "unknown stream type")),
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Error for a stream entry that does not make sense.  Fatal to that
/// stream only; other entries in the same file are unaffected.
#[derive(Debug)]
pub struct ConfigError {
    name: String,
    reason: String,
}

impl ConfigError {
    pub fn new(name: &str, reason: &str) -> ConfigError {
        ConfigError {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "stream '{}': {}", self.name, self.reason)
    }
}

impl Error for ConfigError {}

#[derive(Clone, Debug, Serialize)]
pub struct StreamSpec {
    /// stream name, by convention "<client>:<port>"
    pub name: String,
    pub kind: StreamKind,
    pub group: Ipv4Addr,
    pub port: u16,
    /// hop limit, transmit streams only
    pub ttl: u32,
    /// name of the interface to bind ("eth0"), or a literal address
    pub interface: String,
    /// receive streams only: packets buffered before playback starts
    pub jitter_target: usize,
}

impl StreamSpec {
    /// Build a validated spec from explicit values (the command line path).
    pub fn build(
        name: &str,
        kind: StreamKind,
        group: Ipv4Addr,
        port: u16,
        ttl: u32,
        interface: &str,
        jitter_target: usize,
    ) -> Result<StreamSpec, ConfigError> {
        let spec = StreamSpec {
            name: name.to_string(),
            kind,
            group,
            port,
            ttl,
            interface: interface.to_string(),
            jitter_target,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Build a spec from one entry of the config file.  Everything is
    /// validated here so the stream components can trust the values.
    pub fn from_json(name: &str, entry: &JsonValue) -> Result<StreamSpec, ConfigError> {
        let kind: StreamKind = entry["type"]
            .as_str()
            .ok_or_else(|| ConfigError::new(name, "missing 'type'"))?
            .parse()?;
        let group = entry["multicast_group"]
            .as_str()
            .ok_or_else(|| ConfigError::new(name, "missing 'multicast_group'"))?
            .parse::<Ipv4Addr>()
            .map_err(|_| ConfigError::new(name, "'multicast_group' is not a dotted quad"))?;
        let port = entry["multicast_port"]
            .as_u16()
            .ok_or_else(|| ConfigError::new(name, "missing or bad 'multicast_port'"))?;
        let ttl = entry["multicast_ttl"].as_u32().unwrap_or(DEFAULT_MULTICAST_TTL);
        let interface = entry["interface_name"]
            .as_str()
            .ok_or_else(|| ConfigError::new(name, "missing 'interface_name'"))?
            .to_string();
        let jitter_target = entry["jitter_target"]
            .as_usize()
            .unwrap_or(DEFAULT_JITTER_TARGET);
        let spec = StreamSpec {
            name: name.to_string(),
            kind,
            group,
            port,
            ttl,
            interface,
            jitter_target,
        };
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::new(self.name.as_str(), "empty stream name"));
        }
        if !self.group.is_multicast() {
            return Err(ConfigError::new(
                self.name.as_str(),
                "'multicast_group' is not a multicast address",
            ));
        }
        if self.port == 0 {
            return Err(ConfigError::new(
                self.name.as_str(),
                "'multicast_port' must be 1-65535",
            ));
        }
        if self.ttl == 0 || self.ttl > 255 {
            return Err(ConfigError::new(
                self.name.as_str(),
                "'multicast_ttl' must be 1-255",
            ));
        }
        if self.interface.is_empty() {
            return Err(ConfigError::new(
                self.name.as_str(),
                "empty 'interface_name'",
            ));
        }
        if self.jitter_target == 0 {
            return Err(ConfigError::new(
                self.name.as_str(),
                "'jitter_target' must be at least 1",
            ));
        }
        Ok(())
    }

    /// jack client names can't contain the client:port separator
    pub fn client_name(&self) -> String {
        format!("rtbridge_{}", self.name.replace(':', "_"))
    }

    /// port name registered on our client, following the original
    /// convention of "in" toward the network and "out" away from it
    pub fn port_name(&self) -> &str {
        if self.kind.is_transmitter() {
            "in"
        } else {
            "out"
        }
    }
}

impl fmt::Display for StreamSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ name: {}, kind: {}, group: {}:{}, iface: {} }}",
            self.name, self.kind, self.group, self.port, self.interface
        )
    }
}
