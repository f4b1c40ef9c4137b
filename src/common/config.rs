//! loads the stream map from a json settings file
//!
//! The file is one object keyed by stream name ("<client>:<port>"), each
//! value a record with `type`, `multicast_group`, `multicast_port`,
//! `multicast_ttl` (transmit only), `interface_name`, and an optional
//! `jitter_target` for receivers:
//!
//! ```json
//! {
//!   "system:capture_1": {
//!     "type": "AudioTransmitter",
//!     "multicast_group": "239.0.0.1",
//!     "multicast_port": 4023,
//!     "multicast_ttl": 2,
//!     "interface_name": "eth0"
//!   }
//! }
//! ```
//!
//! A bad entry is reported and skipped; the rest of the file still loads.
//! The stream components downstream only ever see validated specs.
use log::{info, warn};
use simple_error::bail;

use super::{box_error::BoxError, stream_spec::StreamSpec};

/// Parse the config file into the ordered list of stream specs.
pub fn load_stream_specs(filename: &str) -> Result<Vec<StreamSpec>, BoxError> {
    let raw_data = std::fs::read_to_string(filename)?;
    let parsed = json::parse(&raw_data)?;
    if !parsed.is_object() {
        bail!("config file {} is not a json object", filename);
    }
    let mut specs: Vec<StreamSpec> = Vec::new();
    for (name, entry) in parsed.entries() {
        match StreamSpec::from_json(name, entry) {
            Ok(spec) => {
                info!("configured stream: {}", spec);
                specs.push(spec);
            }
            Err(e) => {
                warn!("skipping config entry: {}", e);
            }
        }
    }
    Ok(specs)
}
