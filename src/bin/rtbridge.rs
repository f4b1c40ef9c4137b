//! command line front end for the bridge
//!
//! Two ways to run it: point it at a json config file describing any
//! number of streams, or pass `--mode`/`--group`/`--interface` to run a
//! single stream without a file, the way the original one-shot tool did.
use clap::Parser;
use log::{error, info};
use simple_error::bail;
use std::net::Ipv4Addr;
use std::thread::sleep;
use std::time::Duration;

use rtbridge::bridge::stream_manager::StreamManager;
use rtbridge::common::{
    box_error::BoxError,
    config,
    stream_spec::{StreamKind, StreamSpec, DEFAULT_JITTER_TARGET, DEFAULT_MULTICAST_TTL},
};

#[derive(Parser)]
#[command(
    version,
    about = "Send and receive jack audio and MIDI as multicast network streams"
)]
struct Args {
    /// json file mapping stream names to their settings
    #[arg(short, long, default_value = "rtbridge.json")]
    config: String,

    /// run one stream from flags instead of the config file
    /// (AudioTransmitter | AudioReceiver | MidiTransmitter | MidiReceiver)
    #[arg(long)]
    mode: Option<StreamKind>,

    /// multicast group for the single stream
    #[arg(long)]
    group: Option<Ipv4Addr>,

    /// multicast port for the single stream
    #[arg(long, default_value_t = 4000)]
    port: u16,

    /// hop limit for the single stream (transmit only)
    #[arg(long, default_value_t = DEFAULT_MULTICAST_TTL)]
    ttl: u32,

    /// interface name (or address) for the single stream
    #[arg(long)]
    interface: Option<String>,

    /// stream name for the single stream
    #[arg(long, default_value = "rtbridge:mono")]
    name: String,
}

fn single_stream_spec(args: &Args, kind: StreamKind) -> Result<StreamSpec, BoxError> {
    let group = match args.group {
        Some(g) => g,
        None => bail!("--mode requires --group"),
    };
    let interface = match &args.interface {
        Some(i) => i.clone(),
        None => bail!("--mode requires --interface"),
    };
    Ok(StreamSpec::build(
        &args.name,
        kind,
        group,
        args.port,
        args.ttl,
        &interface,
        DEFAULT_JITTER_TARGET,
    )?)
}

fn main() -> Result<(), BoxError> {
    env_logger::init();
    let args = Args::parse();

    let specs = match args.mode {
        Some(kind) => vec![single_stream_spec(&args, kind)?],
        None => config::load_stream_specs(&args.config)?,
    };
    if specs.is_empty() {
        bail!("no streams configured");
    }

    let mut manager = StreamManager::build()?;
    let mut failures = 0;
    for spec in specs {
        match manager.start(spec) {
            Ok(handle) => info!("running: {}", handle.name()),
            Err(e) => {
                error!("{}", e);
                failures += 1;
            }
        }
    }
    if failures > 0 {
        // a stream that can't start is a config problem the operator
        // should see as a failed process, not a half-running bridge
        manager.stop_all();
        bail!("{} stream(s) failed to start", failures);
    }

    loop {
        sleep(Duration::new(10, 0));
        info!("status: {}", manager.get_status());
    }
}
