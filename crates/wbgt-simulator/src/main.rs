//! Desktop simulator for the wbgt-node sensor.
//!
//! Runs the real boot decision and telemetry service from `wbgt-core`
//! against stand-in hardware: a host directory as the SD card, synthetic
//! climate and globe readings, and a radio that associates after a few
//! polls. The HTTP server listens on localhost.
//!
//! ```text
//! wbgt-simulator --hold-button            # provisioning mode
//! curl -d @settings.json localhost:8080/globalsettings
//! wbgt-simulator                          # station mode with the saved settings
//! curl localhost:8080/wbgt
//! ```

mod devices;
mod medium;
mod server;

use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::Parser;
use embassy_futures::block_on;
use log::{error, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tiny_http::Server;

use wbgt_core::config::DeviceConfig;
use wbgt_core::context::DeviceContext;
use wbgt_core::identity::DeviceIdentity;
use wbgt_core::mode::ModeSelector;
use wbgt_core::sensors::SensorAggregator;
use wbgt_core::storage::SettingsStore;
use wbgt_core::telemetry::TelemetryService;

use devices::{MockClimate, MockGlobe, SimulatedButton, SimulatedLink, StdDelay};
use medium::DirectoryMedium;

/// Association polls before the simulated radio reports success.
const POLLS_TO_ASSOCIATE: u32 = 3;

#[derive(Parser, Debug)]
#[command(version, about = "Run the wbgt-node boot flow and telemetry server on the desktop")]
struct Args {
    /// Directory standing in for the SD card
    #[arg(long, default_value = "sdcard")]
    data_dir: PathBuf,

    /// Telemetry server port on localhost
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Boot with the provisioning button held
    #[arg(long)]
    hold_button: bool,

    /// Run without the globe temperature probe
    #[arg(long)]
    no_probe: bool,

    /// Station association never succeeds
    #[arg(long)]
    unreachable: bool,

    /// JSON file overriding the factory configuration
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<DeviceConfig, Box<dyn Error>> {
    match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            Ok(serde_json::from_slice(&fs::read(path)?)?)
        }
        None => Ok(DeviceConfig::default()),
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = load_config(&args)?;
    let context =
        DeviceContext::initialize(DeviceIdentity::unknown(), config, &mut StdRng::from_entropy())
            .map_err(|e| format!("device context: {e}"))?;

    let store = SettingsStore::new(
        context.codec(),
        context.storage_files(),
        DirectoryMedium::new(&args.data_dir)?,
        StdRng::from_entropy(),
    );
    let sensors = SensorAggregator::new(
        Some(MockClimate::new()),
        (!args.no_probe).then(MockGlobe::new),
    );

    let mut button = SimulatedButton::new(args.hold_button);
    let mut link = SimulatedLink::new((!args.unreachable).then_some(POLLS_TO_ASSOCIATE));
    let outcome = block_on(ModeSelector::new(&context).run(
        &mut button,
        &store,
        &mut link,
        &mut StdDelay,
    ));
    info!("Boot finished in {:?}", outcome.state);
    if let Some(settings) = &outcome.settings {
        info!("Active settings: {:?}", settings);
    }

    // Unlike the board, the simulator serves in every mode so an offline
    // boot can still be provisioned over localhost.
    let telemetry = TelemetryService::new(&sensors, &store);
    let server = Server::http(("127.0.0.1", args.port)).map_err(|e| e as Box<dyn Error>)?;
    info!("Telemetry server on http://127.0.0.1:{}", args.port);

    server::serve(&server, &telemetry);
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("Starting wbgt-node simulator");

    if let Err(e) = run(Args::parse()) {
        error!("{e}");
        std::process::exit(1);
    }
}
