//! CLI entry point for egm-daq.
//!
//! # Usage
//!
//! List serial ports (USB adapters first):
//! ```bash
//! egm-daq ports
//! ```
//!
//! Decode one record:
//! ```bash
//! egm-daq decode "R000101 ..."
//! ```
//!
//! Stream from the instrument, or from the built-in simulator:
//! ```bash
//! egm-daq monitor --port /dev/ttyUSB0
//! egm-daq monitor --simulate
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use egm_daq::analysis::{Co2Statistics, FluxTracker};
use egm_daq::config::{Settings, DEFAULT_CONFIG_PATH};
use egm_daq::ingest::{IngestEvent, IngestionController};
use egm_daq::logging;
use egm_daq::persistence::{JsonLinesRepository, PersistenceQueue, ReadingRepository};
use egm_daq::protocol::{FieldRegistry, RecordDecoder};
use egm_daq::store::ChannelStore;
use egm_daq::transport::{
    self, AlwaysPresent, PortEnumerator, SimulatedTransport, SimulationConfig, SystemPorts,
    Transport,
};

#[derive(Parser)]
#[command(name = "egm-daq")]
#[command(about = "Host driver and live flux analysis for the EGM-4 gas monitor", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports
    Ports,

    /// Decode a single record and print it as JSON
    Decode {
        /// Record text without the trailing carriage return
        frame: String,
    },

    /// Stream readings until Ctrl-C
    Monitor {
        /// Serial port (overrides serial.port)
        #[arg(long)]
        port: Option<String>,

        /// Use the built-in simulator instead of a serial port
        #[arg(long)]
        simulate: bool,

        /// Notes stored with the session
        #[arg(long, default_value = "")]
        notes: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    settings.validate().context("invalid configuration")?;
    logging::init_from_settings(&settings).context("initializing logging")?;

    match cli.command {
        Commands::Ports => list_ports(),
        Commands::Decode { frame } => decode(&settings, &frame),
        Commands::Monitor {
            port,
            simulate,
            notes,
        } => monitor(settings, port, simulate, &notes).await,
    }
}

fn list_ports() -> Result<()> {
    let ports = transport::list_ports().context("listing serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        let tag = if port.is_usb { "usb" } else { "   " };
        println!("{tag}  {:<20} {}", port.name, port.description);
    }
    Ok(())
}

fn decoder_for(settings: &Settings) -> RecordDecoder {
    RecordDecoder::new(Arc::new(FieldRegistry::new(&settings.layout.src)))
}

fn decode(settings: &Settings, frame: &str) -> Result<()> {
    let reading = decoder_for(settings).decode(frame);
    println!("{}", serde_json::to_string_pretty(&reading)?);
    Ok(())
}

#[cfg(feature = "instrument_serial")]
fn serial_transport(settings: &Settings) -> Result<Box<dyn Transport>> {
    Ok(Box::new(transport::SerialTransport::new(
        settings.serial.baud_rate,
        settings.serial.read_timeout(),
    )))
}

#[cfg(not(feature = "instrument_serial"))]
fn serial_transport(_settings: &Settings) -> Result<Box<dyn Transport>> {
    Err(egm_daq::DaqError::SerialFeatureDisabled.into())
}

async fn monitor(
    settings: Settings,
    port: Option<String>,
    simulate: bool,
    notes: &str,
) -> Result<()> {
    let (link, port, enumerator): (Box<dyn Transport>, String, Arc<dyn PortEnumerator>) =
        if simulate {
            let config = SimulationConfig::default();
            (
                Box::new(SimulatedTransport::new(config)) as Box<dyn Transport>,
                "simulator".to_string(),
                Arc::new(AlwaysPresent) as Arc<dyn PortEnumerator>,
            )
        } else {
            let Some(port) = port.or_else(|| settings.serial.port.clone()) else {
                bail!("no serial port given; use --port or set serial.port");
            };
            (
                serial_transport(&settings)?,
                port,
                Arc::new(SystemPorts) as Arc<dyn PortEnumerator>,
            )
        };

    let controller = IngestionController::new(
        link,
        enumerator,
        decoder_for(&settings),
        settings.ingest_settings(),
    );

    let store =
        ChannelStore::new(settings.store.capacity, settings.timeline_settings()).into_shared();
    let flux = Arc::new(parking_lot::Mutex::new(FluxTracker::new(
        settings.flux.window,
        settings.flux.geometry(),
    )));
    let co2_stats = Arc::new(parking_lot::Mutex::new(Co2Statistics::new()));
    controller.add_sink(Box::new(Arc::clone(&store)));
    controller.add_sink(Box::new(Arc::clone(&flux)));
    controller.add_sink(Box::new(Arc::clone(&co2_stats)));

    let persistence = if settings.persistence.enabled {
        let repo = JsonLinesRepository::open(&settings.persistence.directory)
            .await
            .context("opening session directory")?;
        let session = repo.create_session(notes).await?;
        let repo: Arc<dyn ReadingRepository> = Arc::new(repo);
        let (queue, worker) =
            PersistenceQueue::spawn(repo, session.id, settings.persistence.queue_capacity);
        let stats = queue.stats();
        controller.add_sink(Box::new(queue));
        info!(session = %session.id, "recording session");
        Some((worker, stats))
    } else {
        None
    };

    let mut events = controller.subscribe();
    controller
        .connect(&port)
        .await
        .with_context(|| format!("connecting to {port}"))?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            event = events.recv() => {
                match event {
                    Ok(IngestEvent::Reading(reading)) if reading.kind.is_measurement() => {
                        let estimate = flux.lock().estimate();
                        let stability = co2_stats.lock().stability();
                        info!(
                            plot = ?reading.plot(),
                            co2 = ?reading.co2_ppm(),
                            dt = ?reading.elapsed_s(),
                            flux_g_m2_h = %format!("{:.3}", estimate.flux_g_m2_h),
                            r2 = %format!("{:.3}", estimate.regression.r_squared),
                            ?stability,
                            "reading"
                        );
                    }
                    Ok(IngestEvent::Reading(reading)) => {
                        debug!(kind = %reading.kind, raw = %reading.raw, "status record");
                    }
                    // Logged by the controller.
                    Ok(IngestEvent::TransportError(_)) | Ok(IngestEvent::StateChanged(_)) => {}
                    Err(RecvError::Lagged(n)) => warn!(skipped = n, "event receiver lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    controller.disconnect().await?;
    let stats = controller.stats();
    info!(
        frames = stats.frames,
        parse_errors = stats.parse_errors,
        transport_errors = stats.transport_errors,
        "acquisition stopped"
    );
    info!(plots = ?store.read().known_plots(), "channel store");

    if let Some((worker, persisted)) = persistence {
        controller.clear_sinks();
        if tokio::time::timeout(Duration::from_secs(5), worker).await.is_err() {
            warn!("persistence worker did not finish in time");
        }
        info!(
            written = persisted.written(),
            dropped = persisted.dropped(),
            failed = persisted.failed(),
            "session saved"
        );
    }
    Ok(())
}
