//! Haldex DEM Monitor CLI
//!
//! Command-line front end for the haldex-dem library. It adds:
//! - Single sensor reads and periodic monitoring
//! - Keep-alive mode (alone or while monitoring)
//! - Dashboard state with °F/psi conversions
//! - Text or JSON-lines output
//!
//! No CAN adapter backend ships with the library yet, so the CLI drives the
//! simulated module; its values come from the `[simulator]` config table.

use anyhow::{Context, Result};
use clap::Parser;
use haldex_dem::{DemPoller, SensorId, SensorReading, SimulatedDem};
use std::path::PathBuf;
use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::time::Duration;

mod config;
mod report;
mod state;

use config::AppConfig;
use state::DashboardState;

/// Haldex DEM Monitor - Read live sensor data from a Haldex Gen2 module
#[derive(Parser, Debug)]
#[command(name = "haldex-monitor")]
#[command(about = "Read live sensor data from a Haldex Gen2 DEM module", long_about = None)]
#[command(version)]
struct Args {
    /// Read a single sensor (pump_current, oil_pressure, oil_temperature, wheel_speeds)
    #[arg(short, long, value_name = "NAME")]
    sensor: Option<String>,

    /// Milliseconds between monitor cycles
    #[arg(short, long, value_name = "MS")]
    interval: Option<u64>,

    /// Number of cycles (or keep-alive responses) before exiting
    #[arg(short = 'n', long, value_name = "COUNT")]
    count: Option<u64>,

    /// Only keep the module awake and print its answers
    #[arg(long, conflicts_with = "sensor")]
    keep_alive: bool,

    /// Keep-alive interval in milliseconds
    #[arg(long, value_name = "MS")]
    keep_alive_interval: Option<u64>,

    /// Monitor all sensors with keep-alive running in the background
    #[arg(long, conflicts_with_all = ["sensor", "keep_alive"])]
    monitor_with_keepalive: bool,

    /// Emit JSON lines instead of text
    #[arg(long)]
    json: bool,

    /// Print the sensor table and exit
    #[arg(long)]
    list_sensors: bool,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!("Haldex DEM Monitor v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using protocol library v{}", haldex_dem::VERSION);

    if args.list_sensors {
        list_sensors();
        return Ok(());
    }

    let mut app_config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };
    apply_overrides(&mut app_config, &args);

    let sim = SimulatedDem::new(app_config.simulator.clone());
    let poller = DemPoller::new(sim, app_config.poller.clone())
        .context("Failed to start DEM poller")?;

    let mut state = DashboardState::new();
    let json = app_config.monitor.json;

    let result = if let Some(name) = &args.sensor {
        let sensor: SensorId = name.parse()?;
        single_sensor_mode(&poller, sensor, &app_config, &mut state)
    } else if args.keep_alive {
        keep_alive_mode(&poller, &app_config, &mut state)
    } else {
        monitor_mode(&poller, &app_config, &mut state)
    };

    poller.shutdown();
    result?;

    if json {
        println!("{}", serde_json::to_string(&report::summary(&state))?);
    } else if !args.quiet {
        println!("{}", report::format_summary(&state));
    }

    Ok(())
}

/// Command line flags win over the config file
fn apply_overrides(config: &mut AppConfig, args: &Args) {
    if let Some(interval) = args.interval {
        config.monitor.interval_ms = interval;
    }
    if args.count.is_some() {
        config.monitor.count = args.count;
    }
    if let Some(interval) = args.keep_alive_interval {
        config.poller.keep_alive_interval_ms = interval;
    }
    if args.monitor_with_keepalive {
        config.monitor.keep_alive = true;
    }
    if args.json {
        config.monitor.json = true;
    }
}

fn list_sensors() {
    println!("{:<18} {:>8} {:>8}", "SENSOR", "OP ID", "MIN LEN");
    for def in haldex_dem::sensors::SENSORS.iter() {
        println!(
            "{:<18} {:>#8X} {:>8}",
            def.id.name(),
            def.request.operation_id,
            def.min_len
        );
    }
}

fn print_readings(sensor: SensorId, readings: &[SensorReading], json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            report::json_readings(sensor, readings, chrono::Local::now())?
        );
    } else {
        for reading in readings {
            println!("{}", report::format_reading(reading));
        }
    }
    Ok(())
}

/// Poll one sensor and record the outcome; errors are reported, not returned
fn poll_and_report(
    poller: &DemPoller,
    sensor: SensorId,
    json: bool,
    state: &mut DashboardState,
) -> Result<()> {
    match poller.poll(sensor) {
        Ok(readings) => {
            state.record(&readings);
            print_readings(sensor, &readings, json)?;
        }
        Err(e) => {
            if e.is_retryable() {
                log::warn!("Failed to get {}, retrying next cycle: {}", sensor, e);
            } else {
                log::error!("Failed to get {}: {}", sensor, e);
            }
            if json {
                println!(
                    "{}",
                    report::json_error(sensor, &e, chrono::Local::now())?
                );
            }
            state.record_error(sensor, &e);
        }
    }
    Ok(())
}

fn single_sensor_mode(
    poller: &DemPoller,
    sensor: SensorId,
    config: &AppConfig,
    state: &mut DashboardState,
) -> Result<()> {
    let count = config.monitor.count.unwrap_or(1);
    let interval = Duration::from_millis(config.monitor.interval_ms);

    for i in 0..count {
        if i > 0 {
            thread::sleep(interval);
        }
        poll_and_report(poller, sensor, config.monitor.json, state)?;
    }
    Ok(())
}

fn monitor_mode(poller: &DemPoller, config: &AppConfig, state: &mut DashboardState) -> Result<()> {
    let monitor = &config.monitor;
    let interval = Duration::from_millis(monitor.interval_ms);
    let spacing = poller.config().min_poll_interval();

    if monitor.keep_alive {
        poller.start_keep_alive_default()?;
    }

    let mut cycle: u64 = 0;
    while monitor.count.map_or(true, |count| cycle < count) {
        if cycle > 0 {
            thread::sleep(interval);
        }
        cycle += 1;
        log::debug!("Monitor cycle {}", cycle);

        for (i, sensor) in monitor.sensors.iter().enumerate() {
            if i > 0 {
                thread::sleep(spacing);
            }
            poll_and_report(poller, *sensor, monitor.json, state)?;
        }
    }

    poller.stop_keep_alive();
    Ok(())
}

fn keep_alive_mode(
    poller: &DemPoller,
    config: &AppConfig,
    state: &mut DashboardState,
) -> Result<()> {
    let sensor = config.poller.keep_alive_sensor;
    let answers = poller.subscribe_unsolicited();
    poller.start_keep_alive_default()?;

    if !config.monitor.json {
        println!(
            "Keep-alive running ({} every {} ms)",
            sensor, config.poller.keep_alive_interval_ms
        );
    }

    // Report a missing answer after a few silent intervals
    let silence = config.poller.keep_alive_interval() * 4;
    let mut received: u64 = 0;

    while config.monitor.count.map_or(true, |count| received < count) {
        match answers.recv_timeout(silence) {
            Ok(readings) => {
                received += 1;
                state.record(&readings);
                print_readings(sensor, &readings, config.monitor.json)?;
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("No keep-alive answer within {:?}", silence);
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    poller.stop_keep_alive();
    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
