use clap::{Parser, Subcommand, ValueEnum};
use roda_telemetry::{
    AggregationService, DATA_TOPIC, DeviceSimulator, DisplaySink, EngineOptions, InMemoryBus,
    MessageBus, PublishPolicy, RESULT_TOPIC, TelemetryError,
};
use spdlog::prelude::*;
use spdlog::sink::StdStreamSink;
use spdlog::{Level, LevelFilter, Logger};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(about = "Rolling per-device statistics over a telemetry stream")]
struct Args {
    /// Overrides the SPDLOG_RS_LEVEL environment variable.
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct EngineArgs {
    /// Samples per window; also the count at which a device starts emitting.
    #[arg(long, short = 'n', default_value_t = 10)]
    window_size: usize,

    #[arg(long, default_value_t = 4)]
    shards: usize,

    /// Extra publish attempts for a refused result before it is dropped.
    #[arg(long, default_value_t = 0)]
    publish_retries: u32,

    #[arg(long)]
    pin_cores: bool,

    #[arg(long, default_value_t = 100_000)]
    report_interval: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Reads "<value> <deviceID>" lines from stdin and prints results to stdout.
    Analyze {
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Runs simulated devices, the engine and a console display in one process.
    Demo {
        #[command(flatten)]
        engine: EngineArgs,

        #[arg(long, default_value_t = 3)]
        devices: u32,

        /// Readings per device.
        #[arg(long, default_value_t = 1000)]
        points: usize,

        #[arg(long, default_value_t = 100)]
        interval_ms: u64,

        #[arg(long, default_value_t = 50.0)]
        mean: f64,

        #[arg(long, default_value_t = 5.0)]
        std_dev: f64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LogLevel {
    Critical,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Critical => Level::Critical,
            LogLevel::Error => Level::Error,
            LogLevel::Warn => Level::Warn,
            LogLevel::Info => Level::Info,
            LogLevel::Debug => Level::Debug,
            LogLevel::Trace => Level::Trace,
        }
    }
}

impl EngineArgs {
    fn options(&self) -> EngineOptions {
        let publish_policy = if self.publish_retries == 0 {
            PublishPolicy::Drop
        } else {
            PublishPolicy::Retry {
                attempts: self.publish_retries,
                backoff: Duration::from_millis(10),
            }
        };
        EngineOptions {
            window_size: self.window_size,
            shards: self.shards,
            publish_policy,
            pin_cores: self.pin_cores,
            report_interval: self.report_interval,
            ..Default::default()
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.log_level)?;

    match args.command {
        Command::Analyze { engine } => analyze(engine.options())?,
        Command::Demo {
            engine,
            devices,
            points,
            interval_ms,
            mean,
            std_dev,
        } => demo(
            engine.options(),
            devices,
            points,
            Duration::from_millis(interval_ms),
            mean,
            std_dev,
        )?,
    }
    Ok(())
}

/// Logs go to stderr so stdout carries nothing but `Result` records.
fn init_logging(level: Option<LogLevel>) -> Result<(), Box<dyn std::error::Error>> {
    spdlog::init_env_level()?;
    let env_level = spdlog::default_logger().level_filter();

    let stderr = StdStreamSink::builder().stderr().build_arc()?;
    let logger = Logger::builder()
        .sink(stderr)
        .level_filter(env_level)
        .build_arc()?;
    if let Some(level) = level {
        logger.set_level_filter(LevelFilter::MoreSevereEqual(level.into()));
    }
    spdlog::set_default_logger(logger);
    Ok(())
}

fn analyze(options: EngineOptions) -> Result<(), Box<dyn std::error::Error>> {
    let bus = Arc::new(InMemoryBus::new());
    let results = bus.subscribe(RESULT_TOPIC)?;
    let service = AggregationService::start(bus.clone(), options)?;

    let printing = Arc::new(AtomicBool::new(true));
    let printer_running = printing.clone();
    let printer = thread::spawn(move || -> io::Result<()> {
        let stdout = io::stdout();
        loop {
            let record = match results.recv_timeout(Duration::from_millis(50)) {
                Ok(Some(record)) => record,
                Ok(None) if printer_running.load(Ordering::Acquire) => continue,
                Ok(None) | Err(TelemetryError::SubscriptionClosed) => break,
                Err(err) => return Err(io::Error::other(err)),
            };
            writeln!(stdout.lock(), "{}", record)?;
        }
        stdout.lock().flush()
    });

    info!("[System] Reading records from stdin...");
    let mut stdin = io::stdin().lock();
    let mut raw = Vec::new();
    loop {
        raw.clear();
        if stdin.read_until(b'\n', &mut raw)? == 0 {
            break;
        }
        let record = raw.strip_suffix(b"\n").unwrap_or(&raw[..]);
        let record = record.strip_suffix(b"\r").unwrap_or(record);
        match std::str::from_utf8(record) {
            Ok(record) => bus.publish(DATA_TOPIC, record)?,
            Err(_) => service.reject_record(record, "not valid UTF-8"),
        }
    }

    info!("[System] Input closed, draining...");
    let stats = service.shutdown();
    printing.store(false, Ordering::Release);
    match printer.join() {
        Ok(result) => result?,
        Err(_) => error!("[System] Result printer panicked"),
    }
    info!(
        "[System] Done: {} records, {} malformed, {} results",
        stats.received, stats.malformed, stats.published
    );
    Ok(())
}

fn demo(
    options: EngineOptions,
    devices: u32,
    points: usize,
    interval: Duration,
    mean: f64,
    std_dev: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    let bus = Arc::new(InMemoryBus::new());
    let results = bus.subscribe(RESULT_TOPIC)?;
    let service = AggregationService::start(bus.clone(), options)?;
    let running = Arc::new(AtomicBool::new(true));

    info!(
        "[System] Starting {} simulated devices, {} readings each",
        devices, points
    );
    let simulators: Vec<_> = (1..=devices)
        .map(|id| {
            let bus = bus.clone();
            let running = running.clone();
            thread::spawn(move || {
                let mut device = DeviceSimulator::new(id as i32, mean, std_dev);
                device.run(bus.as_ref(), points, interval, &running)
            })
        })
        .collect();

    let mut display = DisplaySink::new(1000);
    while simulators.iter().any(|s| !s.is_finished()) {
        thread::sleep(Duration::from_millis(500));
        display.drain(&results);
        for device in display.devices() {
            if let Some(line) = display.render(device) {
                info!("{}", line);
            }
        }
        if !service.is_healthy() {
            error!("[System] A worker panicked, stopping simulators");
            running.store(false, Ordering::Relaxed);
        }
    }

    for simulator in simulators {
        match simulator.join() {
            Ok(Ok(published)) => debug!("[System] Simulator published {} readings", published),
            Ok(Err(err)) => warn!("[System] Simulator stopped: {}", err),
            Err(_) => error!("[System] Simulator panicked"),
        }
    }

    let stats = service.shutdown();
    display.drain(&results);
    for device in display.devices() {
        if let Some(line) = display.render(device) {
            info!("[Final] {}", line);
        }
    }
    info!(
        "[System] Done: {} readings from {} devices, {} results",
        stats.received, stats.devices, stats.published
    );
    Ok(())
}
