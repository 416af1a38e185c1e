//! s7poll - Poll S7 variables and print every forwarded value.
//!
//! Usage:
//!   s7poll '192.168.0.10$VW0$2' '192.168.0.10$VB100.16$5'
//!   s7poll --config s7.toml --write '192.168.0.10$VW0$2=1234' '192.168.0.10$VW0$2'
//!   s7poll --simulate --duration 10 'sim$MD8$1'

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use voltage_s7::{
    init_logging, DriverConfig, LogLevel, MemoryTransport, RegistrationKey, ResultEntry,
    ResultQueue, S7Error, S7Result, S7Service, S7Transport, S7Value, WireType,
};

#[derive(Parser, Debug)]
#[command(name = "s7poll")]
#[command(about = "Poll Siemens S7 variables over ISO-on-TCP")]
#[command(version)]
struct Args {
    /// Variables to poll, as device$address$period
    #[arg(required = true)]
    keys: Vec<String>,

    /// TOML configuration file (S7_* environment variables override it)
    #[arg(short, long, env = "S7_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Values to write once at startup, as device$address$period=value
    #[arg(short, long)]
    write: Vec<String>,

    /// Poll an in-memory simulated device instead of the network
    #[arg(long)]
    simulate: bool,

    /// Stop after this many seconds (0 = until Ctrl-C)
    #[arg(long, default_value = "0")]
    duration: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DriverConfig::load(path)?,
        None => DriverConfig::from_env()?,
    };
    if let Some(level) = args.log_level {
        config = config.with_log_level(level);
    }
    let log = init_logging(config.log_level)?;
    info!("{}", voltage_s7::info());

    let queue = Arc::new(ResultQueue::new());
    if args.simulate {
        let device = MemoryTransport::new();
        let service = S7Service::new(config, queue.clone(), move || device.clone())
            .with_log_handle(log);
        run(service, queue, &args).await?;
    } else {
        let service = S7Service::tcp(config, queue.clone()).with_log_handle(log);
        run(service, queue, &args).await?;
    }
    Ok(())
}

async fn run<T: S7Transport + 'static>(
    service: S7Service<T>,
    queue: Arc<ResultQueue>,
    args: &Args,
) -> S7Result<()> {
    service.start();
    for key in &args.keys {
        service.register_variable(key)?;
    }
    for spec in &args.write {
        let (key, text) = spec
            .rsplit_once('=')
            .ok_or_else(|| S7Error::invalid_data(format!("'{}' is not key=value", spec)))?;
        let value = parse_value(key, text)?;
        service.write_value(key, value)?;
    }

    let deadline = async {
        if args.duration == 0 {
            std::future::pending::<()>().await
        } else {
            tokio::time::sleep(Duration::from_secs(args.duration)).await
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = queue.wait() => {
                for entry in queue.drain() {
                    print_entry(&entry);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = &mut deadline => break,
        }
    }

    service.stop().await;
    for entry in queue.drain() {
        print_entry(&entry);
    }
    Ok(())
}

/// Wire type an entry name carries
fn entry_type(name: &str, len: usize) -> WireType {
    match RegistrationKey::parse(name) {
        Ok(key) => WireType::for_address(&key.address),
        Err(_) if len == 1 => WireType::U8,
        Err(_) => WireType::String(len),
    }
}

fn print_entry(entry: &ResultEntry) {
    let wire_type = entry_type(&entry.name, entry.len());
    match wire_type.decode(&entry.data) {
        Ok(value) => println!(
            "{} {} = {}",
            entry.timestamp.format("%H:%M:%S%.3f"),
            entry.name,
            value
        ),
        Err(e) => warn!("{}: {}", entry.name, e),
    }
}

fn parse_value(key: &str, text: &str) -> S7Result<S7Value> {
    let key = RegistrationKey::parse(key)?;
    let invalid = || S7Error::invalid_data(format!("'{}' is not a valid {}", text, key.name));
    let value = match WireType::for_address(&key.address) {
        WireType::Bool => match text.trim() {
            "1" | "true" | "on" => S7Value::Bool(true),
            "0" | "false" | "off" => S7Value::Bool(false),
            _ => return Err(invalid()),
        },
        WireType::U8 => S7Value::U8(text.trim().parse().map_err(|_| invalid())?),
        WireType::U16 => S7Value::U16(text.trim().parse().map_err(|_| invalid())?),
        WireType::U32 => S7Value::U32(text.trim().parse().map_err(|_| invalid())?),
        WireType::Float => S7Value::Float(text.trim().parse().map_err(|_| invalid())?),
        WireType::String(_) => S7Value::String(text.to_string()),
    };
    Ok(value)
}
