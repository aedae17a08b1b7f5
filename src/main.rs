use anyhow::{Context, Result};
use clap::Parser;
use enginemon_lib::persistence::CsvRecorder;
use enginemon_lib::protocol::DecodedMessage;
use enginemon_lib::serialport::{list_ports, FrameReader};
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::{ops::Deref, panic};

mod commandline;
mod config;
mod daemon;

use commandline::{CliArgs, CliCommands, OutputFormat};
use daemon::{Monitor, Outcome};

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

/// Raises the returned flag on the first Ctrl-C instead of killing the process.
fn shutdown_on_ctrl_c() -> Result<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .with_context(|| "Cannot create signal runtime")?;
    let flag = shutdown.clone();
    std::thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Received SIGINT.");
                        flag.store(true, Ordering::Relaxed);
                    }
                    Err(e) => error!("Cannot listen for Ctrl-C: {e}"),
                }
            })
        })
        .with_context(|| "Cannot start signal thread")?;
    Ok(shutdown)
}

fn print_ports() -> Result<()> {
    let ports = list_ports().with_context(|| "Cannot list serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{} ({:?})", port.port_name, port.port_type);
    }
    Ok(())
}

fn decode_frames(config: &config::Config, frames: &[String], format: OutputFormat) -> Result<()> {
    let mut monitor = Monitor::<std::io::Sink>::new(config.channel_table(), None, format);
    let mut stdout = std::io::stdout().lock();
    for (n, text) in frames.iter().enumerate() {
        let frame = hex::decode(text.trim())
            .with_context(|| format!("Frame #{} is not a hex string", n + 1))?;
        match monitor.handle_frame(&frame, &mut stdout)? {
            Outcome::Accepted(_) => {}
            Outcome::Dropped(err) => writeln!(stdout, "Frame #{} dropped: {err}", n + 1)?,
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());
    let mut config = args.load_config()?;

    match args.command {
        CliCommands::Ports => print_ports()?,
        CliCommands::Monitor {
            port,
            csv_file,
            no_csv,
            flush_interval,
            timeout,
            format,
        } => {
            config.apply_port_args(&port);
            let csv_file = csv_file.unwrap_or_else(|| config.csv_file.clone());
            let flush_interval = flush_interval.unwrap_or(config.flush_interval);
            let timeout = timeout.unwrap_or(config.timeout);

            let reader = FrameReader::open(&config.port, timeout)
                .with_context(|| format!("Cannot open serial port '{}'", config.port.device))?;
            let recorder = if no_csv {
                None
            } else {
                info!("Appending accepted messages to {csv_file:?}");
                Some(
                    CsvRecorder::append(&csv_file)
                        .with_context(|| format!("Cannot open CSV file {csv_file:?}"))?,
                )
            };
            let shutdown = shutdown_on_ctrl_c()?;
            daemon::run(
                reader,
                Monitor::new(config.channel_table(), recorder, format),
                flush_interval,
                &shutdown,
                &mut std::io::stdout().lock(),
            )?
        }
        CliCommands::Decode { frames, format } => decode_frames(&config, &frames, format)?,
        CliCommands::Encode { sequence, readings } => {
            let frame = DecodedMessage::new(sequence, readings)
                .encode()
                .with_context(|| "Cannot encode frame")?;
            println!("{}", hex::encode(frame));
        }
    }

    Ok(())
}
