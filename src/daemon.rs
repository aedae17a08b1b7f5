use crate::commandline::OutputFormat;
use anyhow::{Context, Result};
use enginemon_lib::channel::{ChannelTable, Projection};
use enginemon_lib::persistence::CsvRecorder;
use enginemon_lib::protocol::{DecodedMessage, DecoderState};
use enginemon_lib::serialport::FrameReader;
use log::{debug, error, info, warn};
use serde_json::json;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Accepted(u8),
    Dropped(enginemon_lib::Error),
}

/// Decodes frames and hands every accepted message to the display and the CSV recorder.
///
/// Both consumers get the same decoded message; the raw frame is never parsed twice.
#[derive(Debug)]
pub struct Monitor<W: Write> {
    state: DecoderState,
    channels: ChannelTable,
    recorder: Option<CsvRecorder<W>>,
    format: OutputFormat,
}

impl<W: Write> Monitor<W> {
    pub fn new(
        channels: ChannelTable,
        recorder: Option<CsvRecorder<W>>,
        format: OutputFormat,
    ) -> Self {
        Self {
            state: DecoderState::new(),
            channels,
            recorder,
            format,
        }
    }

    /// Stores an accepted message before it is shown; a failing output never costs a
    /// record.
    pub fn handle_frame(&mut self, frame: &[u8], out: &mut impl Write) -> Result<Outcome> {
        let message = match self.state.decode(frame) {
            Ok(message) => message,
            Err(err) => return Ok(Outcome::Dropped(err)),
        };
        if let Some(recorder) = &mut self.recorder {
            if let Err(e) = recorder.record(&message) {
                error!("Failed to write CSV record for message #{}: {e}", message.sequence);
            }
        }
        let shown = match self.format {
            OutputFormat::Text => self.print_text(&message, out),
            OutputFormat::Json => self.print_json(&message, out),
        };
        shown.with_context(|| format!("Cannot show message #{}", message.sequence))?;
        Ok(Outcome::Accepted(message.sequence))
    }

    pub fn flush(&mut self) -> Result<()> {
        if let Some(recorder) = &mut self.recorder {
            recorder.flush().with_context(|| "Cannot flush CSV file")?;
            debug!("CSV flushed, {} records written", recorder.records());
        }
        Ok(())
    }

    fn print_text(&self, message: &DecodedMessage, out: &mut impl Write) -> Result<()> {
        writeln!(
            out,
            "--- Message #{} at {} ---",
            message.sequence,
            chrono::Local::now().to_rfc3339()
        )?;
        for projection in self.channels.project_message(message) {
            match projection {
                Projection::Measurement { spec, value } => {
                    writeln!(out, "{}: {value}", spec.label)?
                }
                Projection::Sensor { spec, state } => writeln!(out, "{}: {state}", spec.label)?,
                Projection::Unknown { channel_id, value } => {
                    writeln!(out, "Channel 0x{channel_id:02X}: {value}")?
                }
                Projection::OutOfRange { .. } => {}
            }
        }
        if !message.complete {
            writeln!(
                out,
                "(incomplete: {} of {} entries)",
                message.entries.len(),
                message.entry_count
            )?;
        }
        Ok(())
    }

    fn print_json(&self, message: &DecodedMessage, out: &mut impl Write) -> Result<()> {
        let readings: Vec<serde_json::Value> = self
            .channels
            .project_message(message)
            .filter_map(|projection| match projection {
                Projection::Measurement { spec, value } => {
                    Some(json!({ "channel": spec.id, "label": spec.label, "value": value }))
                }
                Projection::Sensor { spec, state } => {
                    Some(json!({ "channel": spec.id, "label": spec.label, "state": state }))
                }
                Projection::Unknown { channel_id, value } => {
                    Some(json!({ "channel": channel_id, "value": value }))
                }
                Projection::OutOfRange { .. } => None,
            })
            .collect();
        let payload = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "message": message,
            "readings": readings,
        });
        writeln!(out, "{}", serde_json::to_string(&payload)?)?;
        Ok(())
    }
}

/// Runs until `shutdown` is set or the port fails. Buffered records are flushed on
/// every way out.
pub fn run<R: Read, W: Write>(
    mut reader: FrameReader<R>,
    mut monitor: Monitor<W>,
    flush_interval: Duration,
    shutdown: &AtomicBool,
    out: &mut impl Write,
) -> Result<()> {
    info!("Starting monitor: flush_interval={flush_interval:?}");
    let result = monitor_loop(&mut reader, &mut monitor, flush_interval, shutdown, out);
    monitor.flush()?;
    info!("Monitor stopped");
    result
}

fn monitor_loop<R: Read, W: Write>(
    reader: &mut FrameReader<R>,
    monitor: &mut Monitor<W>,
    flush_interval: Duration,
    shutdown: &AtomicBool,
    out: &mut impl Write,
) -> Result<()> {
    let mut last_flush = Instant::now();

    while !shutdown.load(Ordering::Relaxed) {
        if let Some(frame) = reader
            .read_frame()
            .with_context(|| "Cannot read from serial port")?
        {
            match monitor.handle_frame(&frame, out)? {
                Outcome::Accepted(sequence) => debug!("Message #{sequence} accepted"),
                Outcome::Dropped(err) if err.is_rejection() => warn!("Frame dropped: {err}"),
                Outcome::Dropped(err) => debug!("Frame suppressed: {err}"),
            }
        }
        if last_flush.elapsed() >= flush_interval {
            monitor.flush()?;
            last_flush = Instant::now();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use enginemon_lib::protocol::DecodedEntry;

    fn frame(sequence: u8, entries: &[(u8, u32, u32)]) -> Vec<u8> {
        DecodedMessage::new(
            sequence,
            entries
                .iter()
                .map(|&(id, value, factor)| DecodedEntry::new(id, value, factor))
                .collect(),
        )
        .encode()
        .unwrap()
    }

    fn monitor(format: OutputFormat) -> Monitor<Vec<u8>> {
        Monitor::new(
            ChannelTable::default(),
            Some(CsvRecorder::new(Vec::new())),
            format,
        )
    }

    fn csv(monitor: Monitor<Vec<u8>>) -> String {
        String::from_utf8(monitor.recorder.unwrap().into_inner()).unwrap()
    }

    #[test]
    fn display_and_csv_share_one_message() {
        let mut monitor = monitor(OutputFormat::Text);
        let mut out = Vec::new();
        let outcome = monitor
            .handle_frame(
                &frame(1, &[(0x01, 2505, 10), (0x11, 1, 0), (0x02, 9999, 1), (0x42, 7, 0)]),
                &mut out,
            )
            .unwrap();
        assert_eq!(outcome, Outcome::Accepted(1));

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("--- Message #1 at "));
        assert!(text.contains("Oil Pressure: 250.5\n"));
        assert!(text.contains("Oil Pressure Sensor: ERROR\n"));
        assert!(text.contains("Channel 0x42: 7\n"));
        // oil temp 9999 is out of range and not shown, but still stored
        assert!(!text.contains("Oil Temp:"));
        assert_eq!(csv(monitor), "4,250.5,1.0,9999.0,7.0\n");
    }

    #[test]
    fn duplicates_and_rejections_are_not_dispatched() {
        let mut monitor = monitor(OutputFormat::Text);
        let mut out = Vec::new();
        let first = frame(9, &[(0x06, 100, 0)]);
        assert_eq!(
            monitor.handle_frame(&first, &mut out).unwrap(),
            Outcome::Accepted(9)
        );
        assert_eq!(
            monitor.handle_frame(&first, &mut out).unwrap(),
            Outcome::Dropped(enginemon_lib::Error::DuplicateSequence(9))
        );
        assert_eq!(
            monitor.handle_frame(&first[..10], &mut out).unwrap(),
            Outcome::Dropped(enginemon_lib::Error::MalformedLength(10))
        );
        assert_eq!(csv(monitor), "1,100.0\n");
    }

    #[test]
    fn json_output() {
        let mut monitor = monitor(OutputFormat::Json);
        let mut out = Vec::new();
        monitor
            .handle_frame(&frame(2, &[(0x0d, 425, 10), (0x12, 0, 0)]), &mut out)
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["message"]["sequence"], 2);
        assert_eq!(value["message"]["complete"], true);
        assert_eq!(value["readings"][0]["label"], "Vibration");
        assert_eq!(value["readings"][0]["value"], 42.5);
        assert_eq!(value["readings"][1]["state"], "Ok");
    }

    #[test]
    fn incomplete_message_is_marked() {
        let mut monitor = monitor(OutputFormat::Text);
        let mut buffer = frame(3, &[(0x05, 300, 0)]);
        buffer[5] = 2;
        let at = buffer.len() - 3;
        let sum = enginemon_lib::protocol::checksum(&buffer[4..at]);
        buffer[at..at + 2].copy_from_slice(&sum.to_le_bytes());

        let mut out = Vec::new();
        monitor.handle_frame(&buffer, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("EGT: 300\n"));
        assert!(text.contains("(incomplete: 1 of 2 entries)"));
    }

    /// Output that refuses every write, like stdout behind a closed pipe.
    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failing_output_still_records() {
        let mut monitor = monitor(OutputFormat::Text);
        assert!(monitor
            .handle_frame(&frame(5, &[(0x06, 120, 0)]), &mut ClosedPipe)
            .is_err());
        assert_eq!(csv(monitor), "1,120.0\n");
    }

    /// Plays the given frames, then raises `shutdown` and times out from then on.
    struct FramesThenShutdown {
        frames: std::collections::VecDeque<Vec<u8>>,
        shutdown: std::sync::Arc<AtomicBool>,
    }

    impl Read for FramesThenShutdown {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.frames.pop_front() {
                Some(frame) => {
                    buf[..frame.len()].copy_from_slice(&frame);
                    Ok(frame.len())
                }
                None => {
                    self.shutdown.store(true, Ordering::Relaxed);
                    Err(std::io::Error::from(std::io::ErrorKind::TimedOut))
                }
            }
        }
    }

    #[test]
    fn shutdown_flushes_pending_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.csv");
        let shutdown = std::sync::Arc::new(AtomicBool::new(false));
        let reader = FrameReader::new(FramesThenShutdown {
            frames: [frame(1, &[(0x01, 10, 0)]), frame(2, &[(0x02, 20, 0)])].into(),
            shutdown: shutdown.clone(),
        });
        let monitor = Monitor::new(
            ChannelTable::default(),
            Some(CsvRecorder::append(&path).unwrap()),
            OutputFormat::Text,
        );

        let mut out = Vec::new();
        run(reader, monitor, Duration::from_secs(3600), &shutdown, &mut out).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1,10.0\n1,20.0\n");
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Oil Temp: 20\n"));
    }

    #[test]
    fn closed_port_stops_the_monitor() {
        let shutdown = AtomicBool::new(false);
        let reader = FrameReader::new(std::io::empty());
        let result = run(
            reader,
            monitor(OutputFormat::Text),
            Duration::from_secs(1),
            &shutdown,
            &mut Vec::new(),
        );
        assert!(result.is_err());
    }
}
