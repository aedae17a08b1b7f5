use crate::protocol::DecodedMessage;
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

pub const DEFAULT_FILE_NAME: &str = "engine_data.csv";

/// One CSV line: announced entry count, then every scaled value with one decimal.
pub fn format_record(message: &DecodedMessage) -> String {
    let mut record = message.entry_count.to_string();
    for entry in &message.entries {
        // writing into a String cannot fail
        let _ = write!(record, ",{:.1}", entry.scaled_value);
    }
    record.push('\n');
    record
}

/// Appends decoded messages to a CSV sink.
///
/// Records are buffered by the writer; call [`CsvRecorder::flush`] to push them out.
#[derive(Debug)]
pub struct CsvRecorder<W: Write> {
    writer: W,
    records: usize,
}

impl CsvRecorder<BufWriter<File>> {
    /// Opens `path` for appending, creating the file if needed.
    pub fn append(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        log::debug!("Open CSV file {path:?} for appending");
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> CsvRecorder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, records: 0 }
    }

    pub fn record(&mut self, message: &DecodedMessage) -> io::Result<()> {
        let record = format_record(message);
        log::trace!("CSV record #{}: {}", message.sequence, record.trim_end());
        self.writer.write_all(record.as_bytes())?;
        self.records += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    /// Number of records written so far.
    pub fn records(&self) -> usize {
        self.records
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
