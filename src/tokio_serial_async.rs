//! Provides an asynchronous frame reader for the engine monitor link using Tokio and the
//! `tokio-serial` crate.
//!
//! This module is suitable for applications built on the Tokio runtime.
//!
//! # Example
//!
//! ```no_run
//! use enginemon_lib::protocol::DecoderState;
//! use enginemon_lib::settings::PortSettings;
//! use enginemon_lib::tokio_serial_async::{Error, FrameReader};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Error> {
//!     let mut reader = FrameReader::open(&PortSettings::default())?;
//!     let mut state = DecoderState::new();
//!
//!     loop {
//!         if let Some(frame) = reader.read_frame().await? {
//!             if let Ok(message) = state.decode(&frame) {
//!                 println!("{:?}", message.readings().collect::<Vec<_>>());
//!             }
//!         }
//!     }
//! }
//! ```

use crate::settings::{Parity, PortSettings, StopBits};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_serial::SerialPortBuilderExt;

/// Errors specific to the asynchronous frame reader.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O error, typically from the serial port communication.
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    /// An error from the `tokio-serial` crate.
    #[error("Tokio serial error: {0}")]
    TokioSerial(#[from] tokio_serial::Error),
    /// The stream reached end of file.
    #[error("Serial port closed")]
    Closed,
}

/// A specialized `Result` type for operations within the `tokio_serial_async` module.
type Result<T> = std::result::Result<T, Error>;

const READ_BUFFER_LENGTH: usize = 4096;

fn parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Odd => tokio_serial::Parity::Odd,
        Parity::Even => tokio_serial::Parity::Even,
    }
}

fn stop_bits(stop_bits: StopBits) -> tokio_serial::StopBits {
    match stop_bits {
        StopBits::One => tokio_serial::StopBits::One,
        StopBits::Two => tokio_serial::StopBits::Two,
    }
}

/// Asynchronously delivers one candidate frame per read event.
#[derive(Debug)]
pub struct FrameReader<S = tokio_serial::SerialStream> {
    stream: S,
    buffer: Vec<u8>,
    io_timeout: Duration, // Timeout for a single read event
}

impl FrameReader<tokio_serial::SerialStream> {
    /// Opens the serial device described by `settings`.
    ///
    /// # Returns
    ///
    /// A `Result` containing the reader or an `Error` if the serial port
    /// cannot be opened or configured for asynchronous operation.
    pub fn open(settings: &PortSettings) -> Result<Self> {
        log::debug!("Open serial port {settings:?}");
        let stream = tokio_serial::new(&settings.device, settings.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(parity(settings.parity))
            .stop_bits(stop_bits(settings.stop_bits))
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()?;
        Ok(Self::new(stream))
    }
}

impl<S: AsyncRead + Unpin> FrameReader<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: vec![0; READ_BUFFER_LENGTH],
            io_timeout: Duration::from_secs(1),
        }
    }

    /// Sets how long [`FrameReader::read_frame`] waits for a read event.
    pub fn set_timeout(&mut self, timeout: Duration) {
        log::trace!("set timeout to {timeout:?}");
        self.io_timeout = timeout;
    }

    /// Waits for the next read event.
    ///
    /// # Returns
    ///
    /// `Ok(None)` if nothing arrived within the timeout, `Error::Closed` once the stream
    /// has ended.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let received =
            match tokio::time::timeout(self.io_timeout, self.stream.read(&mut self.buffer)).await {
                Ok(received) => received?,
                Err(_) => {
                    log::trace!("no data within {:?}", self.io_timeout);
                    return Ok(None);
                }
            };
        if received == 0 {
            return Err(Error::Closed);
        }
        let frame = self.buffer[..received].to_vec();
        log::trace!("read_frame: {frame:02X?}");
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DecodedEntry, DecodedMessage, DecoderState};
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn decodes_frames_from_stream() {
        let (mut device, host) = tokio::io::duplex(512);
        let mut reader = FrameReader::new(host);
        let frame = DecodedMessage::new(3, vec![DecodedEntry::new(0x06, 1500, 10)])
            .encode()
            .unwrap();

        device.write_all(&frame).await.unwrap();
        let received = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(received, frame);

        let message = DecoderState::new().decode(&received).unwrap();
        assert_eq!(message.readings().collect::<Vec<_>>(), vec![(0x06, 150.0)]);
    }

    #[tokio::test]
    async fn timeout_yields_no_frame() {
        let (_device, host) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(host);
        reader.set_timeout(Duration::from_millis(10));
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn closed_stream() {
        let (device, host) = tokio::io::duplex(64);
        drop(device);
        let mut reader = FrameReader::new(host);
        assert!(matches!(reader.read_frame().await, Err(Error::Closed)));
    }
}
