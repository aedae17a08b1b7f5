use crate::settings::{Parity, PortSettings, StopBits};
use std::io::{self, Read};
use std::time::Duration;

/// Errors of the synchronous frame reader.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// The port returned end of file, the device is gone.
    #[error("Serial port closed")]
    Closed,
}

type Result<T> = std::result::Result<T, Error>;

/// Upper bound for one read event, far above the longest frame.
pub const READ_BUFFER_LENGTH: usize = 4096;

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(stop_bits: StopBits) -> Self {
        match stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>> {
    Ok(serialport::available_ports()?)
}

/// Delivers one candidate frame per read event.
///
/// Frames are not reassembled: whatever a single `read()` returns is handed to the
/// decoder as is, validation drops partial or merged reads.
#[derive(Debug)]
pub struct FrameReader<R = Box<dyn serialport::SerialPort>> {
    port: R,
    buffer: Vec<u8>,
}

impl FrameReader<Box<dyn serialport::SerialPort>> {
    pub fn open(settings: &PortSettings, timeout: Duration) -> Result<Self> {
        log::debug!("Open serial port {settings:?} timeout={timeout:?}");
        let port = serialport::new(&settings.device, settings.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(settings.parity.into())
            .stop_bits(settings.stop_bits.into())
            .flow_control(serialport::FlowControl::None)
            .timeout(timeout)
            .open()?;
        Ok(Self::new(port))
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.port.set_timeout(timeout)?;
        Ok(())
    }
}

impl<R: Read> FrameReader<R> {
    pub fn new(port: R) -> Self {
        Self {
            port,
            buffer: vec![0; READ_BUFFER_LENGTH],
        }
    }

    /// Waits for the next read event; `Ok(None)` when the port timed out.
    pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        match self.port.read(&mut self.buffer) {
            Ok(0) => Err(Error::Closed),
            Ok(received) => {
                let frame = self.buffer[..received].to_vec();
                log::trace!("read_frame: {frame:02X?}");
                Ok(Some(frame))
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays prepared read results, one per `read()` call.
    struct ScriptedPort(VecDeque<io::Result<Vec<u8>>>);

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(Ok(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                Some(Err(err)) => Err(err),
                None => Ok(0),
            }
        }
    }

    #[test]
    fn one_frame_per_read_event() {
        let mut reader = FrameReader::new(ScriptedPort(VecDeque::from([
            Ok(vec![0xa5, 0xa5]),
            Err(io::Error::from(io::ErrorKind::TimedOut)),
            Ok(vec![0x55]),
        ])));
        assert_eq!(reader.read_frame().unwrap(), Some(vec![0xa5, 0xa5]));
        assert_eq!(reader.read_frame().unwrap(), None);
        assert_eq!(reader.read_frame().unwrap(), Some(vec![0x55]));
        assert!(matches!(reader.read_frame(), Err(Error::Closed)));
    }

    #[test]
    fn io_errors_are_reported() {
        let mut reader = FrameReader::new(ScriptedPort(VecDeque::from([Err(io::Error::from(
            io::ErrorKind::BrokenPipe,
        ))])));
        assert!(matches!(reader.read_frame(), Err(Error::Io(_))));
    }

    #[test]
    fn parity_mapping() {
        assert_eq!(serialport::Parity::from(Parity::Odd), serialport::Parity::Odd);
        assert_eq!(
            serialport::StopBits::from(StopBits::Two),
            serialport::StopBits::Two
        );
    }
}
