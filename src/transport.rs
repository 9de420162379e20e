//! Byte-stream transport abstraction
//!
//! The driver owns its transport exclusively for the duration of every
//! operation. Reads are blocking with a bounded timeout and return `Ok(0)`
//! when the timeout elapses with nothing received.
//!
//! With the `serial` feature enabled, [`SerialTransport`] provides a
//! `serialport`-backed implementation for native hosts.

use std::io;

/// Blocking, timeout-bounded byte stream to a device
pub trait Transport {
    /// Open the underlying channel
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the channel cannot be opened.
    fn open(&mut self) -> io::Result<()>;

    /// Close the underlying channel
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the channel cannot be closed cleanly.
    fn close(&mut self) -> io::Result<()>;

    /// Whether the channel is currently open
    fn is_open(&self) -> bool;

    /// Write all of `bytes`
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the write fails.
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Block until written bytes have left the host
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the flush fails.
    fn flush_output(&mut self) -> io::Result<()>;

    /// Read up to `buf.len()` bytes, returning 0 when the read timeout elapses
    ///
    /// # Errors
    ///
    /// Returns an I/O error for failures other than a timeout.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Drop any bytes received but not yet read
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the input buffer cannot be cleared.
    fn discard_pending_input(&mut self) -> io::Result<()>;

    /// Active baud rate
    fn baud_rate(&self) -> u32;

    /// Change the baud rate used the next time the channel is opened
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the rate cannot be applied.
    fn reconfigure_baud_rate(&mut self, rate: u32) -> io::Result<()>;
}

#[cfg(feature = "serial")]
pub use self::serial::SerialTransport;

#[cfg(feature = "serial")]
mod serial {
    use std::io::{self, Read, Write};
    use std::time::Duration;

    use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

    use super::Transport;
    use crate::config::CameraConfig;

    /// Serial port transport configured 8N1 with a fixed read timeout
    pub struct SerialTransport {
        path: String,
        baud_rate: u32,
        read_timeout: Duration,
        port: Option<Box<dyn SerialPort>>,
    }

    impl SerialTransport {
        /// Create a closed transport for `path` (e.g. "/dev/ttyUSB0" or "COM3")
        pub fn new(path: impl Into<String>, baud_rate: u32, read_timeout: Duration) -> Self {
            Self {
                path: path.into(),
                baud_rate,
                read_timeout,
                port: None,
            }
        }

        /// Create a closed transport using the rate and timeout from `config`
        pub fn from_config(path: impl Into<String>, config: &CameraConfig) -> Self {
            Self::new(path, config.baud_rate, config.read_timeout())
        }

        /// Device path this transport opens
        pub fn path(&self) -> &str {
            &self.path
        }

        fn port_mut(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
            self.port
                .as_mut()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port not open"))
        }
    }

    impl Transport for SerialTransport {
        fn open(&mut self) -> io::Result<()> {
            if self.port.is_some() {
                return Ok(());
            }

            let port = serialport::new(&self.path, self.baud_rate)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::None)
                .timeout(self.read_timeout)
                .open()?;

            log::info!("Opened {} at {} baud", self.path, self.baud_rate);
            self.port = Some(port);
            Ok(())
        }

        fn close(&mut self) -> io::Result<()> {
            if self.port.take().is_some() {
                log::debug!("Closed {}", self.path);
            }
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.port.is_some()
        }

        fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.port_mut()?.write_all(bytes)
        }

        fn flush_output(&mut self) -> io::Result<()> {
            self.port_mut()?.flush()
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.port_mut()?.read(buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
                Err(e) => Err(e),
            }
        }

        fn discard_pending_input(&mut self) -> io::Result<()> {
            self.port_mut()?.clear(ClearBuffer::Input)?;
            Ok(())
        }

        fn baud_rate(&self) -> u32 {
            self.baud_rate
        }

        fn reconfigure_baud_rate(&mut self, rate: u32) -> io::Result<()> {
            if let Some(port) = self.port.as_mut() {
                port.set_baud_rate(rate)?;
            }
            self.baud_rate = rate;
            Ok(())
        }
    }
}
