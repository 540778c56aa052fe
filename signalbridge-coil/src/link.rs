//! Serial link used by the coil monitor.
//!
//! The monitor talks to the bus through [`CoilLink`] and obtains links from a
//! [`LinkOpener`], so the polling loop can run against a real port or a
//! scripted fake.

use std::io::{self, Read, Write};
use std::time::Duration;

use thiserror::Error;
use tokio_serial::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};

/// Wait between writing a request and reading the reply.
pub const TURNAROUND: Duration = Duration::from_millis(5);

/// Transport failures. Any of these closes the link.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Failed to open {port}: {message}")]
    Open { port: String, message: String },

    #[error("Serial port error: {0}")]
    Serial(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<tokio_serial::Error> for LinkError {
    fn from(e: tokio_serial::Error) -> Self {
        LinkError::Serial(e.to_string())
    }
}

/// One request/response exchange on an open link.
pub trait CoilLink: Send {
    /// Send `request` and read up to `response.len()` bytes of the reply.
    ///
    /// Returns the number of bytes read. Fewer bytes than requested means the
    /// device went quiet before the frame was complete; that is not an error.
    fn exchange(&mut self, request: &[u8], response: &mut [u8]) -> Result<usize, LinkError>;
}

/// Opens links for the polling loop.
pub trait LinkOpener: Send + Sync + 'static {
    type Link: CoilLink;

    fn open(&self) -> Result<Self::Link, LinkError>;

    /// Human-readable target for logs.
    fn describe(&self) -> String;
}

/// Serial port parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub data_bits: DataBits,
    /// Per-read timeout.
    pub read_timeout: Duration,
}

/// Opens [`SerialLink`]s with fixed settings.
#[derive(Debug, Clone)]
pub struct SerialLinkOpener {
    settings: SerialSettings,
}

impl SerialLinkOpener {
    pub fn new(settings: SerialSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }
}

impl LinkOpener for SerialLinkOpener {
    type Link = SerialLink;

    fn open(&self) -> Result<SerialLink, LinkError> {
        let s = &self.settings;
        let port = tokio_serial::new(&s.port, s.baud_rate)
            .parity(s.parity)
            .stop_bits(s.stop_bits)
            .data_bits(s.data_bits)
            .timeout(s.read_timeout)
            .open()
            .map_err(|e| LinkError::Open {
                port: s.port.clone(),
                message: e.to_string(),
            })?;

        tracing::info!(port = %s.port, baud = s.baud_rate, "Serial port opened");

        Ok(SerialLink { port })
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.settings.port, self.settings.baud_rate)
    }
}

/// Blocking serial port handle.
pub struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl CoilLink for SerialLink {
    fn exchange(&mut self, request: &[u8], response: &mut [u8]) -> Result<usize, LinkError> {
        self.port.clear(ClearBuffer::Input)?;
        self.port.write_all(request)?;
        self.port.flush()?;

        std::thread::sleep(TURNAROUND);

        let mut filled = 0;
        while filled < response.len() {
            match self.port.read(&mut response[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(filled)
    }
}
