use std::io::{self, Read, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_serial::SerialPort;
use tracing::debug;

use crate::transport::{Transport, TransportError};

/// Flight controller UART. Reads return after `timeout` with whatever arrived.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    dev: String,
    baud: u32,
}

impl SerialTransport {
    pub fn open(dev: &str, baud: u32, timeout: Duration) -> Result<Self> {
        let port = tokio_serial::new(dev, baud)
            .timeout(timeout)
            .open()
            .with_context(|| format!("open fc serial device {}", dev))?;
        debug!("serial: opened {} @ {}", dev, baud);
        Ok(Self { port, dev: dev.to_string(), baud })
    }
}

impl Transport for SerialTransport {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(frame)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.port.read(buf) {
            Ok(0) => Err(TransportError::Closed),
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> String {
        format!("{} @ {}", self.dev, self.baud)
    }
}
