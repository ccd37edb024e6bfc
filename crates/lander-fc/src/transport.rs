use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport io: {0}")]
    Io(#[from] io::Error),
    #[error("transport closed")]
    Closed,
}

/// Raw byte pipe to the flight controller.
///
/// Both calls may block for at most the transport's read/write timeout, so
/// callers drive a transport from a blocking task, never from the control loop.
pub trait Transport: Send {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Read whatever is available. `Ok(0)` means nothing arrived within the timeout.
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Human readable endpoint, for logs.
    fn describe(&self) -> String;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        (**self).write_frame(frame)
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).read_available(buf)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
