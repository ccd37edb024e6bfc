pub mod autodetect;
pub mod link;
pub mod poll;
pub mod serial;
pub mod sim;
pub mod state;
pub mod transport;

use serde::Deserialize;

pub use link::{LinkHealth, LinkIo, LinkReport, OutboundFrame, DEFAULT_MAX_FRAME_AGE};
pub use state::{AltitudeSample, FcStatus};
pub use transport::{Transport, TransportError};

#[derive(Debug, Clone, Deserialize)]
pub struct FcConfig {
    /// If true, probe candidate serial ports/bauds and pick the first that
    /// answers MSP_FC_VARIANT.
    #[serde(default)]
    pub autodetect: bool,

    /// When autodetect=false: fixed port config
    pub serial_dev: Option<String>,
    pub baud: Option<u32>,

    /// Autodetect candidates (paths). Example:
    /// ["/dev/serial0","/dev/ttyAMA0","/dev/ttyS0","/dev/ttyUSB0","/dev/ttyACM0"]
    pub candidate_devs: Option<Vec<String>>,
    pub candidate_bauds: Option<Vec<u32>>,

    /// Reply wait per probe attempt.
    pub probe_timeout_ms: Option<u64>,

    /// Serial read timeout. Bounds how long the I/O loop can stall on a quiet line.
    pub read_timeout_ms: Option<u64>,
}
