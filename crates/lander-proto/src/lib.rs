//! Wire layer between the companion computer and an INAV flight controller.

pub mod channels;
pub mod msp;
pub mod stream;
pub mod telemetry;

pub use channels::{ChannelFrame, CHANNEL_COUNT, RC_MAX, RC_MID, RC_MIN};
pub use msp::{decode, encode, Command, Direction, Frame, FrameError};
pub use stream::StreamDecoder;
pub use telemetry::{Request, Telemetry};
