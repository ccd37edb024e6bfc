use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::net::UdpSocket;
use tracing::{info, warn};

use crate::{FrameGeometry, TargetObservation};

/// Anything that can hand the core beacon sightings.
pub trait ObservationSource: Send {
    fn next_observation(&mut self) -> impl Future<Output = Result<TargetObservation>> + Send;
}

#[derive(Debug, Clone, Deserialize)]
pub struct UdpSourceConfig {
    pub bind: String,
    /// Required when the detector reports pixel coordinates (`px`/`py`).
    pub frame: Option<FrameGeometry>,
}

/// One JSON datagram from the detector process.
///
/// Either `x`/`y` (already normalized) or `px`/`py` (pixels) must be present.
/// `age_ms` is how long ago the frame was captured, if the detector knows.
#[derive(Debug, Deserialize)]
struct WireObservation {
    x: Option<f32>,
    y: Option<f32>,
    px: Option<f32>,
    py: Option<f32>,
    confidence: f32,
    age_ms: Option<u64>,
}

pub fn parse_datagram(bytes: &[u8], frame: Option<&FrameGeometry>, now: Instant) -> Result<TargetObservation> {
    let w: WireObservation = serde_json::from_slice(bytes).context("parse observation json")?;
    let ts = w
        .age_ms
        .and_then(|ms| now.checked_sub(Duration::from_millis(ms)))
        .unwrap_or(now);

    let obs = match (w.x, w.y, w.px, w.py) {
        (Some(x), Some(y), _, _) => TargetObservation::new(x, y, w.confidence, ts),
        (_, _, Some(px), Some(py)) => {
            let g = frame.context("pixel observation but no frame geometry configured")?;
            TargetObservation::from_pixels(px, py, g, w.confidence, ts)
        }
        _ => anyhow::bail!("observation needs x/y or px/py"),
    };
    obs.context("observation contains non-finite values")
}

pub struct UdpObservationSource {
    sock: UdpSocket,
    frame: Option<FrameGeometry>,
    buf: Vec<u8>,
}

impl UdpObservationSource {
    pub async fn bind(cfg: &UdpSourceConfig) -> Result<Self> {
        let sock = UdpSocket::bind(&cfg.bind)
            .await
            .with_context(|| format!("bind vision socket {}", cfg.bind))?;
        info!("vision: listening for observations on {}", cfg.bind);
        Ok(Self { sock, frame: cfg.frame, buf: vec![0u8; 2048] })
    }
}

impl ObservationSource for UdpObservationSource {
    async fn next_observation(&mut self) -> Result<TargetObservation> {
        loop {
            let (n, peer) = self.sock.recv_from(&mut self.buf).await.context("vision recv")?;
            match parse_datagram(&self.buf[..n], self.frame.as_ref(), Instant::now()) {
                Ok(obs) => return Ok(obs),
                // A bad datagram is the detector's problem, not ours.
                Err(e) => warn!("vision: ignoring datagram from {}: {:#}", peer, e),
            }
        }
    }
}
