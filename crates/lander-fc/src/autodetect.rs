use std::time::{Duration, Instant};

use anyhow::Result;
use lander_proto::{Request, StreamDecoder, Telemetry};
use tracing::{info, warn};

use crate::serial::SerialTransport;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub dev: String,
    pub baud: u32,
    pub variant: Option<String>,
    pub elapsed_ms: u64,
    pub note: String,
}

#[derive(Debug, Clone)]
pub struct AutodetectResult {
    pub chosen: Option<(String, u32)>,
    pub probes: Vec<ProbeResult>,
}

pub fn default_candidate_devs() -> Vec<String> {
    vec![
        "/dev/serial0".into(),
        "/dev/ttyAMA0".into(),
        "/dev/ttyS0".into(),
        "/dev/ttyUSB0".into(),
        "/dev/ttyUSB1".into(),
        "/dev/ttyACM0".into(),
        "/dev/ttyACM1".into(),
    ]
}

pub fn default_candidate_bauds() -> Vec<u32> {
    vec![115200, 57600, 230400, 921600]
}

/// Ask for MSP_FC_VARIANT and wait up to `timeout` for a valid reply.
pub fn probe_variant<T: Transport>(transport: &mut T, timeout: Duration) -> Result<Option<String>> {
    let start = Instant::now();
    let mut decoder = StreamDecoder::new();
    let mut buf = [0u8; 256];

    transport.write_frame(&Request::FcVariant.encode())?;
    while start.elapsed() < timeout {
        let n = transport.read_available(&mut buf)?;
        if n == 0 {
            std::thread::sleep(Duration::from_millis(10));
            continue;
        }
        decoder.push(&buf[..n]);
        while let Some(res) = decoder.next_frame() {
            if let Ok(Telemetry::FcVariant(v)) = res.and_then(|f| Telemetry::from_frame(&f)) {
                return Ok(Some(v));
            }
        }
    }
    Ok(None)
}

/// Try every device/baud pair and stop at the first that answers MSP.
pub fn autodetect_fc(candidate_devs: Vec<String>, candidate_bauds: Vec<u32>, probe_timeout: Duration) -> Result<AutodetectResult> {
    let mut probes = Vec::new();

    for dev in candidate_devs {
        for baud in &candidate_bauds {
            let start = Instant::now();
            let mut variant = None;

            let note = match SerialTransport::open(&dev, *baud, Duration::from_millis(20)) {
                Ok(mut port) => match probe_variant(&mut port, probe_timeout) {
                    Ok(Some(v)) => {
                        variant = Some(v.clone());
                        v
                    }
                    Ok(None) => "no msp reply".into(),
                    Err(e) => format!("probe failed: {:#}", e),
                },
                Err(e) => {
                    warn!("fc autodetect probe failed dev={} baud={} err={:#}", dev, baud, e);
                    format!("open failed: {:#}", e)
                }
            };

            let found = variant.is_some();
            probes.push(ProbeResult {
                dev: dev.clone(),
                baud: *baud,
                variant,
                elapsed_ms: start.elapsed().as_millis() as u64,
                note,
            });
            if found {
                info!("fc autodetect: OK {} @ {}", dev, baud);
                return Ok(AutodetectResult { chosen: Some((dev, *baud)), probes });
            }
        }
    }

    Ok(AutodetectResult { chosen: None, probes })
}
