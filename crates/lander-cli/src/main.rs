mod control;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use lander_control::{spawn_runtime, spawn_vision, LandingConfig, Session, SystemClock};
use lander_fc::autodetect::{autodetect_fc, default_candidate_bauds, default_candidate_devs, probe_variant};
use lander_fc::poll::PollSchedule;
use lander_fc::serial::SerialTransport;
use lander_fc::sim::SimulatedFc;
use lander_fc::{FcConfig, FcStatus, LinkHealth, LinkIo, Transport};
use lander_proto::Request;
use lander_vision::source::{UdpObservationSource, UdpSourceConfig};

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

#[derive(Debug, Parser)]
#[command(name = "lander", version, about = "Beacon Lander - vision-guided precision landing over MSP")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Doctor,
    /// Fly against the real flight controller.
    Run,
    /// Fly against an in-process simulated flight controller.
    Sim {
        /// Enable the session immediately instead of waiting for the control socket.
        #[arg(long)]
        enable: bool,
    },
    Fc { #[command(subcommand)] cmd: FcCmd },
}

#[derive(Debug, Subcommand)]
enum FcCmd {
    /// Probe serial ports/bauds for an MSP_FC_VARIANT reply.
    Autodetect,
    /// Connect once and print variant, version, arming and altitude.
    Info,
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    #[serde(default)]
    landing: LandingConfig,
    fc: Option<FcConfig>,
    vision: Option<UdpSourceConfig>,
    control: Option<ControlCfg>,
    #[serde(default)]
    sim: SimCfg,
}

#[derive(Debug, serde::Deserialize)]
struct ControlCfg {
    bind: String,
}

#[derive(Debug, serde::Deserialize)]
struct SimCfg {
    #[serde(default = "default_sim_variant")]
    variant: String,
    #[serde(default = "default_sim_altitude_m")]
    start_altitude_m: f32,
    #[serde(default = "default_sim_climb_rate")]
    climb_rate_m_s: f32,
}

fn default_sim_variant() -> String { "INAV".into() }
fn default_sim_altitude_m() -> f32 { 10.0 }
fn default_sim_climb_rate() -> f32 { 1.5 }

impl Default for SimCfg {
    fn default() -> Self {
        Self {
            variant: default_sim_variant(),
            start_altitude_m: default_sim_altitude_m(),
            climb_rate_m_s: default_sim_climb_rate(),
        }
    }
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Run => run(&cfg).await?,
        Command::Sim { enable } => sim(&cfg, enable).await?,
        Command::Fc { cmd } => fc_cmd(&cfg, cmd)?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    cfg.landing.validate().context("landing config")?;
    let mask = cfg.landing.channels.override_mask();
    info!("doctor: set INAV msp_override_channels = {} (0b{:016b})", mask, mask);
    if let Some(p) = &cfg.landing.pilot_override {
        info!("doctor: pilot switch on channel {} must stay out of msp_override_channels", p.channel);
    } else {
        warn!("doctor: no pilot_override switch configured");
    }

    if let Some(fc) = &cfg.fc {
        if fc.autodetect {
            info!("doctor: fc autodetect enabled (OK)");
        } else {
            anyhow::ensure!(fc.serial_dev.as_ref().is_some_and(|s| !s.is_empty()), "fc.serial_dev missing");
            anyhow::ensure!(fc.baud.unwrap_or(0) > 0, "fc.baud invalid");
        }
    } else {
        warn!("doctor: no [fc] section, only `sim` can fly");
    }

    if let Some(v) = &cfg.vision {
        anyhow::ensure!(v.bind.parse::<std::net::SocketAddr>().is_ok(), "vision.bind is not an address: {}", v.bind);
    } else {
        warn!("doctor: no [vision] section, nothing will feed observations");
    }
    if let Some(c) = &cfg.control {
        anyhow::ensure!(c.bind.parse::<std::net::SocketAddr>().is_ok(), "control.bind is not an address: {}", c.bind);
    }

    info!("doctor: OK");
    Ok(())
}

fn fc_cmd(cfg: &Config, cmd: FcCmd) -> Result<()> {
    let fc = cfg.fc.as_ref().context("no [fc] config section")?;
    match cmd {
        FcCmd::Autodetect => {
            let res = run_fc_autodetect(fc)?;
            if let Some((dev, baud)) = res.chosen {
                println!("CHOSEN: {} @ {}", dev, baud);
            } else {
                println!("CHOSEN: none");
            }
            for p in res.probes {
                println!(
                    "probe dev={} baud={} variant={} {}ms note={}",
                    p.dev,
                    p.baud,
                    p.variant.as_deref().unwrap_or("-"),
                    p.elapsed_ms,
                    p.note
                );
            }
            Ok(())
        }
        FcCmd::Info => {
            let (dev, baud) = resolve_fc_port(fc)?;
            let port = SerialTransport::open(&dev, baud, read_timeout(fc)).context("FC open")?;
            let st = query_fc(port, probe_timeout(fc))?;
            println!("port={} baud={}", dev, baud);
            println!("variant={:?} version={:?}", st.variant, st.version);
            println!("armed={:?} mode_flags={:#x}", st.armed, st.mode_flags);
            println!("altitude={:?}", st.altitude.map(|a| a.altitude_m));
            println!("rc={:?}", st.rc);
            Ok(())
        }
    }
}

/// Ask for every telemetry kind once and collect replies until `timeout`.
fn query_fc<T: Transport>(transport: T, timeout: Duration) -> Result<FcStatus> {
    let status = Arc::new(Mutex::new(FcStatus::default()));
    let health = Arc::new(Mutex::new(LinkHealth::default()));
    let polls = [Request::FcVariant, Request::FcVersion, Request::Status, Request::Altitude, Request::Rc]
        .into_iter()
        .fold(PollSchedule::new(), |p, r| p.every(r, timeout));
    let mut link = LinkIo::new(transport, polls, status.clone(), health);

    let start = Instant::now();
    link.poll_telemetry(start).context("send telemetry requests")?;
    while start.elapsed() < timeout {
        if link.read_telemetry(Instant::now()).context("read telemetry")? == 0 {
            std::thread::sleep(Duration::from_millis(10));
        }
    }
    let st = status.lock().map_err(|_| anyhow::anyhow!("fc status lock poisoned"))?.clone();
    anyhow::ensure!(st.last_telemetry.is_some(), "no reply from {}", link.transport().describe());
    Ok(st)
}

async fn run(cfg: &Config) -> Result<()> {
    info!("run: starting");
    let fc = cfg.fc.as_ref().context("no [fc] config section")?;
    let (dev, baud) = resolve_fc_port(fc)?;
    let port = SerialTransport::open(&dev, baud, read_timeout(fc)).context("FC open")?;

    let session = Session::new(cfg.landing.clone(), Arc::new(SystemClock)).context("landing config")?;
    if let Ok(mut st) = session.fc_status().lock() {
        st.port = Some(format!("{} @ {}", dev, baud));
    }
    fly(cfg, session, port, false).await
}

async fn sim(cfg: &Config, enable: bool) -> Result<()> {
    info!("sim: starting at {} m", cfg.sim.start_altitude_m);
    let mut fc = SimulatedFc::new(&cfg.sim.variant)
        .realtime()
        .with_climb_rate(cfg.sim.climb_rate_m_s)
        .with_throttle_channel(cfg.landing.channels.throttle);
    fc.set_altitude(cfg.sim.start_altitude_m);
    fc.set_armed(true);

    let session = Session::new(cfg.landing.clone(), Arc::new(SystemClock)).context("landing config")?;
    fly(cfg, session, fc, enable).await
}

/// Wire transport, vision and control socket to one session and run until ctrl-c.
async fn fly<T: Transport + 'static>(cfg: &Config, session: Session, transport: T, enable: bool) -> Result<()> {
    let rt = spawn_runtime(&session, transport)?;

    let vision = match &cfg.vision {
        Some(v) => {
            let source = UdpObservationSource::bind(v).await?;
            Some(spawn_vision(session.clone(), source, rt.stop_signal()))
        }
        None => None,
    };

    let control = match &cfg.control {
        Some(c) => {
            let listener = TcpListener::bind(&c.bind)
                .await
                .with_context(|| format!("bind control socket {}", c.bind))?;
            info!("control: listening on {}", c.bind);
            Some(tokio::spawn(control::serve(listener, session.clone(), rt.stop_signal())))
        }
        None => None,
    };

    if enable {
        session.enable();
    }

    let mut report = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("wait for ctrl-c")?;
                break;
            }
            _ = report.tick() => {
                let st = session.status();
                info!(
                    "status: phase={} alt={:?} target={} link_ok={}",
                    st.phase,
                    st.altitude_m,
                    st.target.is_some(),
                    st.link.healthy
                );
            }
        }
    }

    info!("shutting down");
    session.disable();
    // Let the release frame go out before the loops stop.
    tokio::time::sleep(session.config().tick_period() * 2).await;
    rt.shutdown().await?;
    for h in [vision, control].into_iter().flatten() {
        if let Err(e) = h.await {
            warn!("task join failed: {:#}", e);
        }
    }
    Ok(())
}

fn probe_timeout(fc: &FcConfig) -> Duration {
    Duration::from_millis(fc.probe_timeout_ms.unwrap_or(500))
}

fn read_timeout(fc: &FcConfig) -> Duration {
    Duration::from_millis(fc.read_timeout_ms.unwrap_or(20))
}

fn run_fc_autodetect(fc: &FcConfig) -> Result<lander_fc::autodetect::AutodetectResult> {
    let devs = fc.candidate_devs.clone().unwrap_or_else(default_candidate_devs);
    let bauds = fc.candidate_bauds.clone().unwrap_or_else(default_candidate_bauds);
    autodetect_fc(devs, bauds, probe_timeout(fc))
}

fn resolve_fc_port(fc: &FcConfig) -> Result<(String, u32)> {
    if fc.autodetect {
        let res = run_fc_autodetect(fc)?;
        if let Some((dev, baud)) = res.chosen {
            return Ok((dev, baud));
        }
        anyhow::bail!("fc autodetect failed: no MSP reply found");
    }
    let dev = fc.serial_dev.clone().context("fc.serial_dev missing (autodetect=false)")?;
    let baud = fc.baud.context("fc.baud missing (autodetect=false)")?;

    // Silence on a fixed port is reported, not fatal.
    let mut port = SerialTransport::open(&dev, baud, read_timeout(fc)).context("FC open")?;
    match probe_variant(&mut port, probe_timeout(fc))? {
        Some(v) => info!("fc: {} on {} @ {}", v, dev, baud),
        None => warn!("fc: no MSP_FC_VARIANT reply on {} @ {}", dev, baud),
    }
    Ok((dev, baud))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [fc]
            autodetect = true

            [vision]
            bind = "0.0.0.0:14600"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.landing.tick_hz, 20.0);
        assert_eq!(cfg.sim.variant, "INAV");
        assert!(cfg.control.is_none());
        doctor(&cfg).unwrap();
    }

    #[test]
    fn doctor_rejects_bad_thresholds() {
        let cfg: Config = toml::from_str(
            r#"
            [landing.phase]
            landing_altitude_m = 20.0
            "#,
        )
        .unwrap();
        assert!(doctor(&cfg).is_err());
    }

    #[test]
    fn doctor_wants_a_port_without_autodetect() {
        let cfg: Config = toml::from_str("[fc]\nbaud = 115200\n").unwrap();
        assert!(doctor(&cfg).is_err());
    }

    #[test]
    fn query_reads_simulated_fc() {
        let mut fc = SimulatedFc::new("INAV");
        fc.set_altitude(3.5);
        fc.set_armed(true);
        let st = query_fc(fc, Duration::from_millis(50)).unwrap();
        assert_eq!(st.variant.as_deref(), Some("INAV"));
        assert_eq!(st.armed, Some(true));
        assert_eq!(st.altitude.map(|a| a.altitude_m), Some(3.5));
    }
}
