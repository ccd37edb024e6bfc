use anyhow::{Context, Result};
use lander_fc::poll::PollSchedule;
use lander_fc::{LinkIo, OutboundFrame, Transport, TransportError};
use lander_vision::source::ObservationSource;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::session::Session;

/// Running control + I/O tasks for one session.
pub struct RuntimeHandle {
    stop: watch::Sender<bool>,
    io: JoinHandle<Result<(), TransportError>>,
    control: JoinHandle<()>,
}

impl RuntimeHandle {
    /// Receiver that flips to true when the runtime is asked to stop.
    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }

    pub async fn shutdown(self) -> Result<()> {
        let _ = self.stop.send(true);
        self.control.await.context("join control task")?;
        self.io.await.context("join fc io task")?.context("fc link")?;
        info!("runtime: stopped");
        Ok(())
    }
}

/// Spawn the blocking FC I/O loop and the fixed-rate control task.
///
/// Must be called from inside a tokio runtime.
pub fn spawn_runtime<T: Transport + 'static>(session: &Session, transport: T) -> Result<RuntimeHandle> {
    let cfg = session.config();
    let (tx, rx) = mpsc::channel::<OutboundFrame>(cfg.outbound_queue);
    let (stop, stop_rx) = watch::channel(false);

    let link = LinkIo::new(transport, PollSchedule::for_rate(cfg.telemetry_hz), session.fc_status(), session.link_health())
        .with_max_frame_age(cfg.send_window());
    let clock = session.clock();
    let io = tokio::task::spawn_blocking(move || link.run(rx, stop_rx, move || clock.now()));

    let mut scheduler = session.scheduler(tx).context("build scheduler")?;
    let period = cfg.tick_period();
    let mut stopped = stop.subscribe();
    let control = tokio::spawn(async move {
        let mut iv = tokio::time::interval(period);
        iv.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = iv.tick() => {
                    let out = scheduler.tick();
                    if let Some(t) = out.transition {
                        debug!("control: {} -> {}", t.from, t.to);
                    }
                }
                res = stopped.changed() => {
                    if res.is_err() || *stopped.borrow() {
                        break;
                    }
                }
            }
        }
        // Dropping the scheduler closes the outbound queue.
        info!("control: loop exited");
    });

    info!("runtime: control at {} Hz, telemetry at {} Hz", cfg.tick_hz, cfg.telemetry_hz);
    Ok(RuntimeHandle { stop, io, control })
}

/// Feed sightings from `source` into the session until `stop` flips.
pub fn spawn_vision<S: ObservationSource + 'static>(session: Session, mut source: S, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                res = source.next_observation() => match res {
                    Ok(obs) => {
                        session.observe(obs);
                    }
                    Err(e) => {
                        warn!("vision: source failed: {:#}", e);
                        break;
                    }
                },
                res = stop.changed() => {
                    if res.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        info!("vision: task exited");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::LandingConfig;
    use lander_fc::sim::SimulatedFc;
    use lander_nav::FlightPhase;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn simulated_fc_keeps_link_alive() {
        let session = Session::new(LandingConfig::default(), Arc::new(SystemClock)).unwrap();
        let mut fc = SimulatedFc::new("INAV");
        fc.set_altitude(8.0);
        fc.set_armed(true);

        let rt = spawn_runtime(&session, fc).unwrap();
        session.enable();
        tokio::time::sleep(Duration::from_millis(600)).await;

        let st = session.status();
        assert_eq!(st.phase, FlightPhase::Searching);
        assert!(st.link.healthy, "{:?}", st.link);
        assert_eq!(st.altitude_m, Some(8.0));
        assert_eq!(st.armed, Some(true));
        assert_eq!(st.fc_variant, None);

        rt.shutdown().await.unwrap();
    }
}
