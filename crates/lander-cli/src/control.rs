//! JSON-lines operator socket: one request per line, one reply per line.

use anyhow::{Context, Result};
use lander_control::{Session, StatusSnapshot};
use lander_nav::{Axis, Transition};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlRequest {
    Enable,
    Disable,
    Status,
    /// External touchdown confirmation (landing gear switch, operator).
    Landed,
    SetGains {
        axis: Axis,
        kp: f32,
        ki: f32,
        kd: f32,
        /// Stage the gains until the axis next resets instead of applying now.
        #[serde(default)]
        apply_on_reset: Option<bool>,
    },
}

#[derive(Debug, Serialize)]
pub struct ControlReply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<Transition>,
    pub status: StatusSnapshot,
}

impl ControlReply {
    fn ok(session: &Session, transition: Option<Transition>) -> Self {
        Self { ok: true, error: None, transition, status: session.status() }
    }

    fn err(session: &Session, error: String) -> Self {
        Self { ok: false, error: Some(error), transition: None, status: session.status() }
    }
}

/// Apply one request line to the session. Never fails; errors go in the reply.
pub fn handle_line(session: &Session, line: &str) -> ControlReply {
    let req: ControlRequest = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => return ControlReply::err(session, format!("bad request: {}", e)),
    };
    debug!("control: {:?}", req);

    match req {
        ControlRequest::Enable => ControlReply::ok(session, session.enable()),
        ControlRequest::Disable => ControlReply::ok(session, session.disable()),
        ControlRequest::Status => ControlReply::ok(session, None),
        ControlRequest::Landed => {
            session.signal_landed();
            ControlReply::ok(session, None)
        }
        ControlRequest::SetGains { axis, kp, ki, kd, apply_on_reset } => {
            if let Some(on) = apply_on_reset {
                session.set_apply_on_reset(axis, on);
            }
            match session.set_gains(axis, kp, ki, kd) {
                Ok(()) => ControlReply::ok(session, None),
                Err(e) => {
                    warn!("control: {} gains rejected: {}", axis.name(), e);
                    ControlReply::err(session, e.to_string())
                }
            }
        }
    }
}

/// Accept operator connections until `stop` flips.
pub async fn serve(listener: TcpListener, session: Session, mut stop: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            res = listener.accept() => match res {
                Ok((stream, peer)) => {
                    info!("control: client {} connected", peer);
                    let session = session.clone();
                    tokio::spawn(async move {
                        if let Err(e) = client(stream, session).await {
                            warn!("control: client {} dropped: {:#}", peer, e);
                        }
                    });
                }
                Err(e) => warn!("control: accept failed: {:#}", e),
            },
            res = stop.changed() => {
                if res.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
    info!("control: socket closed");
}

async fn client(stream: TcpStream, session: Session) -> Result<()> {
    let (rd, mut wr) = stream.into_split();
    let mut lines = BufReader::new(rd).lines();
    while let Some(line) = lines.next_line().await.context("read request")? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = handle_line(&session, &line);
        let mut out = serde_json::to_vec(&reply).context("encode reply")?;
        out.push(b'\n');
        wr.write_all(&out).await.context("write reply")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lander_control::{LandingConfig, ManualClock};
    use lander_nav::FlightPhase;
    use std::sync::Arc;

    fn session() -> Session {
        Session::new(LandingConfig::default(), Arc::new(ManualClock::default())).unwrap()
    }

    #[test]
    fn enable_then_disable() {
        let s = session();
        let r = handle_line(&s, r#"{"cmd":"enable"}"#);
        assert!(r.ok);
        assert_eq!(r.transition.map(|t| t.to), Some(FlightPhase::Searching));
        assert_eq!(r.status.phase, FlightPhase::Searching);

        let r = handle_line(&s, r#"{"cmd":"disable"}"#);
        assert_eq!(r.status.phase, FlightPhase::Idle);
    }

    #[test]
    fn rejected_gains_are_reported() {
        let s = session();
        let r = handle_line(&s, r#"{"cmd":"set_gains","axis":"roll","kp":-1.0,"ki":0.0,"kd":0.0}"#);
        assert!(!r.ok);
        assert!(r.error.unwrap().contains("roll.kp"));

        let r = handle_line(&s, r#"{"cmd":"set_gains","axis":"descent","kp":0.2,"ki":0.01,"kd":0.0,"apply_on_reset":true}"#);
        assert!(r.ok);
        assert!(r.status.gains.descent.apply_on_reset);
        assert_eq!(r.status.gains.descent.gains.kp, 0.2);
    }

    #[test]
    fn garbage_gets_an_error_reply() {
        let s = session();
        let r = handle_line(&s, "{\"cmd\":\"takeoff\"}");
        assert!(!r.ok);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["status"]["phase"], "IDLE");
        assert!(json.get("transition").is_none());
    }

    #[tokio::test]
    async fn serves_json_lines_over_tcp() {
        let s = session();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let server = tokio::spawn(serve(listener, s.clone(), stop_rx));

        let stream = TcpStream::connect(addr).await.unwrap();
        let (rd, mut wr) = stream.into_split();
        wr.write_all(b"{\"cmd\":\"enable\"}\n{\"cmd\":\"status\"}\n").await.unwrap();
        let mut lines = BufReader::new(rd).lines();

        let first: serde_json::Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first["ok"], true);
        assert_eq!(first["transition"]["to"], "SEARCHING");
        let second: serde_json::Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(second["status"]["phase"], "SEARCHING");

        stop_tx.send(true).unwrap();
        server.await.unwrap();
    }
}
