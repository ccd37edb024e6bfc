//! Landing session: control loop, watchdog, live tuning and task wiring.

pub mod clock;
pub mod config;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod tuning;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LandingConfig;
pub use runtime::{spawn_runtime, spawn_vision, RuntimeHandle};
pub use scheduler::{FrameSink, Scheduler, TickOutcome};
pub use session::{Session, StatusSnapshot};

/// A poisoned lock still holds the last consistent value; keep flying on it.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
