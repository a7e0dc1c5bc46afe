use crate::db::Db;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    Idle,
    Scheduled,
    /// A flush is running; `rearm` records writes that arrived meanwhile.
    Flushing { rearm: bool },
}

/// Debounces write-cache inserts into one delayed background flush.
///
/// At most one flush is in flight. The flush runs under the same exclusive
/// gate as writes, so it never interleaves with a write-cache insert.
pub struct FlushScheduler {
    db: Arc<Db>,
    gate: Arc<Semaphore>,
    shutdown: watch::Receiver<bool>,
    delay: Duration,
    state: Mutex<FlushState>,
}

impl FlushScheduler {
    pub fn new(
        db: Arc<Db>,
        gate: Arc<Semaphore>,
        shutdown: watch::Receiver<bool>,
        delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            gate,
            shutdown,
            delay,
            state: Mutex::new(FlushState::Idle),
        })
    }

    pub fn state(&self) -> FlushState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: FlushState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Note that the write cache holds unflushed rows.
    ///
    /// Must be called from within a tokio runtime.
    pub fn signal(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match *state {
                FlushState::Idle => *state = FlushState::Scheduled,
                FlushState::Scheduled => return,
                FlushState::Flushing { .. } => {
                    *state = FlushState::Flushing { rearm: true };
                    return;
                }
            }
        }
        tokio::spawn(Arc::clone(self).run());
    }

    async fn run(self: Arc<Self>) {
        loop {
            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = shutdown.wait_for(|closing| *closing) => {
                    debug!("Scheduled flush abandoned for shutdown");
                    self.set_state(FlushState::Idle);
                    return;
                }
            }

            let Ok(permit) = Arc::clone(&self.gate).acquire_owned().await else {
                self.set_state(FlushState::Idle);
                return;
            };
            if *self.shutdown.borrow() {
                self.set_state(FlushState::Idle);
                return;
            }
            self.set_state(FlushState::Flushing { rearm: false });

            let db = Arc::clone(&self.db);
            let result = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                db.flush()
            })
            .await;
            match result {
                Ok(Ok(moved)) => debug!("Background flush moved {} rows", moved),
                Ok(Err(err)) => warn!("Background flush failed: {}", err),
                Err(err) => warn!("Background flush task failed: {}", err),
            }

            let rearm = {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                let rearm = matches!(*state, FlushState::Flushing { rearm: true });
                *state = if rearm {
                    FlushState::Scheduled
                } else {
                    FlushState::Idle
                };
                rearm
            };
            if !rearm {
                return;
            }
        }
    }
}
