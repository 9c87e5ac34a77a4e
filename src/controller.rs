//! Repeated inventory with audible feedback

use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::session::{Session, SessionState, SharedSession};
use crate::transport::ReaderTransport;
use crate::types::{BuzzerPattern, InventoryResult, RunResult};

/// The session operations a controller run needs
pub trait TagReader {
    fn state(&self) -> SessionState;
    fn inventory(&mut self) -> Result<InventoryResult, SessionError>;
    fn buzzer(&mut self, pattern: BuzzerPattern) -> Result<(), SessionError>;
}

impl<T: ReaderTransport> TagReader for Session<T> {
    fn state(&self) -> SessionState {
        Session::state(self)
    }

    fn inventory(&mut self) -> Result<InventoryResult, SessionError> {
        Session::inventory(self)
    }

    fn buzzer(&mut self, pattern: BuzzerPattern) -> Result<(), SessionError> {
        Session::buzzer(self, pattern)
    }
}

/// Locks once per operation, so other users may get in between cycles
impl<T: ReaderTransport> TagReader for SharedSession<T> {
    fn state(&self) -> SessionState {
        SharedSession::state(self)
    }

    fn inventory(&mut self) -> Result<InventoryResult, SessionError> {
        SharedSession::inventory(self)
    }

    fn buzzer(&mut self, pattern: BuzzerPattern) -> Result<(), SessionError> {
        SharedSession::buzzer(self, pattern)
    }
}

/// Cooperative cancellation flag, checked between cycles
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Controller {
    cycle_interval: Duration,
}

impl Default for Controller {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

impl Controller {
    pub const MAX_CYCLES: u32 = 1_000_000;

    pub fn new(cycle_interval: Duration) -> Self {
        Self { cycle_interval }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.cycle_interval)
    }

    /// Run `cycle_count` inventory cycles, buzzing after each one
    pub fn run<R: TagReader>(
        &self,
        reader: &mut R,
        cycle_count: u32,
        cancel: &CancelToken,
    ) -> Result<RunResult, SessionError> {
        self.run_with_callback(reader, cycle_count, cancel, |_, _| {})
    }

    /// Like [`run`](Self::run), reporting each finished cycle (1-based) to `on_cycle`.
    ///
    /// Empty cycles never stop the run. A lost channel ends it early with
    /// `truncated` set; cancellation ends it with `cancelled` set. Cycles
    /// already finished are always returned.
    pub fn run_with_callback<R, F>(
        &self,
        reader: &mut R,
        cycle_count: u32,
        cancel: &CancelToken,
        mut on_cycle: F,
    ) -> Result<RunResult, SessionError>
    where
        R: TagReader,
        F: FnMut(u32, &InventoryResult),
    {
        if cycle_count == 0 || cycle_count > Self::MAX_CYCLES {
            return Err(SessionError::InvalidParameter(format!(
                "cycle count must be between 1 and {}, got {}",
                Self::MAX_CYCLES,
                cycle_count
            )));
        }

        let mut run = RunResult::default();

        for cycle in 1..=cycle_count {
            if cancel.is_cancelled() {
                info!("Run cancelled after {} of {} cycles", run.completed(), cycle_count);
                run.cancelled = true;
                break;
            }
            debug!("Inventory cycle {} / {}", cycle, cycle_count);

            let result = match reader.inventory() {
                Ok(result) => result,
                Err(SessionError::ChannelLost(e)) => {
                    error!("Run truncated at cycle {}: {}", cycle, e);
                    run.truncated = true;
                    break;
                }
                // session dropped by another user between cycles
                Err(SessionError::InvalidState { .. }) if cycle > 1 => {
                    error!("Run truncated at cycle {}: session no longer ready", cycle);
                    run.truncated = true;
                    break;
                }
                Err(e) => return Err(e),
            };

            match &result.failure {
                Some(failure) => info!("Cycle {}: {}", cycle, failure),
                None => info!("Cycle {}: {} tag(s)", cycle, result.tags.len()),
            }

            let pattern = BuzzerPattern::for_result(&result);
            if let Err(e) = reader.buzzer(pattern) {
                warn!("Buzzer {:?} failed: {}", pattern, e);
            }

            on_cycle(cycle, &result);
            run.cycles.push(result);

            if cycle < cycle_count && reader.state() == SessionState::Disconnected {
                error!("Run truncated after cycle {}: channel lost", cycle);
                run.truncated = true;
                break;
            }

            if cycle < cycle_count && !self.cycle_interval.is_zero() {
                std::thread::sleep(self.cycle_interval);
            }
        }

        Ok(run)
    }
}
