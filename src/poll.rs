//! The polling loop: capture → query → publish on a fixed cadence.
//!
//! One loop owns one source and one backend. Ticks are wall-clock anchored
//! and never overlap: an overrunning cycle makes the next one start
//! immediately, and ticks that land while a cycle is in flight are skipped,
//! not queued. Cancellation is cooperative and checked at tick boundaries;
//! an in-flight cycle always finishes, and the camera is closed on every
//! exit path.

use std::time::{Instant, SystemTime};

use metrics::counter;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::backend::{Answer, InferenceBackend};
use crate::capture::FrameSource;
use crate::config::LoopConfig;
use crate::errors::{CameraError, ConfigError, InferenceError};
use crate::sink::{CycleOutcome, CycleRecord, ResultSink};

/// Loop lifecycle. Stopped and Errored are final; a new loop instance is
/// needed to run again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopping,
    Stopped,
    Errored,
}

/// What ended (or refused to start) a run.
#[derive(Debug, Clone, Error)]
pub enum LoopError {
    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("{0} consecutive transient failures, treating the pipeline as dead")]
    TransientStorm(u32),

    #[error("loop already ran; build a new instance")]
    AlreadyRan,
}

/// Cooperative cancellation signal; cheap to clone across tasks.
#[derive(Clone)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}

enum CycleResult {
    Answered,
    Skipped,
}

pub struct PollingLoop {
    config: LoopConfig,
    source: Box<dyn FrameSource>,
    backend: Box<dyn InferenceBackend>,
    sink: Box<dyn ResultSink>,
    state: LoopState,
    cycles: u64,
    consecutive_transient: u32,
    sink_failures: u64,
    last_answer: Option<Answer>,
    last_error: Option<LoopError>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl PollingLoop {
    /// Validates the configuration before any resource is touched.
    pub fn new(
        config: LoopConfig,
        source: Box<dyn FrameSource>,
        backend: Box<dyn InferenceBackend>,
        sink: Box<dyn ResultSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (stop_tx, stop_rx) = watch::channel(false);
        Ok(Self {
            config,
            source,
            backend,
            sink,
            state: LoopState::Idle,
            cycles: 0,
            consecutive_transient: 0,
            sink_failures: 0,
            last_answer: None,
            last_error: None,
            stop_tx,
            stop_rx,
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.stop_tx.clone(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Cycles attempted so far (successful or skipped).
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn sink_failures(&self) -> u64 {
        self.sink_failures
    }

    pub fn last_answer(&self) -> Option<&Answer> {
        self.last_answer.as_ref()
    }

    pub fn last_error(&self) -> Option<&LoopError> {
        self.last_error.as_ref()
    }

    /// Run to completion: until stopped, the duration bound, or a fatal
    /// error. Consumes the Idle state; terminal states do not restart.
    pub async fn run(&mut self) -> Result<(), LoopError> {
        if self.state != LoopState::Idle {
            return Err(LoopError::AlreadyRan);
        }

        if let Err(e) = self.source.open().await {
            // Camera faults at startup are operator-actionable; no retry.
            error!("Failed to open {}: {e}", self.source.path());
            self.state = LoopState::Errored;
            let err = LoopError::from(e);
            self.last_error = Some(err.clone());
            return Err(err);
        }
        self.state = LoopState::Running;
        info!(
            "Polling {} every {:?} against {} backend",
            self.source.path(),
            self.config.interval(),
            self.backend.name()
        );

        let mut ticker = tokio::time::interval(self.config.interval());
        // Anchored cadence without queueing: a missed tick is skipped and
        // the next one stays on the original schedule.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let deadline = self.config.duration().map(|d| Instant::now() + d);
        let mut stop_rx = self.stop_rx.clone();

        let outcome = loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop_rx.changed() => {}
            }

            if *stop_rx.borrow() {
                info!("Stop requested, finishing up");
                self.state = LoopState::Stopping;
                break Ok(());
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    info!("Run duration reached after {} cycles", self.cycles);
                    self.state = LoopState::Stopping;
                    break Ok(());
                }
            }

            match self.run_cycle().await {
                Ok(CycleResult::Answered) => {
                    self.consecutive_transient = 0;
                }
                Ok(CycleResult::Skipped) => {
                    self.consecutive_transient += 1;
                    if self.consecutive_transient >= self.config.max_consecutive_transient {
                        break Err(LoopError::TransientStorm(self.consecutive_transient));
                    }
                }
                Err(e) => break Err(e),
            }
        };

        // Guaranteed release, whichever way the loop ended.
        self.source.close();

        match outcome {
            Ok(()) => {
                self.state = LoopState::Stopped;
                info!("Stopped after {} cycles", self.cycles);
                Ok(())
            }
            Err(e) => {
                error!("Run failed after {} cycles: {e}", self.cycles);
                self.state = LoopState::Errored;
                self.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// One capture → query → publish cycle. `Ok(Skipped)` is a transient
    /// failure; `Err` is fatal for the run.
    async fn run_cycle(&mut self) -> Result<CycleResult, LoopError> {
        self.cycles += 1;
        let cycle = self.cycles;
        let timestamp = SystemTime::now();

        let frame = match self.source.capture().await {
            Ok(frame) => frame,
            Err(e) => {
                let transient = e.is_transient();
                self.publish(CycleRecord {
                    cycle,
                    timestamp,
                    device: self.source.path().to_string(),
                    prompt: self.config.prompt.clone(),
                    frame: None,
                    outcome: CycleOutcome::Error {
                        message: e.to_string(),
                        transient,
                    },
                    pixels: None,
                });
                return if transient {
                    warn!("cycle {cycle}: {e}, skipping");
                    counter!("argus_cycles_skipped").increment(1);
                    Ok(CycleResult::Skipped)
                } else {
                    Err(e.into())
                };
            }
        };

        match self.backend.query(&frame, &self.config.prompt).await {
            Ok(answer) => {
                self.last_answer = Some(answer.clone());
                self.publish(CycleRecord {
                    cycle,
                    timestamp,
                    device: self.source.path().to_string(),
                    prompt: self.config.prompt.clone(),
                    frame: Some((&frame).into()),
                    outcome: CycleOutcome::Answer(answer),
                    pixels: Some(frame),
                });
                counter!("argus_cycles_completed").increment(1);
                Ok(CycleResult::Answered)
            }
            Err(e) => {
                let transient = e.is_transient();
                self.publish(CycleRecord {
                    cycle,
                    timestamp,
                    device: self.source.path().to_string(),
                    prompt: self.config.prompt.clone(),
                    frame: Some((&frame).into()),
                    outcome: CycleOutcome::Error {
                        message: e.to_string(),
                        transient,
                    },
                    pixels: None,
                });
                if transient {
                    warn!("cycle {cycle}: {e}, skipping");
                    counter!("argus_cycles_skipped").increment(1);
                    Ok(CycleResult::Skipped)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    /// Sink failures are swallowed and counted, never fatal.
    fn publish(&mut self, record: CycleRecord) {
        if let Err(e) = self.sink.publish(&record) {
            self.sink_failures += 1;
            counter!("argus_sink_failures").increment(1);
            warn!("sink dropped cycle {}: {e}", record.cycle);
        }
    }
}
