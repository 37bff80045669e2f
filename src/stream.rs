//! Progress stream: the engine's only channel to the outside world.
//! Cooperative, single-subscriber, and lossy under backpressure — a full
//! buffer drops an update rather than stalling the generation loop.

use crate::population::Candidate;
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Terminal and non-terminal states a run can report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Running,
    Stopped,
    Completed,
    Failed,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Stopped | Status::Completed | Status::Failed)
    }
}

/// One generation's worth of reportable state. `top` is capped at 10
/// entries; `message` carries a short diagnostic only when `status ==
/// Failed`.
#[derive(Clone, Debug)]
pub struct Update {
    pub generation: usize,
    pub top: Vec<Candidate>,
    pub best: Option<Candidate>,
    pub evaluations_per_second: f64,
    pub status: Status,
    pub message: Option<String>,
}

const TOP_K: usize = 10;

impl Update {
    fn new(generation: usize, top: &[Candidate], evaluations_per_second: f64, status: Status) -> Self {
        let top: Vec<Candidate> = top.iter().take(TOP_K).copied().collect();
        let best = top.first().copied();
        Self {
            generation,
            top,
            best,
            evaluations_per_second,
            status,
            message: None,
        }
    }

    fn failed(generation: usize, message: String) -> Self {
        Self {
            generation,
            top: Vec::new(),
            best: None,
            evaluations_per_second: 0.0,
            status: Status::Failed,
            message: Some(message),
        }
    }
}

/// Accumulates wall-clock and evaluation counts across a run so each
/// [Update] can report a rolling throughput estimate.
pub struct ThroughputTracker {
    started_at: Instant,
    total_evaluations: u64,
}

impl ThroughputTracker {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_evaluations: 0,
        }
    }

    pub fn record(&mut self, evaluations: u64) {
        self.total_evaluations += evaluations;
    }

    pub fn evaluations_per_second(&self) -> f64 {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            0.0
        } else {
            self.total_evaluations as f64 / elapsed
        }
    }
}

impl Default for ThroughputTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// The emitting half. `try_send` is non-blocking by design — a full
/// buffer silently drops the update rather than stalling the generation
/// loop.
pub struct Emitter {
    updates: mpsc::SyncSender<Update>,
    warnings: mpsc::Sender<String>,
}

/// The subscriber's half, returned once by [channel].
pub struct Subscriber {
    pub updates: mpsc::Receiver<Update>,
    pub warnings: mpsc::Receiver<String>,
}

/// Builds a bounded update channel plus an unbounded warning side-channel
/// that carries diagnostics (e.g. evaluator-pool exhaustion) without
/// overloading the `Update` type.
pub fn channel(buffer: usize) -> (Emitter, Subscriber) {
    let (updates_tx, updates_rx) = mpsc::sync_channel(buffer);
    let (warnings_tx, warnings_rx) = mpsc::channel();
    (
        Emitter {
            updates: updates_tx,
            warnings: warnings_tx,
        },
        Subscriber {
            updates: updates_rx,
            warnings: warnings_rx,
        },
    )
}

impl Emitter {
    pub fn emit_running(&self, generation: usize, top: &[Candidate], eval_per_sec: f64) {
        self.send(Update::new(generation, top, eval_per_sec, Status::Running));
    }

    pub fn emit_stopped(&self, generation: usize, top: &[Candidate], eval_per_sec: f64) {
        self.send(Update::new(generation, top, eval_per_sec, Status::Stopped));
    }

    pub fn emit_completed(&self, generation: usize, top: &[Candidate], eval_per_sec: f64) {
        self.send(Update::new(generation, top, eval_per_sec, Status::Completed));
    }

    pub fn emit_failed(&self, generation: usize, message: impl Into<String>) {
        self.send(Update::failed(generation, message.into()));
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{message}");
        self.warnings.send(message).ok();
    }

    fn send(&self, update: Update) {
        if self.updates.try_send(update).is_err() {
            log::trace!("update stream subscriber buffer full, dropping this generation's update");
        }
    }
}

/// Convenience default for subscribers that only want to poll without a
/// strict deadline (tests mostly use [Subscriber::updates] directly).
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_millis(500);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::Genome;

    fn candidate(fitness: f64) -> Candidate {
        Candidate {
            genome: Genome::new([-0.5, 0.5, 0.0, 0.0, -0.0916, -1.0]),
            fitness,
            c_model: 0.0,
            alpha_model: 0.0,
            g_model: 0.0,
            delta_c: 0.0,
            delta_alpha: 0.0,
            delta_g: 0.0,
            generation: 0,
        }
    }

    #[test]
    fn emitted_update_caps_top_at_ten() {
        let (emitter, subscriber) = channel(4);
        let top: Vec<Candidate> = (0..20).map(|i| candidate(i as f64)).collect();
        emitter.emit_running(5, &top, 100.0);
        let update = subscriber.updates.recv_timeout(DEFAULT_RECV_TIMEOUT).unwrap();
        assert_eq!(update.top.len(), TOP_K);
        assert_eq!(update.best.unwrap().fitness, 0.0);
    }

    #[test]
    fn full_buffer_drops_update_without_blocking() {
        let (emitter, subscriber) = channel(1);
        emitter.emit_running(1, &[candidate(0.1)], 1.0);
        emitter.emit_running(2, &[candidate(0.2)], 1.0); // dropped, buffer full
        let first = subscriber.updates.recv_timeout(DEFAULT_RECV_TIMEOUT).unwrap();
        assert_eq!(first.generation, 1);
    }

    #[test]
    fn warning_channel_is_independent_of_updates() {
        let (emitter, subscriber) = channel(4);
        emitter.warn("precise evaluator pool empty, falling back to fast evaluator");
        let warning = subscriber.warnings.recv_timeout(DEFAULT_RECV_TIMEOUT).unwrap();
        assert!(warning.contains("precise evaluator"));
    }

    #[test]
    fn failed_update_is_terminal_and_carries_message() {
        let update = Update::failed(10, "unrecoverable".to_string());
        assert!(update.status.is_terminal());
        assert_eq!(update.message.as_deref(), Some("unrecoverable"));
    }
}
