//! Arbitrary-precision evaluator. Re-implements the fast evaluator's
//! reductions over `rug::Float` (MPFR-backed, ≥30 decimal digits) so that
//! only rounding differs from [super::fast::FastEvaluator]. Backed by a
//! fixed-size worker pool; each worker self-tests on startup and is recycled
//! on a per-call timeout.

use super::{tolerances_for_generation, Evaluator};
use crate::constants::{DEGENERATE_FITNESS, KNOCKOUT};
use crate::error::EvalError;
use crate::genome::{idx, Genome};
use crate::population::Candidate;
use rug::Float;
use std::sync::mpsc;
use std::sync::Mutex;
use std::time::Duration;

/// Hard per-evaluation timeout.
pub const EVAL_TIMEOUT: Duration = Duration::from_secs(20);
/// Worker self-test timeout at pool startup.
const SELF_TEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Minimum decimal precision a worker must prove at self-test.
const MIN_SELF_TEST_DIGITS: u32 = 20;

fn precision_bits_for_generation(generation: usize) -> u32 {
    let digits = if generation < 500 {
        16
    } else if generation < 1000 {
        20
    } else {
        30
    };
    digits_to_bits(digits)
}

fn digits_to_bits(decimal_digits: u32) -> u32 {
    ((decimal_digits as f64) * std::f64::consts::LOG2_10).ceil() as u32 + 8
}

struct Request {
    genome: Genome,
    generation: usize,
    reply: mpsc::Sender<Candidate>,
}

/// A single MPFR-backed worker thread. Self-tests at construction time and
/// is dropped (recycled) by the pool on timeout or channel failure.
struct Worker {
    sender: mpsc::Sender<Request>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Worker {
    fn spawn() -> Result<Self, EvalError> {
        let (tx, rx) = mpsc::channel::<Request>();
        let (ready_tx, ready_rx) = mpsc::channel::<bool>();

        let handle = std::thread::spawn(move || {
            ready_tx.send(self_test_passes()).ok();
            for request in rx {
                let candidate = evaluate_precise(request.genome, request.generation);
                request.reply.send(candidate).ok();
            }
        });

        match ready_rx.recv_timeout(SELF_TEST_TIMEOUT) {
            Ok(true) => Ok(Self {
                sender: tx,
                handle: Some(handle),
            }),
            _ => {
                log::warn!("precise evaluator worker failed startup self-test");
                Err(EvalError::SelfTestFailed)
            }
        }
    }

    fn submit(&self, genome: Genome, generation: usize) -> Result<Candidate, EvalError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.sender
            .send(Request {
                genome,
                generation,
                reply: reply_tx,
            })
            .map_err(|_| EvalError::WorkerUnavailable)?;
        reply_rx
            .recv_timeout(EVAL_TIMEOUT)
            .map_err(|_| EvalError::Timeout(EVAL_TIMEOUT))
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            drop(handle); // detach; the worker thread exits once its channel closes
        }
    }
}

fn self_test_passes() -> bool {
    let bits = digits_to_bits(MIN_SELF_TEST_DIGITS);
    let one = Float::with_val(bits, 1);
    let three = Float::with_val(bits, 3);
    let third = one / &three;
    let digits = third.to_string_radix(10, None);
    digits.len() as u32 >= MIN_SELF_TEST_DIGITS
}

fn evaluate_precise(genome: Genome, generation: usize) -> Candidate {
    let bits = precision_bits_for_generation(generation);

    let c0 = Float::with_val(bits, genome.get(idx::C_TT));
    let c1 = Float::with_val(bits, genome.get(idx::C_XX));
    let c4 = Float::with_val(bits, genome.get(idx::GAUGE));
    let raw_c5 = Float::with_val(bits, genome.get(idx::GRAVITY));

    let a = Float::with_val(bits, &c0 * -2);
    if Float::with_val(bits, a.clone().abs()) < Float::with_val(bits, 1e-15) {
        return sentinel(genome, generation);
    }
    let b = Float::with_val(bits, &c1 * -2);
    let r = Float::with_val(bits, -(&b) / &a);
    if r == 0 || r.is_nan() {
        return sentinel(genome, generation);
    }
    let r_abs = Float::with_val(bits, r.clone().abs());
    let sign_penalty = if r < 0 { 5.0 } else { 0.0 };

    let c_star = Float::with_val(bits, crate::constants::C_STAR);
    let c_model_precise = Float::with_val(bits, r_abs.sqrt() * &c_star);
    let c_model = c_model_precise.to_f64();

    let pi = Float::with_val(bits, rug::float::Constant::Pi);
    let alpha_model_precise = Float::with_val(bits, c4.clone().abs() / (Float::with_val(bits, 4) * &pi));
    let alpha_model = alpha_model_precise.to_f64();

    let g_model = if raw_c5 == 0 {
        None
    } else {
        let a_mag = Float::with_val(bits, raw_c5.clone().abs());
        let lower = Float::with_val(bits, 1e-13);
        let upper = Float::with_val(bits, 1e-2);
        let g_precise = if a_mag >= lower && a_mag <= upper {
            a_mag
        } else {
            Float::with_val(bits, Float::with_val(bits, 1) / (Float::with_val(bits, 16) * &pi * &a_mag))
        };
        Some(g_precise.to_f64())
    };

    let alpha_star = crate::constants::ALPHA_STAR;
    let delta_alpha = (alpha_model - alpha_star).abs() / alpha_star;
    let delta_c = if c_model.is_finite() {
        (c_model - crate::constants::C_STAR).abs() / crate::constants::C_STAR
    } else {
        1.0
    };
    let delta_g = match g_model {
        Some(g) if g.is_finite() => (g - crate::constants::G_STAR).abs() / crate::constants::G_STAR,
        _ => 1.0,
    };

    let tolerances = tolerances_for_generation(generation);
    let eps = crate::physics::lorentz_epsilon(&genome);
    if delta_c > tolerances.eps_c
        || delta_g > tolerances.eps_g
        || !genome.within_term_limits()
        || eps > crate::constants::LIMIT_LORENTZ_EPS
    {
        return Candidate {
            genome,
            fitness: KNOCKOUT,
            c_model,
            alpha_model,
            g_model: g_model.unwrap_or(0.0),
            delta_c,
            delta_alpha,
            delta_g,
            generation,
        };
    }

    let mut penalties = sign_penalty;
    if genome.get(idx::C_TT) >= 0.0 || genome.get(idx::C_XX) <= 0.0 {
        penalties += 1.0;
    }
    if genome.get(idx::MASS) > 0.0 {
        penalties += 0.5;
    }
    if genome.get(idx::GAUGE) >= 0.0 {
        penalties += 1.0;
    }
    penalties += genome.structural_excess();

    let normalization_excess =
        (genome.get(idx::C_TT) + 0.5).abs() + (genome.get(idx::C_XX) - 0.5).abs();
    if normalization_excess > 0.1 {
        penalties += 0.01 * normalization_excess;
    }

    penalties += if eps < 1e-12 {
        0.0
    } else if eps < 1e-8 {
        10.0 * eps
    } else {
        100.0 * eps
    };

    Candidate {
        genome,
        fitness: delta_alpha + penalties,
        c_model,
        alpha_model,
        g_model: g_model.unwrap_or(0.0),
        delta_c,
        delta_alpha,
        delta_g,
        generation,
    }
}

fn sentinel(genome: Genome, generation: usize) -> Candidate {
    Candidate {
        genome,
        fitness: DEGENERATE_FITNESS,
        c_model: 0.0,
        alpha_model: 0.0,
        g_model: 0.0,
        delta_c: 1.0,
        delta_alpha: 1.0,
        delta_g: 1.0,
        generation,
    }
}

/// Fixed-size worker pool sized by available parallelism. Holds its own
/// small result cache (same byte-stable key as the fast evaluator) since
/// precise evaluations are far more expensive and reuse matters more.
pub struct PreciseEvaluator {
    // Each worker gets its own mutex so one in-flight (up to 20s) call only
    // blocks callers routed to that worker, not the whole pool.
    workers: Vec<Mutex<Option<Worker>>>,
    cache: dashmap::DashMap<[u64; 7], Candidate>,
}

impl PreciseEvaluator {
    /// Builds a pool with `worker_count` workers, dropping any that fail
    /// their startup self-test.
    pub fn new(worker_count: usize) -> Self {
        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            match Worker::spawn() {
                Ok(w) => workers.push(Mutex::new(Some(w))),
                Err(e) => log::warn!("dropping precise worker at pool startup: {e}"),
            }
        }
        Self {
            workers,
            cache: dashmap::DashMap::new(),
        }
    }

    fn submit(&self, genome: Genome, generation: usize) -> Result<Candidate, EvalError> {
        if self.workers.is_empty() {
            return Err(EvalError::WorkerUnavailable);
        }
        let worker_index = (genome.routing_bits() as usize) % self.workers.len();
        let mut slot = self.workers[worker_index].lock().unwrap();

        let Some(worker) = slot.as_ref() else {
            return Err(EvalError::WorkerUnavailable);
        };
        let result = worker.submit(genome, generation);
        if result.is_err() {
            // Recycle: drop the failing worker so its slot stays empty
            // rather than repeatedly blocking on a dead channel.
            *slot = None;
        }
        result
    }
}

impl Evaluator for PreciseEvaluator {
    fn evaluate(&self, genome: Genome, generation: usize) -> Candidate {
        let key = genome.cache_key(generation);
        if let Some(hit) = self.cache.get(&key) {
            return *hit;
        }
        match self.submit(genome, generation) {
            Ok(candidate) => {
                self.cache.insert(key, candidate);
                candidate
            }
            Err(e) => {
                log::warn!("precise evaluation unavailable ({e}); candidate rejected");
                Candidate {
                    genome,
                    fitness: KNOCKOUT,
                    c_model: 0.0,
                    alpha_model: 0.0,
                    g_model: 0.0,
                    delta_c: 1.0,
                    delta_alpha: 1.0,
                    delta_g: 1.0,
                    generation,
                }
            }
        }
    }

    fn evaluate_batch(&self, genomes: &[Genome], generation: usize) -> Vec<Candidate> {
        genomes.iter().map(|g| self.evaluate(*g, generation)).collect()
    }

    fn cache_size(&self) -> usize {
        self.cache.len()
    }

    fn clear_cache(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::kappa_star;

    #[test]
    fn self_test_passes_at_min_precision() {
        assert!(self_test_passes());
    }

    #[test]
    fn precise_evaluator_matches_fast_evaluator_closely() {
        let fast = super::super::fast::FastEvaluator::new();
        let genome = Genome::new([-0.5, 0.5, 0.0, 0.0, -0.0916, -kappa_star()]);
        let fast_candidate = fast.evaluate(genome, 600);
        let precise_candidate = evaluate_precise(genome, 600);
        assert!((fast_candidate.fitness - precise_candidate.fitness).abs() < 1e-9);
    }

    #[test]
    fn precision_schedule_switches_at_digit_bands() {
        assert_eq!(precision_bits_for_generation(0), digits_to_bits(16));
        assert_eq!(precision_bits_for_generation(500), digits_to_bits(20));
        assert_eq!(precision_bits_for_generation(1000), digits_to_bits(30));
    }

    #[test]
    fn pool_with_zero_workers_rejects_all_candidates() {
        let pool = PreciseEvaluator::new(0);
        let c = pool.evaluate(Genome::new([-0.5, 0.5, 0.0, 0.0, -0.0916, -1.0]), 0);
        assert!(c.is_rejected());
    }
}
