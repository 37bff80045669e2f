//! IEEE-754 double-precision evaluator. Deterministic, cacheable pure
//! function from genome to candidate, with a rayon-parallel batch path.

use super::{tolerances_for_generation, Evaluator};
use crate::constants::{DEGENERATE_FITNESS, KNOCKOUT};
use crate::genome::{idx, Genome};
use crate::physics;
use crate::population::Candidate;
use dashmap::DashMap;
use rayon::prelude::*;

const CACHE_EVICTION_THRESHOLD: usize = 10_000;

/// Fast evaluator. Holds a shared, read-mostly cache keyed on the genome's
/// IEEE-754 bit pattern. The cache is a `DashMap` owned by value; the
/// evaluator itself is shared across rayon worker closures by reference.
#[derive(Debug, Default)]
pub struct FastEvaluator {
    cache: DashMap<[u64; 7], Candidate>,
}

impl FastEvaluator {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    fn evaluate_uncached(&self, genome: Genome, generation: usize) -> Candidate {
        let dispersion = physics::Dispersion::from_genome(&genome);
        if dispersion.is_degenerate() {
            log::trace!("degenerate genome (|A| < 1e-15) at generation {generation}: {genome}");
            return sentinel(genome, generation);
        }

        let (c_model, sign_penalty) = physics::speed_of_light(&dispersion);
        if !c_model.is_finite() {
            log::trace!("degenerate dispersion ratio at generation {generation}: {genome}");
            return sentinel(genome, generation);
        }

        let alpha_model = physics::fine_structure(&genome);
        let g_model = physics::gravity(&genome);
        let errors = physics::relative_errors(c_model, alpha_model, g_model);

        let tolerances = tolerances_for_generation(generation);
        let eps = physics::lorentz_epsilon(&genome);
        if errors.delta_c > tolerances.eps_c
            || errors.delta_g > tolerances.eps_g
            || !genome.within_term_limits()
            || eps > crate::constants::LIMIT_LORENTZ_EPS
        {
            log::debug!(
                "knock-out at generation {generation}: delta_c={:.3e} (eps_c={:.3e}), delta_g={:.3e} (eps_g={:.3e}), within_term_limits={}, lorentz_eps={:.3e}",
                errors.delta_c, tolerances.eps_c, errors.delta_g, tolerances.eps_g,
                genome.within_term_limits(), eps
            );
            return Candidate {
                genome,
                fitness: KNOCKOUT,
                c_model,
                alpha_model,
                g_model: g_model.unwrap_or(0.0),
                delta_c: errors.delta_c,
                delta_alpha: errors.delta_alpha,
                delta_g: errors.delta_g,
                generation,
            };
        }

        let mut penalties = sign_penalty;
        if genome.get(idx::C_TT) >= 0.0 || genome.get(idx::C_XX) <= 0.0 {
            penalties += 1.0; // ghost
        }
        if genome.get(idx::MASS) > 0.0 {
            penalties += 0.5; // tachyon
        }
        if genome.get(idx::GAUGE) >= 0.0 {
            penalties += 1.0; // gauge sign
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

        let fitness = errors.delta_alpha + penalties;

        Candidate {
            genome,
            fitness,
            c_model,
            alpha_model,
            g_model: g_model.unwrap_or(0.0),
            delta_c: errors.delta_c,
            delta_alpha: errors.delta_alpha,
            delta_g: errors.delta_g,
            generation,
        }
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

impl Evaluator for FastEvaluator {
    fn evaluate(&self, genome: Genome, generation: usize) -> Candidate {
        let key = genome.cache_key(generation);
        if let Some(hit) = self.cache.get(&key) {
            return *hit;
        }

        if self.cache.len() > CACHE_EVICTION_THRESHOLD {
            log::debug!("fast evaluator cache exceeded {CACHE_EVICTION_THRESHOLD} entries, clearing");
            self.cache.clear();
        }

        let candidate = self.evaluate_uncached(genome, generation);
        self.cache.insert(key, candidate);
        candidate
    }

    fn evaluate_batch(&self, genomes: &[Genome], generation: usize) -> Vec<Candidate> {
        genomes
            .par_iter()
            .map(|g| self.evaluate(*g, generation))
            .collect()
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

    fn anchor() -> Genome {
        Genome::new([-0.5, 0.5, 0.0, 0.0, -0.0916, -kappa_star()])
    }

    #[test]
    fn anchor_genome_is_nonnegative_and_small_fitness() {
        let eval = FastEvaluator::new();
        let c = eval.evaluate(anchor(), 0);
        assert!(c.fitness >= 0.0);
        assert!(c.fitness < 1.0);
        assert!(!c.is_rejected());
    }

    #[test]
    fn cache_hits_are_bit_exact() {
        let eval = FastEvaluator::new();
        let g = anchor();
        let first = eval.evaluate(g, 50);
        let second = eval.evaluate(g, 50);
        assert_eq!(first.fitness.to_bits(), second.fitness.to_bits());
        assert_eq!(eval.cache_size(), 1);
    }

    #[test]
    fn knockout_when_gravity_diverges_late_in_run() {
        let eval = FastEvaluator::new();
        let g = Genome::new([-0.5, 0.5, 0.0, 0.0, -0.0916, 0.0]);
        let c = eval.evaluate(g, 100);
        assert!(c.is_rejected());
        assert_eq!(c.fitness, KNOCKOUT);
    }

    #[test]
    fn progressive_tolerance_accepts_at_g9_rejects_at_g100() {
        // delta_c ~ 5e-3: build a genome whose c_model misses C* by ~0.5%.
        let kappa_star = kappa_star();
        // c_model = sqrt(-c1/c0) * C*; choose c1 slightly off from -c0.
        let c0 = -0.5_f64;
        let target_ratio = 1.01_f64; // sqrt(ratio) overshoots c_model by ~0.5%
        let c1 = -c0 * target_ratio;
        let g = Genome::new([c0, c1, 0.0, 0.0, -0.0916, -kappa_star]);

        let eval = FastEvaluator::new();
        let early = eval.evaluate(g, 9);
        assert!(!early.is_rejected(), "expected acceptance at g=9, got {:?}", early.fitness);

        let late = eval.evaluate(g, 100);
        assert!(late.is_rejected(), "expected rejection at g=100, got {:?}", late.fitness);
    }

    #[test]
    fn degenerate_genome_returns_sentinel() {
        let eval = FastEvaluator::new();
        let g = Genome::new([0.0, 0.5, 0.0, 0.0, -0.0916, -1.0]);
        let c = eval.evaluate(g, 0);
        assert_eq!(c.fitness, DEGENERATE_FITNESS);
    }

    #[test]
    fn clear_cache_resets_size() {
        let eval = FastEvaluator::new();
        eval.evaluate(anchor(), 0);
        assert_eq!(eval.cache_size(), 1);
        eval.clear_cache();
        assert_eq!(eval.cache_size(), 0);
    }
}
