//! Evaluator capability set: map a [Genome] to a [Candidate]. Two concrete
//! backends implement it — [fast::FastEvaluator] (IEEE-754 doubles) and
//! [precise::PreciseEvaluator] (arbitrary precision) — so the adaptive
//! controller can swap the implementation at runtime without touching the
//! generation loop.

pub mod fast;
pub mod precise;

use crate::genome::Genome;
use crate::population::Candidate;

/// Hard-constraint tolerance pair active at a given generation. Shared by
/// both evaluators so their gating is identical modulo rounding.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tolerances {
    pub eps_c: f64,
    pub eps_g: f64,
}

const EPS_C_WARMUP: f64 = 1e-2;
const EPS_G_WARMUP: f64 = 1e-1;

/// Progressive hard-constraint schedule: warmup (0-9), a geometric ramp
/// down to the final tolerances (10-99), strict (100-499), and an
/// emergency relaxation for runs that push well past 500 generations.
pub fn tolerances_for_generation(generation: usize) -> Tolerances {
    use crate::constants::{EPS_C_FINAL, EPS_G_FINAL};

    if generation < 10 {
        Tolerances {
            eps_c: EPS_C_WARMUP,
            eps_g: EPS_G_WARMUP,
        }
    } else if generation < 100 {
        let t = (generation - 10) as f64 / 90.0;
        Tolerances {
            eps_c: EPS_C_WARMUP * (EPS_C_FINAL / EPS_C_WARMUP).powf(t),
            eps_g: EPS_G_WARMUP * (EPS_G_FINAL / EPS_G_WARMUP).powf(t),
        }
    } else if generation < 500 {
        Tolerances {
            eps_c: EPS_C_FINAL,
            eps_g: EPS_G_FINAL,
        }
    } else {
        let k = (generation - 500) as f64 * 1e-4;
        Tolerances {
            eps_c: (EPS_C_FINAL * (1.0 + k)).min(2.0 * EPS_C_FINAL),
            eps_g: (EPS_G_FINAL * (1.0 + k)).min(2.0 * EPS_G_FINAL),
        }
    }
}

/// Shared capability set for the fast and precise evaluators.
pub trait Evaluator {
    fn evaluate(&self, genome: Genome, generation: usize) -> Candidate;

    fn evaluate_batch(&self, genomes: &[Genome], generation: usize) -> Vec<Candidate> {
        genomes
            .iter()
            .map(|g| self.evaluate(*g, generation))
            .collect()
    }

    fn cache_size(&self) -> usize;
    fn clear_cache(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warmup_boundary_holds_flat_through_generation_nine() {
        let t9 = tolerances_for_generation(9);
        assert_eq!(t9.eps_c, 1e-2);
        let t10 = tolerances_for_generation(10);
        assert_eq!(t10.eps_c, 1e-2);
    }

    #[test]
    fn progressive_schedule_approaches_final_tolerance_near_g99() {
        let t = tolerances_for_generation(99);
        assert!((t.eps_c - crate::constants::EPS_C_FINAL).abs() / crate::constants::EPS_C_FINAL < 0.2);
    }

    #[test]
    fn strict_phase_snaps_to_final_tolerances() {
        let t = tolerances_for_generation(100);
        assert_eq!(t.eps_c, crate::constants::EPS_C_FINAL);
        assert_eq!(t.eps_g, crate::constants::EPS_G_FINAL);
        let t499 = tolerances_for_generation(499);
        assert_eq!(t499.eps_c, crate::constants::EPS_C_FINAL);
    }

    #[test]
    fn emergency_relax_is_bounded_at_twice_final() {
        let t = tolerances_for_generation(100_000);
        assert_eq!(t.eps_c, 2.0 * crate::constants::EPS_C_FINAL);
        assert_eq!(t.eps_g, 2.0 * crate::constants::EPS_G_FINAL);
    }
}
