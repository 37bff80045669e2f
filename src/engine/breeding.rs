//! Selection, crossover and mutation as free functions over [Genome]. There
//! is exactly one concrete 6-gene genome in play here, so these stay plain
//! functions rather than swappable trait objects.

use crate::constants::{kappa_star, N_OPS};
use crate::genome::{idx, Genome};
use crate::population::Candidate;
use crate::rng::{choice, gaussian, tournament, uniform};
use rand::Rng;

/// Tournament selection. In precision mode, with probability 0.7 the
/// criterion switches from "lower fitness" to "closer alpha".
pub fn select_parent(rng: &mut impl Rng, survivors: &[Candidate], precision_mode: bool) -> usize {
    let k = 3.min(survivors.len());
    if precision_mode && uniform(rng) < 0.7 {
        tournament(rng, survivors.len(), k, |a, b| {
            survivors[a]
                .delta_alpha
                .partial_cmp(&survivors[b].delta_alpha)
                .unwrap()
        })
    } else {
        tournament(rng, survivors.len(), k, |a, b| {
            survivors[a].fitness.partial_cmp(&survivors[b].fitness).unwrap()
        })
    }
}

/// Single-point crossover at a uniformly chosen cut in `[1, N_OPS-1]`, with
/// probability `crossover_rate`; otherwise clones the parents.
pub fn crossover(rng: &mut impl Rng, a: &Genome, b: &Genome, crossover_rate: f64) -> (Genome, Genome) {
    if uniform(rng) >= crossover_rate {
        return (*a, *b);
    }
    let cut = 1 + choice(rng, N_OPS - 1);
    let mut child_a = *a;
    let mut child_b = *b;
    for i in cut..N_OPS {
        child_a.set(i, b.get(i));
        child_b.set(i, a.get(i));
    }
    (child_a, child_b)
}

/// Per-gene Gaussian mutation. Rates come from the active
/// [crate::engine::Parameters] (tunable by the adaptive controller); each
/// gene's sigma reacts to the live best candidate's `delta_alpha`/`delta_g`
/// rather than to a static config value.
pub fn mutate(
    rng: &mut impl Rng,
    genome: &mut Genome,
    mutation_rate: f64,
    mutation_rate_gauge: f64,
    mutation_rate_grav: f64,
    best: Option<&Candidate>,
) {
    for i in 0..N_OPS {
        let (rate, base_sigma) = match i {
            idx::GAUGE => {
                let sigma = if best.map(|b| b.delta_alpha < 1e-8).unwrap_or(false) {
                    5e-4
                } else {
                    0.05
                };
                (mutation_rate_gauge, sigma)
            }
            idx::GRAVITY => {
                let delta_g = best.map(|b| b.delta_g).unwrap_or(1.0);
                let sigma = if delta_g >= 1e-2 {
                    1.0
                } else if delta_g >= 1e-3 {
                    0.2
                } else {
                    0.01
                };
                (mutation_rate_grav, sigma)
            }
            _ => (mutation_rate, 0.1),
        };
        if uniform(rng) < rate {
            let delta = gaussian(rng) * base_sigma;
            genome.set(i, genome.get(i) + delta);
        }
    }

    directed_mutation(rng, genome, best);
}

/// Directed mutation toward the target constants, active only once the
/// speed-of-light error has converged.
fn directed_mutation(rng: &mut impl Rng, genome: &mut Genome, best: Option<&Candidate>) {
    let Some(best) = best else { return };
    if best.delta_c >= 1e-6 {
        return;
    }

    if best.delta_alpha < 3e-3 {
        let current = genome.get(idx::GAUGE);
        let err = best.alpha_model - crate::constants::ALPHA_STAR;
        let new = current
            + err.signum() * (err / crate::constants::ALPHA_STAR).abs() * current * 0.5
            + gaussian(rng) * current * 1e-5;
        genome.set(idx::GAUGE, new);
    }

    if best.delta_alpha < 1e-8 {
        let current = genome.get(idx::GRAVITY);
        let g_current = best.g_model;
        let gerr = g_current - crate::constants::G_STAR;
        let new = current
            - gerr.signum() * (gerr / crate::constants::G_STAR).abs() * current * 2.0
            + gaussian(rng) * current * 1e-2;
        genome.set(idx::GRAVITY, new);
    }
}

/// Fresh physics-anchored genome. Used by both initial seeding and
/// mid-run re-seeding after a total generation failure.
pub fn seed_one(rng: &mut impl Rng) -> Genome {
    let c0 = -0.55 + uniform(rng) * 0.10; // [-0.55, -0.45]
    let c1 = -c0 + (uniform(rng) - 0.5) * 2.0 * 5e-4; // +/- 5e-4 noise
    let c2 = -0.3 + uniform(rng) * 0.3; // [-0.3, 0]
    let c3 = -0.1 + uniform(rng) * 0.2; // [-0.1, 0.1]
    let c4 = -0.0916 + (uniform(rng) - 0.5) * 2.0 * 5e-5;
    let kappa_star = kappa_star();
    let c5 = -kappa_star + (uniform(rng) - 0.5) * 2.0 * kappa_star * 5e-6;
    Genome::new([c0, c1, c2, c3, c4, c5])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::rng_from_seed;

    #[test]
    fn seed_one_is_anchored_near_physics_values() {
        let mut rng = rng_from_seed(1);
        for _ in 0..100 {
            let g = seed_one(&mut rng);
            assert!((g.get(idx::C_TT) + 0.5).abs() < 0.06);
            assert!((g.get(idx::C_XX) - 0.5).abs() < 0.06);
            assert!(g.get(idx::MASS) <= 0.0 && g.get(idx::MASS) >= -0.3);
        }
    }

    #[test]
    fn crossover_with_zero_rate_clones_parents() {
        let mut rng = rng_from_seed(2);
        let a = Genome::new([1.0; 6]);
        let b = Genome::new([2.0; 6]);
        let (ca, cb) = crossover(&mut rng, &a, &b, 0.0);
        assert_eq!(ca, a);
        assert_eq!(cb, b);
    }

    #[test]
    fn crossover_with_rate_one_mixes_genes() {
        let mut rng = rng_from_seed(3);
        let a = Genome::new([1.0; 6]);
        let b = Genome::new([2.0; 6]);
        let (ca, cb) = crossover(&mut rng, &a, &b, 1.0);
        // At least one gene must have swapped since cut is always >= 1 and < 6.
        assert!(ca != a || cb != b);
    }
}
