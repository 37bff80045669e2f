//! CODATA target values, tolerances, operator indices and term limits.
//!
//! Pure data shared by every other module ([crate::physics], [crate::evaluator],
//! [crate::engine]). Nothing here allocates or depends on randomness.

use std::f64::consts::PI;

/// Experimental speed of light, m/s.
pub const C_STAR: f64 = 299_792_458.0;
/// Experimental fine-structure constant.
pub const ALPHA_STAR: f64 = 7.2973525693e-3;
/// Experimental Newton's constant, m^3 kg^-1 s^-2.
pub const G_STAR: f64 = 6.6743e-11;

/// Relative tolerance on the speed of light at full strictness.
pub const EPS_C_FINAL: f64 = 1e-6;
/// Relative tolerance on Newton's constant at full strictness.
pub const EPS_G_FINAL: f64 = 1e-4;

/// Gene index of the gauge coefficient `c4`.
pub const IDX_GAUGE: usize = 4;
/// Gene index of the gravity-coupling coefficient `c5`.
pub const IDX_GRAV: usize = 5;
/// Number of coefficients in a genome.
pub const N_OPS: usize = 6;

/// Fitness assigned to a genome that fails an arithmetic precondition (degenerate).
pub const DEGENERATE_FITNESS: f64 = 1000.0;
/// Fitness assigned to a genome that fails the hard feasibility gate (knock-out).
pub const KNOCKOUT: f64 = 1e9;

/// Hard bound on `|c2|` (mass term).
pub const LIMIT_C2: f64 = 0.8;
/// Hard bound on `|c3|` (self-interaction term).
pub const LIMIT_C3: f64 = 0.35;
/// Hard bound on `|c5|` (gravity-coupling term).
pub const LIMIT_C5: f64 = 8e8;
/// Hard bound on the Lorentz-isotropy violation `epsilon`.
pub const LIMIT_LORENTZ_EPS: f64 = 0.3;

/// A mutation-scale preset swapped in wholesale by the adaptive controller.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MutationPreset {
    pub gauge_range: f64,
    pub grav_range: f64,
    pub mutation_sigma: f64,
}

/// Wide-open search preset used while the controller is in `Explore` mode.
pub const EXPLORATION_PRESET: MutationPreset = MutationPreset {
    gauge_range: 0.2,
    grav_range: 6e8,
    mutation_sigma: 0.2,
};

/// Tightened preset swapped in once the controller reaches `Precision` mode.
pub const PRECISION_PRESET: MutationPreset = MutationPreset {
    gauge_range: 0.05,
    grav_range: 2e8,
    mutation_sigma: 0.05,
};

/// `kappa* = 1 / (16*pi*G*)`, the gravity-coupling anchor used by seeding
/// and gravity-directed mutation.
pub fn kappa_star() -> f64 {
    1.0 / (16.0 * PI * G_STAR)
}

/// Which fitness evaluator implementation currently backs the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvaluatorKind {
    Fast,
    Precise,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kappa_star_is_positive_and_large() {
        let k = kappa_star();
        assert!(k > 0.0);
        assert!(k.is_finite());
    }

    #[test]
    fn presets_are_distinct() {
        assert_ne!(EXPLORATION_PRESET, PRECISION_PRESET);
        assert!(EXPLORATION_PRESET.gauge_range > PRECISION_PRESET.gauge_range);
        assert!(EXPLORATION_PRESET.grav_range > PRECISION_PRESET.grav_range);
    }
}
