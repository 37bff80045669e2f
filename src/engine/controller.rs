//! Adaptive controller: the `Explore -> Precision -> UltraPrecision` state
//! machine, stagnation accounting, and recovery actions. All mutable control
//! state lives in a single [EvolutionState] struct; every recovery branch
//! lives in [AdaptiveController::tick], unit-testable in isolation from the
//! generation loop.

use crate::constants::{EvaluatorKind, EXPLORATION_PRESET, PRECISION_PRESET};
use crate::engine::breeding::seed_one;
use crate::engine::Parameters;
use crate::genome::{idx, Genome};
use crate::population::{Candidate, HallOfFame, Population};
use crate::rng::gaussian;
use rand::Rng;
use std::collections::VecDeque;

const DIGIT_HISTORY_CAP: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Mode {
    Explore,
    Precision,
    UltraPrecision,
}

/// A ring-buffer row of "how many leading digits are currently resolved" for
/// each target constant, used to detect deep stagnation.
#[derive(Clone, Copy, Debug, Default)]
pub struct DigitRecord {
    pub digits_c: u32,
    pub digits_alpha: u32,
    pub digits_g: u32,
}

fn solved_digits(relative_error: f64) -> u32 {
    if relative_error <= 0.0 || !relative_error.is_finite() {
        return 30;
    }
    (-relative_error.log10()).floor().max(0.0) as u32
}

/// Mutable control block. The adaptive controller is the sole owner and
/// mutator of this struct.
#[derive(Clone, Debug)]
pub struct EvolutionState {
    pub generation: usize,
    pub mode: Mode,
    pub fitness_stagnation: u32,
    pub gravity_stagnation: u32,
    pub deep_stagnation: u32,
    pub long_term_stagnation: u32,
    pub mutation_sigma: f64,
    pub last_best_fitness: f64,
    pub last_best_gravity: f64,
    pub digit_history: VecDeque<DigitRecord>,
}

impl Default for EvolutionState {
    fn default() -> Self {
        Self {
            generation: 0,
            mode: Mode::Explore,
            fitness_stagnation: 0,
            gravity_stagnation: 0,
            deep_stagnation: 0,
            long_term_stagnation: 0,
            mutation_sigma: EXPLORATION_PRESET.mutation_sigma,
            last_best_fitness: f64::INFINITY,
            last_best_gravity: 0.0,
            digit_history: VecDeque::with_capacity(DIGIT_HISTORY_CAP),
        }
    }
}

/// Discrete events the controller can fire in one generation, logged at
/// `debug` level so a run's log explains population-shape changes.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    ModeTransition(Mode),
    GaugeFreeze,
    StagnationInjection { fraction: f64 },
    CrossoverBoost,
    ReAnneal,
    HallOfFameReseed { fraction: f64 },
    GaugeDiversityForced,
    GravityDiversityForced,
    AggressiveRecovery,
    AlphaProbe,
    EvaluatorSwitched(EvaluatorKind),
}

pub struct AdaptiveController;

impl AdaptiveController {
    /// Runs all of the controller's bookkeeping and recovery rules for one
    /// generation. Called after elitism/breeding, on the freshly bred next
    /// generation, before the generation's `Update` is emitted. `elite_count`
    /// marks how many leading slots of `population` are elites and must not
    /// be overwritten by injection/recovery.
    pub fn tick(
        state: &mut EvolutionState,
        params: &mut Parameters,
        population: &mut Population,
        hall_of_fame: &HallOfFame,
        elite_count: usize,
        rng: &mut impl Rng,
    ) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        let Some(best) = population.best().copied() else {
            return events;
        };
        let elite_count = elite_count.min(population.size());

        Self::update_mode(state, params, &best, &mut events);
        Self::update_stagnation_counters(state, &best);
        Self::record_digit_history(state, &best);

        if state.fitness_stagnation == 30 {
            inject_random(population, elite_count, 0.10, rng);
            events.push(EngineEvent::StagnationInjection { fraction: 0.10 });
        }

        if state.fitness_stagnation == 50 {
            re_anneal(population, &best, rng);
            events.push(EngineEvent::ReAnneal);
            state.fitness_stagnation = 0;
        }

        if state.fitness_stagnation == 80 {
            hof_reseed(population, hall_of_fame, elite_count, 0.15, rng);
            scale_sigma(state, params, 2.5, 1.5);
            jitter_population(population, elite_count, 0.30, rng);
            events.push(EngineEvent::HallOfFameReseed { fraction: 0.15 });
            state.fitness_stagnation = 0;
        }

        if state.deep_stagnation >= 30 {
            hof_reseed(population, hall_of_fame, elite_count, 0.15, rng);
            jitter_population(population, elite_count, 0.25, rng);
            scale_sigma(state, params, 2.0, 1.0);
            events.push(EngineEvent::HallOfFameReseed { fraction: 0.15 });
            state.deep_stagnation = 0;
        }

        if state.mode != Mode::Explore && state.fitness_stagnation > 5 && best.delta_alpha >= 5e-9 {
            force_gauge_diversity(population, rng, 2.0);
            events.push(EngineEvent::GaugeDiversityForced);
            state.fitness_stagnation = 0;
        }

        if state.gravity_stagnation > 6 && best.delta_c < 1e-7 && best.delta_alpha < 1e-8 && best.delta_g > 1e-4 {
            params.mutation_sigma_grav = (params.mutation_sigma_grav * 1.3).min(4e8);
            if best.delta_g < 1e-3 {
                params.mutation_sigma_grav /= 2.0;
            }
            replace_gravity_directed(population, elite_count, 0.60, rng);
            events.push(EngineEvent::GravityDiversityForced);
            state.gravity_stagnation = 0;
        }

        if state.long_term_stagnation >= 100 {
            aggressive_recovery(state, params, population, hall_of_fame, elite_count, rng);
            events.push(EngineEvent::AggressiveRecovery);
            state.long_term_stagnation = 50;
        }

        if best.delta_c < 1e-6 && best.delta_alpha > 5e-9 && state.fitness_stagnation > 15 {
            alpha_probe(population, &best, rng);
            events.push(EngineEvent::AlphaProbe);
        }

        // Periodic diversity boost: every 100 generations, raise crossover
        // and mutation rates for 20 generations.
        let phase = state.generation % 100;
        if phase == 0 {
            params.crossover_rate = 0.95;
            params.mutation_rate = 0.30;
            events.push(EngineEvent::CrossoverBoost);
        } else if phase == 20 {
            params.crossover_rate = params.default_crossover_rate;
            params.mutation_rate = params.default_mutation_rate;
        }

        state.last_best_fitness = best.fitness;
        state.last_best_gravity = best.genome.get(idx::GRAVITY);
        state.generation += 1;
        events
    }

    fn update_mode(
        state: &mut EvolutionState,
        params: &mut Parameters,
        best: &Candidate,
        events: &mut Vec<EngineEvent>,
    ) {
        if state.mode == Mode::Explore && best.delta_alpha < 1e-5 {
            state.mode = Mode::Precision;
            params.apply_preset(PRECISION_PRESET);
            events.push(EngineEvent::ModeTransition(Mode::Precision));
        }
        if state.mode == Mode::Precision && best.delta_c < 1e-6 {
            params.mutation_rate_gauge = 0.8;
            params.mutation_sigma_gauge = 5e-4;
        }
        if state.mode == Mode::Precision && best.delta_alpha < 1e-6 {
            state.mode = Mode::UltraPrecision;
            params.use_precise = true;
            events.push(EngineEvent::ModeTransition(Mode::UltraPrecision));
            events.push(EngineEvent::EvaluatorSwitched(EvaluatorKind::Precise));
        }
        if best.delta_alpha < 1e-10 {
            params.mutation_rate_gauge = 0.05;
            params.mutation_sigma_gauge = 2e-4;
            events.push(EngineEvent::GaugeFreeze);
        }
    }

    fn update_stagnation_counters(state: &mut EvolutionState, best: &Candidate) {
        if best.fitness < state.last_best_fitness - 1e-8 {
            state.fitness_stagnation = 0;
        } else {
            state.fitness_stagnation += 1;
        }

        if (best.genome.get(idx::GRAVITY) - state.last_best_gravity).abs() > 1e3 {
            state.gravity_stagnation = 0;
        } else {
            state.gravity_stagnation += 1;
        }

        if (best.fitness - state.last_best_fitness).abs() < 1e-12 {
            state.long_term_stagnation += 1;
        } else {
            state.long_term_stagnation = 0;
        }
    }

    fn record_digit_history(state: &mut EvolutionState, best: &Candidate) {
        let record = DigitRecord {
            digits_c: solved_digits(best.delta_c),
            digits_alpha: solved_digits(best.delta_alpha),
            digits_g: solved_digits(best.delta_g),
        };
        state.digit_history.push_back(record);
        if state.digit_history.len() > DIGIT_HISTORY_CAP {
            state.digit_history.pop_front();
        }

        if state.digit_history.len() >= 10 {
            let window: Vec<&DigitRecord> = state
                .digit_history
                .iter()
                .rev()
                .take(10)
                .collect();
            let newest = window[0];
            let no_improvement = window.iter().all(|r| {
                r.digits_c <= newest.digits_c
                    && r.digits_alpha <= newest.digits_alpha
                    && r.digits_g <= newest.digits_g
            });
            if no_improvement {
                state.deep_stagnation += 1;
            } else {
                state.deep_stagnation = 0;
            }
        }
    }
}

fn inject_random(population: &mut Population, elite_count: usize, fraction: f64, rng: &mut impl Rng) {
    let count = ((population.size() as f64) * fraction).round() as usize;
    replace_random_non_elite(population, elite_count, count, rng);
}

fn replace_random_non_elite(population: &mut Population, elite_count: usize, count: usize, rng: &mut impl Rng) {
    let len = population.candidates.len();
    let span = len.saturating_sub(elite_count);
    if span == 0 {
        return;
    }
    for _ in 0..count.min(span) {
        let index = elite_count + rng.gen_range(0..span);
        let genome = seed_one(rng);
        population.candidates[index].genome = genome;
        population.candidates[index].fitness = f64::INFINITY; // re-evaluated next generation
    }
}

fn re_anneal(population: &mut Population, best: &Candidate, rng: &mut impl Rng) {
    let keep = ((population.size() as f64) * 0.2).round() as usize;
    for candidate in population.candidates.iter_mut().skip(keep) {
        let mut genome = best.genome;
        for i in 0..6 {
            genome.set(i, genome.get(i) + gaussian(rng) * 0.02);
        }
        candidate.genome = genome;
        candidate.fitness = f64::INFINITY;
    }
}

fn hof_reseed(
    population: &mut Population,
    hall_of_fame: &HallOfFame,
    elite_count: usize,
    fraction: f64,
    _rng: &mut impl Rng,
) {
    if hall_of_fame.is_empty() {
        return;
    }
    let count = ((population.size() as f64) * fraction).round() as usize;
    let len = population.candidates.len();
    let span = len.saturating_sub(elite_count);
    if span == 0 {
        return;
    }
    for i in 0..count.min(span) {
        let index = elite_count + (i % span);
        let source = &hall_of_fame.entries()[i % hall_of_fame.len()];
        population.candidates[index].genome = source.genome;
        population.candidates[index].fitness = f64::INFINITY;
    }
}

fn jitter_population(population: &mut Population, elite_count: usize, fraction: f64, rng: &mut impl Rng) {
    let len = population.candidates.len();
    let span = len.saturating_sub(elite_count);
    let count = ((span as f64) * fraction).round() as usize;
    for i in 0..count.min(span) {
        let candidate = &mut population.candidates[elite_count + i];
        for gene in 0..6 {
            let value = candidate.genome.get(gene);
            candidate.genome.set(gene, value + gaussian(rng) * value.abs().max(1e-9) * 1e-3);
        }
        candidate.fitness = f64::INFINITY;
    }
}

fn scale_sigma(state: &mut EvolutionState, params: &mut Parameters, sigma_factor: f64, rate_factor: f64) {
    state.mutation_sigma *= sigma_factor;
    params.mutation_rate = (params.mutation_rate * rate_factor).min(0.95);
}

fn force_gauge_diversity(population: &mut Population, rng: &mut impl Rng, strength: f64) {
    let mut seen = std::collections::HashSet::new();
    for candidate in population.candidates.iter_mut() {
        let rounded = (candidate.genome.get(idx::GAUGE) * 1e12).round() as i64;
        if !seen.insert(rounded) {
            let delta = gaussian(rng) * 1e-12 * strength;
            let value = candidate.genome.get(idx::GAUGE) + delta;
            candidate.genome.set(idx::GAUGE, value);
            candidate.fitness = f64::INFINITY;
        }
    }
}

fn replace_gravity_directed(population: &mut Population, elite_count: usize, fraction: f64, rng: &mut impl Rng) {
    let kappa_star = crate::constants::kappa_star();
    let len = population.candidates.len();
    let span = len.saturating_sub(elite_count);
    let count = ((span as f64) * fraction).round() as usize;
    for i in 0..count.min(span) {
        let index = elite_count + i;
        let mut genome = population.candidates[index].genome;
        let bias = 1.0 + (gaussian(rng) * 1e-3);
        genome.set(idx::GRAVITY, -kappa_star * bias);
        population.candidates[index].genome = genome;
        population.candidates[index].fitness = f64::INFINITY;
    }
}

fn aggressive_recovery(
    state: &mut EvolutionState,
    params: &mut Parameters,
    population: &mut Population,
    hall_of_fame: &HallOfFame,
    elite_count: usize,
    rng: &mut impl Rng,
) {
    params.mutation_rate = (params.mutation_rate * 3.0).min(0.5);
    params.mutation_rate_gauge = (params.mutation_rate_gauge * 3.0).min(0.95);
    params.mutation_rate_grav = (params.mutation_rate_grav * 3.0).min(0.8);

    let len = population.candidates.len();
    let replace_count = ((len.saturating_sub(elite_count)) as f64 * 0.5).round() as usize;
    for i in elite_count..(elite_count + replace_count).min(len) {
        population.candidates[i].genome = seed_one(rng);
        population.candidates[i].fitness = f64::INFINITY;
    }

    force_gauge_diversity(population, rng, 2.0);
    replace_gravity_directed(population, elite_count, 0.1, rng);
    jitter_population(population, elite_count, 0.5, rng);
    hof_reseed(population, hall_of_fame, elite_count, 0.30, rng);

    state.fitness_stagnation = 0;
    state.gravity_stagnation = 0;
    state.deep_stagnation = 0;
}

fn alpha_probe(population: &mut Population, best: &Candidate, rng: &mut impl Rng) {
    let fraction = 0.05;
    let len = population.candidates.len();
    let count = ((len as f64) * fraction).round() as usize;
    for i in 0..count.min(len) {
        let idx_slot = len - 1 - i;
        let u: f64 = rng.gen::<f64>();
        let magnitude = 10f64.powf(-3.0 - 4.0 * u);
        let sign = if rng.gen::<bool>() { 1.0 } else { -1.0 };
        let mut genome: Genome = best.genome;
        let gauge = best.genome.get(idx::GAUGE);
        genome.set(idx::GAUGE, gauge * (1.0 + sign * magnitude));
        population.candidates[idx_slot].genome = genome;
        population.candidates[idx_slot].fitness = f64::INFINITY;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Parameters;
    use crate::rng::rng_from_seed;

    fn candidate(fitness: f64, delta_alpha: f64, delta_c: f64, delta_g: f64) -> Candidate {
        Candidate {
            genome: Genome::new([-0.5, 0.5, 0.0, 0.0, -0.0916, -1.0]),
            fitness,
            c_model: crate::constants::C_STAR,
            alpha_model: crate::constants::ALPHA_STAR,
            g_model: crate::constants::G_STAR,
            delta_c,
            delta_alpha,
            delta_g,
            generation: 0,
        }
    }

    #[test]
    fn mode_transitions_are_monotonic() {
        let mut state = EvolutionState::default();
        let mut params = Parameters::exploration(32, 2, 10_000);
        let mut pop = Population::new(vec![candidate(0.01, 1e-6, 1e-3, 1e-3)]);
        let hof = HallOfFame::new(30);
        let mut rng = rng_from_seed(1);

        AdaptiveController::tick(&mut state, &mut params, &mut pop, &hof, 2, &mut rng);
        assert_eq!(state.mode, Mode::Precision);

        pop.candidates[0] = candidate(0.001, 1e-7, 1e-7, 1e-5);
        AdaptiveController::tick(&mut state, &mut params, &mut pop, &hof, 2, &mut rng);
        assert_eq!(state.mode, Mode::UltraPrecision);
        assert!(params.use_precise);
    }

    #[test]
    fn long_term_stagnation_triggers_aggressive_recovery_and_resets_to_fifty() {
        let mut state = EvolutionState::default();
        state.long_term_stagnation = 100;
        let mut params = Parameters::exploration(32, 2, 10_000);
        let mut pop = Population::new(vec![candidate(0.5, 0.1, 0.1, 0.1); 32]);
        let hof = HallOfFame::new(30);
        let mut rng = rng_from_seed(2);

        AdaptiveController::tick(&mut state, &mut params, &mut pop, &hof, 2, &mut rng);
        assert_eq!(state.long_term_stagnation, 50);
        assert!(params.mutation_rate >= 0.3);
    }

    #[test]
    fn stagnation_counter_resets_on_fitness_improvement() {
        let mut state = EvolutionState::default();
        state.fitness_stagnation = 10;
        state.last_best_fitness = 1.0;
        let mut params = Parameters::exploration(8, 2, 10_000);
        let mut pop = Population::new(vec![candidate(0.5, 0.1, 0.1, 0.1); 8]);
        let hof = HallOfFame::new(30);
        let mut rng = rng_from_seed(3);
        AdaptiveController::tick(&mut state, &mut params, &mut pop, &hof, 2, &mut rng);
        assert_eq!(state.fitness_stagnation, 0);
    }
}
