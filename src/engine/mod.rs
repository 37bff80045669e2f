//! The evolution engine: the per-generation pipeline tying every other
//! component together — evaluate fitness for the population, select/cross
//! /mutate, compete, report. [RunConfig] is built with the usual
//! `Builder` + `TryFrom<Builder>` + `TryFromBuilderError` idiom.

pub mod breeding;
pub mod controller;

pub use controller::{AdaptiveController, EngineEvent, EvolutionState, Mode};

use crate::constants::{EvaluatorKind, EXPLORATION_PRESET};
use crate::error::EngineError;
use crate::evaluator::fast::FastEvaluator;
use crate::evaluator::precise::PreciseEvaluator;
use crate::evaluator::Evaluator;
use crate::genome::{idx, Genome};
use crate::population::{Candidate, HallOfFame, Population};
use crate::rng::{gaussian, rng_from_seed, split_seed};
use crate::stream::Emitter;
use rand::rngs::SmallRng;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const HALL_OF_FAME_CAPACITY: usize = 30;
const TOP_K: usize = 10;
const ALPHA_ELITE_EPSILON: f64 = 1e-12;
const GAUGE_DEDUP_DECIMALS: u32 = 12;
const ALPHA_DEDUP_DECIMALS: u32 = 15;
const INTER_GENERATION_PAUSE: Duration = Duration::from_millis(150);

/// The tunable bundle the adaptive controller replaces wholesale or
/// field-by-field between generations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Parameters {
    pub population_size: usize,
    pub elite_count: usize,
    pub mutation_rate: f64,
    pub mutation_sigma: f64,
    pub mutation_rate_gauge: f64,
    pub mutation_sigma_gauge: f64,
    pub mutation_rate_grav: f64,
    pub mutation_sigma_grav: f64,
    pub crossover_rate: f64,
    pub default_crossover_rate: f64,
    pub default_mutation_rate: f64,
    pub gauge_range: f64,
    pub grav_range: f64,
    pub max_generations: usize,
    pub use_precise: bool,
}

impl Parameters {
    pub fn exploration(population_size: usize, elite_count: usize, max_generations: usize) -> Self {
        Self {
            population_size,
            elite_count,
            mutation_rate: 0.15,
            mutation_sigma: EXPLORATION_PRESET.mutation_sigma,
            mutation_rate_gauge: 0.15,
            mutation_sigma_gauge: EXPLORATION_PRESET.mutation_sigma,
            mutation_rate_grav: 0.15,
            mutation_sigma_grav: EXPLORATION_PRESET.mutation_sigma,
            crossover_rate: 0.7,
            default_crossover_rate: 0.7,
            default_mutation_rate: 0.15,
            gauge_range: EXPLORATION_PRESET.gauge_range,
            grav_range: EXPLORATION_PRESET.grav_range,
            max_generations,
            use_precise: false,
        }
    }

    pub fn apply_preset(&mut self, preset: crate::constants::MutationPreset) {
        self.gauge_range = preset.gauge_range;
        self.grav_range = preset.grav_range;
        self.mutation_sigma = preset.mutation_sigma;
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TryFromBuilderError(pub &'static str);

/// Builder for [RunConfig].
#[derive(Clone, Debug, Default)]
pub struct RunConfigBuilder {
    pub seed: Option<u64>,
    pub worker_threads: Option<usize>,
    pub evaluator_kind: Option<EvaluatorKind>,
    pub skip_inter_generation_pause: bool,
    pub precise_worker_count: Option<usize>,
}

impl RunConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = Some(worker_threads);
        self
    }

    pub fn with_evaluator_kind(mut self, kind: EvaluatorKind) -> Self {
        self.evaluator_kind = Some(kind);
        self
    }

    pub fn with_precise_worker_count(mut self, count: usize) -> Self {
        self.precise_worker_count = Some(count);
        self
    }

    /// Skips the inter-generation pause; used by tests so the suite does
    /// not pay 150ms per generation.
    pub fn with_skip_inter_generation_pause(mut self, skip: bool) -> Self {
        self.skip_inter_generation_pause = skip;
        self
    }
}

/// Immutable run-level configuration, produced from a [RunConfigBuilder].
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub seed: u64,
    pub worker_threads: usize,
    pub evaluator_kind: EvaluatorKind,
    pub skip_inter_generation_pause: bool,
    pub precise_worker_count: usize,
}

impl TryFrom<RunConfigBuilder> for RunConfig {
    type Error = TryFromBuilderError;

    fn try_from(builder: RunConfigBuilder) -> Result<Self, Self::Error> {
        let worker_threads = builder.worker_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        if worker_threads == 0 {
            return Err(TryFromBuilderError("RunConfig requires worker_threads > 0"));
        }
        Ok(Self {
            seed: builder.seed.unwrap_or(0),
            worker_threads,
            evaluator_kind: builder.evaluator_kind.unwrap_or(EvaluatorKind::Fast),
            skip_inter_generation_pause: builder.skip_inter_generation_pause,
            precise_worker_count: builder.precise_worker_count.unwrap_or(worker_threads),
        })
    }
}

/// A plain clone of the mutable control state, used only by tests/debugging
/// to compare two runs generation-by-generation.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub state: EvolutionState,
    pub params: Parameters,
}

/// Owns every piece of mutable run state and drives the per-generation
/// pipeline. Not `Clone`/`Send` by design: one logical engine driver per
/// run.
pub struct Engine {
    config: RunConfig,
    params: Parameters,
    state: EvolutionState,
    population: Population,
    hall_of_fame: HallOfFame,
    rng: SmallRng,
    fast_evaluator: FastEvaluator,
    precise_evaluator: Option<PreciseEvaluator>,
    throughput: crate::stream::ThroughputTracker,
}

impl Engine {
    pub fn new(config: RunConfig, params: Parameters) -> Self {
        let mut rng = rng_from_seed(config.seed);
        let candidates = (0..params.population_size)
            .map(|_| Candidate {
                genome: breeding::seed_one(&mut rng),
                fitness: f64::INFINITY,
                c_model: 0.0,
                alpha_model: 0.0,
                g_model: 0.0,
                delta_c: 1.0,
                delta_alpha: 1.0,
                delta_g: 1.0,
                generation: 0,
            })
            .collect();

        let precise_evaluator = if config.evaluator_kind == EvaluatorKind::Precise {
            Some(PreciseEvaluator::new(config.precise_worker_count))
        } else {
            None
        };

        Self {
            config,
            params,
            state: EvolutionState::default(),
            population: Population::new(candidates),
            hall_of_fame: HallOfFame::new(HALL_OF_FAME_CAPACITY),
            rng,
            fast_evaluator: FastEvaluator::new(),
            precise_evaluator,
            throughput: crate::stream::ThroughputTracker::new(),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state.clone(),
            params: self.params,
        }
    }

    pub fn best(&self) -> Option<&Candidate> {
        self.population.best()
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    pub fn hall_of_fame(&self) -> &HallOfFame {
        &self.hall_of_fame
    }

    /// Runs until `max_generations` or `stop` is observed, emitting an
    /// [crate::stream::Update] through `emitter` after every generation.
    pub fn run(&mut self, emitter: &Emitter, stop: &AtomicBool) -> Result<(), EngineError> {
        if self.params.population_size == 0 {
            let fault = EngineError::Fault("population_size must be greater than zero".to_string());
            emitter.emit_failed(self.state.generation, fault.to_string());
            return Err(fault);
        }

        loop {
            if stop.load(Ordering::Relaxed) {
                emitter.emit_stopped(
                    self.state.generation,
                    self.population.top(TOP_K),
                    self.throughput.evaluations_per_second(),
                );
                return Ok(());
            }
            if self.state.generation >= self.params.max_generations {
                emitter.emit_completed(
                    self.state.generation,
                    self.population.top(TOP_K),
                    self.throughput.evaluations_per_second(),
                );
                return Ok(());
            }

            self.step(emitter)?;

            if !self.config.skip_inter_generation_pause {
                std::thread::sleep(INTER_GENERATION_PAUSE);
            }
        }
    }

    /// Runs exactly one generation. Exposed separately from [Self::run] so
    /// tests can drive the loop generation-by-generation.
    pub fn step(&mut self, emitter: &Emitter) -> Result<(), EngineError> {
        let generation = self.state.generation;

        // 1. Evaluate.
        self.evaluate_population(emitter, generation)?;
        self.throughput.record(self.population.size() as u64);

        // 2. Filter.
        let dropped = self.population.retain_survivors();
        if dropped > 0 {
            log::debug!("generation {generation}: dropped {dropped} rejected candidates");
        }
        if self.population.candidates.is_empty() {
            log::warn!("generation {generation}: total generation failure, re-seeding population");
            self.reseed_population();
            emitter.emit_running(generation, &[], self.throughput.evaluations_per_second());
            self.state.generation += 1;
            return Ok(());
        }

        // 3. Sort.
        self.population.sort_by_fitness();

        // 4. Hall of Fame.
        let top = self.population.top(TOP_K).to_vec();
        self.hall_of_fame.merge(&top);

        // 5. Elitism + 7. Breed (elites seed the next generation directly).
        let elite_count = self.params.elite_count;
        let elites = self.select_elites();
        let mut next_generation: Vec<Candidate> = elites;

        self.breed_remainder(&mut next_generation, generation);

        // 6. Injection rules + controller tick (recovery, mode, periodic
        // boosts). Runs on the freshly bred next generation, with the elites
        // at the front of `next_generation` left untouched, so recovery
        // events overwrite random non-elite slots in the generation that is
        // about to become current rather than diluting this generation's
        // breeding pool.
        let mut next_population = Population::new(next_generation);
        let events = AdaptiveController::tick(
            &mut self.state,
            &mut self.params,
            &mut next_population,
            &self.hall_of_fame,
            elite_count,
            &mut self.rng,
        );
        for event in &events {
            log::debug!("generation {generation}: controller event {event:?}");
        }
        let mut next_generation = next_population.candidates;

        // 8. Diversity in precision mode.
        if self.state.mode != Mode::Explore {
            self.enforce_precision_diversity(&mut next_generation);
        }

        next_generation.truncate(self.params.population_size);
        while next_generation.len() < self.params.population_size {
            next_generation.push(self.fresh_candidate(generation));
        }
        self.population = Population::new(next_generation);

        // 10. Emit.
        emitter.emit_running(
            self.state.generation,
            self.population.top(TOP_K),
            self.throughput.evaluations_per_second(),
        );

        Ok(())
    }

    fn evaluate_population(&mut self, emitter: &Emitter, generation: usize) -> Result<(), EngineError> {
        let genomes: Vec<Genome> = self.population.candidates.iter().map(|c| c.genome).collect();

        let evaluated = if self.params.use_precise {
            match &self.precise_evaluator {
                Some(pool) => pool.evaluate_batch(&genomes, generation),
                None => {
                    emitter.warn("precise evaluator requested but no worker pool configured; falling back to fast evaluator");
                    self.fast_evaluator.evaluate_batch(&genomes, generation)
                }
            }
        } else {
            self.fast_evaluator.evaluate_batch(&genomes, generation)
        };

        if evaluated.len() != genomes.len() {
            let fault = EngineError::Fault(format!(
                "evaluator returned {} candidates for {} submitted genomes at generation {generation}",
                evaluated.len(),
                genomes.len()
            ));
            emitter.emit_failed(generation, fault.to_string());
            return Err(fault);
        }

        self.population.candidates = evaluated;
        Ok(())
    }

    fn select_elites(&self) -> Vec<Candidate> {
        let survivors = &self.population.candidates;
        if survivors.is_empty() {
            return Vec::new();
        }

        let mut elites: Vec<Candidate> = if self.state.mode == Mode::Explore {
            survivors
                .iter()
                .take(self.params.elite_count.min(survivors.len()))
                .copied()
                .collect()
        } else {
            let mut kept: Vec<Candidate> = Vec::new();
            for candidate in survivors {
                let is_distinct = kept
                    .iter()
                    .all(|k: &Candidate| (k.alpha_model - candidate.alpha_model).abs() > ALPHA_ELITE_EPSILON);
                if is_distinct {
                    kept.push(*candidate);
                }
                if kept.len() >= self.params.elite_count {
                    break;
                }
            }
            if kept.len() < self.params.elite_count && !kept.is_empty() {
                let mut rng = self.rng.clone();
                while kept.len() < self.params.elite_count {
                    let mut clone = kept[0];
                    let delta = clone.genome.get(idx::GAUGE).abs() * 1e-3;
                    let sign = if rng.gen::<bool>() { 1.0 } else { -1.0 };
                    let value = clone.genome.get(idx::GAUGE) + sign * delta;
                    clone.genome.set(idx::GAUGE, value);
                    kept.push(clone);
                }
            }
            kept
        };

        if elites.len() < self.params.elite_count && elites.len() < survivors.len() {
            let best = elites.first().copied().unwrap_or(survivors[0]);
            let mut rng = self.rng.clone();
            while elites.len() < self.params.elite_count {
                let mut clone = best;
                for i in 0..crate::constants::N_OPS {
                    let magnitude = clone.genome.get(i).abs().max(1e-9) * 1e-3;
                    let value = clone.genome.get(i) + gaussian(&mut rng) * magnitude;
                    clone.genome.set(i, value);
                }
                elites.push(clone);
            }
        }
        elites
    }

    fn breed_remainder(&mut self, next_generation: &mut Vec<Candidate>, generation: usize) {
        let survivors = self.population.candidates.clone();
        let precision_mode = self.state.mode != Mode::Explore;
        let best = self.population.best().copied();

        if survivors.len() < 2 {
            while next_generation.len() < self.params.population_size {
                next_generation.push(self.fresh_candidate(generation));
            }
            return;
        }

        while next_generation.len() < self.params.population_size {
            let i = breeding::select_parent(&mut self.rng, &survivors, precision_mode);
            let j = breeding::select_parent(&mut self.rng, &survivors, precision_mode);
            let (mut child_a, mut child_b) = breeding::crossover(
                &mut self.rng,
                &survivors[i].genome,
                &survivors[j].genome,
                self.params.crossover_rate,
            );

            breeding::mutate(
                &mut self.rng,
                &mut child_a,
                self.params.mutation_rate,
                self.params.mutation_rate_gauge,
                self.params.mutation_rate_grav,
                best.as_ref(),
            );
            child_a.clamp_bounds(self.params.gauge_range, self.params.grav_range);
            next_generation.push(unevaluated_candidate(child_a, generation));

            if next_generation.len() >= self.params.population_size {
                break;
            }

            breeding::mutate(
                &mut self.rng,
                &mut child_b,
                self.params.mutation_rate,
                self.params.mutation_rate_gauge,
                self.params.mutation_rate_grav,
                best.as_ref(),
            );
            child_b.clamp_bounds(self.params.gauge_range, self.params.grav_range);
            next_generation.push(unevaluated_candidate(child_b, generation));
        }
    }

    /// Bounds identical gauge values to 10% of the population and forces
    /// the top-10 by alpha-distance to have distinct alpha values.
    fn enforce_precision_diversity(&mut self, next_generation: &mut [Candidate]) {
        let population_len = next_generation.len();
        if population_len == 0 {
            return;
        }
        let max_duplicates = (population_len as f64 * 0.10).round() as usize;

        let mut seen_gauge = std::collections::HashMap::new();
        for candidate in next_generation.iter_mut() {
            let key = round_to_decimals(candidate.genome.get(idx::GAUGE), GAUGE_DEDUP_DECIMALS);
            let count = seen_gauge.entry(key).or_insert(0usize);
            *count += 1;
            if *count > max_duplicates {
                let jitter = gaussian(&mut self.rng) * 1e-12;
                let value = candidate.genome.get(idx::GAUGE) + jitter;
                candidate.genome.set(idx::GAUGE, value);
                candidate.fitness = f64::INFINITY;
            }
        }

        let alpha_star = crate::constants::ALPHA_STAR;
        let mut indices: Vec<usize> = (0..next_generation.len()).collect();
        indices.sort_by(|&a, &b| {
            (next_generation[a].alpha_model - alpha_star)
                .abs()
                .partial_cmp(&(next_generation[b].alpha_model - alpha_star).abs())
                .unwrap()
        });
        let mut seen_alpha = std::collections::HashSet::new();
        let mut offset_step = 1;
        for &index in indices.iter().take(TOP_K) {
            let key = round_to_decimals(next_generation[index].alpha_model, ALPHA_DEDUP_DECIMALS);
            if !seen_alpha.insert(key) {
                let current = next_generation[index].genome.get(idx::GAUGE);
                let direction = if next_generation[index].alpha_model > alpha_star {
                    -1.0
                } else {
                    1.0
                };
                let offset = direction * (10f64.powi(-(ALPHA_DEDUP_DECIMALS as i32))) * offset_step as f64;
                next_generation[index].genome.set(idx::GAUGE, current + offset);
                next_generation[index].fitness = f64::INFINITY;
                offset_step += 1;
            }
        }
    }

    fn reseed_population(&mut self) {
        let generation = self.state.generation;
        let candidates = (0..self.params.population_size)
            .map(|_| unevaluated_candidate(breeding::seed_one(&mut self.rng), generation))
            .collect();
        self.population = Population::new(candidates);
    }

    fn fresh_candidate(&mut self, generation: usize) -> Candidate {
        unevaluated_candidate(breeding::seed_one(&mut self.rng), generation)
    }
}

fn unevaluated_candidate(genome: Genome, generation: usize) -> Candidate {
    Candidate {
        genome,
        fitness: f64::INFINITY,
        c_model: 0.0,
        alpha_model: 0.0,
        g_model: 0.0,
        delta_c: 1.0,
        delta_alpha: 1.0,
        delta_g: 1.0,
        generation,
    }
}

fn round_to_decimals(value: f64, decimals: u32) -> i64 {
    let scale = 10f64.powi(decimals as i32);
    (value * scale).round() as i64
}

/// Shards a genome slice across `worker_threads` using the split-seed scheme.
/// Currently unused by the fast path (rayon partitions transparently) but
/// kept for the precise pool's explicit per-shard seeding if it ever needs
/// its own randomness (its arithmetic today is not stochastic).
#[allow(dead_code)]
fn shard_seeds(master_seed: u64, generation: usize, shard_count: usize) -> Vec<u64> {
    (0..shard_count)
        .map(|shard| split_seed(master_seed, generation, shard))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::channel;

    fn test_engine(population_size: usize, max_generations: usize) -> Engine {
        let config = RunConfig::try_from(
            RunConfigBuilder::new()
                .with_seed(1)
                .with_skip_inter_generation_pause(true),
        )
        .unwrap();
        let params = Parameters::exploration(population_size, 2, max_generations);
        Engine::new(config, params)
    }

    #[test]
    fn population_size_is_preserved_across_generations() {
        let mut engine = test_engine(32, 3);
        let (emitter, _subscriber) = channel(8);
        for _ in 0..3 {
            engine.step(&emitter).unwrap();
            assert_eq!(engine.population.size(), 32);
        }
    }

    #[test]
    fn survivors_after_a_generation_are_all_finite_and_feasible() {
        let mut engine = test_engine(32, 1);
        let (emitter, _subscriber) = channel(8);
        engine.step(&emitter).unwrap();
        for candidate in &engine.population.candidates {
            assert!(candidate.genome.is_finite());
        }
    }

    #[test]
    fn run_emits_a_terminal_completed_update() {
        let mut engine = test_engine(16, 2);
        let (emitter, subscriber) = channel(8);
        let stop = AtomicBool::new(false);
        engine.run(&emitter, &stop).unwrap();
        let mut last = None;
        while let Ok(update) = subscriber.updates.try_recv() {
            last = Some(update);
        }
        assert_eq!(last.unwrap().status, crate::stream::Status::Completed);
    }

    #[test]
    fn stop_flag_produces_a_stopped_update_without_reaching_max_generations() {
        let mut engine = test_engine(16, 1000);
        let (emitter, subscriber) = channel(8);
        let stop = AtomicBool::new(true);
        engine.run(&emitter, &stop).unwrap();
        let update = subscriber.updates.try_recv().unwrap();
        assert_eq!(update.status, crate::stream::Status::Stopped);
        assert_eq!(update.generation, 0);
    }

    #[test]
    fn run_config_builder_defaults_worker_threads_to_available_parallelism() {
        let config = RunConfig::try_from(RunConfigBuilder::new()).unwrap();
        assert!(config.worker_threads >= 1);
    }

    #[test]
    fn run_rejects_a_zero_sized_population_with_a_failed_update() {
        let mut engine = test_engine(0, 3);
        let (emitter, subscriber) = channel(8);
        let stop = AtomicBool::new(false);

        let result = engine.run(&emitter, &stop);
        assert!(result.is_err());

        let update = subscriber.updates.try_recv().unwrap();
        assert_eq!(update.status, crate::stream::Status::Failed);
    }
}
