//! An evolutionary search over the coefficients of a scalar-field
//! Lagrangian, looking for the six real numbers `c0..c5` whose emergent
//! constants — speed of light, fine-structure constant, Newton's constant —
//! match their experimental values to as many decimal digits as possible.
//!
//! There are three main elements to this crate:
//! * The [genome](crate::genome) (the search space): a fixed 6-tuple of real
//!   coefficients.
//! * The [evaluator](crate::evaluator) (the search goal): a fast,
//!   IEEE-754-backed evaluator and an arbitrary-precision one sharing
//!   identical semantics, both implementing [evaluator::Evaluator].
//! * The [engine](crate::engine) (the search strategy): a single
//!   `Evolve`-shaped strategy — evaluate, select, cross, mutate, elitism,
//!   Hall of Fame, driven by an [engine::AdaptiveController] that switches
//!   between exploration and precision modes and recovers the population
//!   from stagnation.
//!
//! Terminology:
//! * [Population](crate::population::Population): holds `population_size`
//!   [Candidate](crate::population::Candidate)s for the duration of a
//!   generation.
//! * [Genome](crate::genome::Genome): the 6 real coefficients being
//!   optimised; see [genome::idx] for their semantic indices.
//! * [HallOfFame](crate::population::HallOfFame): a bounded, deduplicated
//!   record of the best candidates seen across a run.
//!
//! All multithreading is implemented using [rayon::iter] for the fast
//! evaluator's batch path and [std::sync::mpsc] for the precise evaluator's
//! request/response/timeout worker pool and the [stream] progress channel.
//!
//! ## Quick usage
//!
//! ```rust
//! use lagrangian_search::engine::{Engine, Parameters, RunConfig, RunConfigBuilder};
//! use lagrangian_search::stream::channel;
//! use std::sync::atomic::AtomicBool;
//!
//! let config = RunConfig::try_from(
//!     RunConfigBuilder::new()
//!         .with_seed(42)
//!         .with_skip_inter_generation_pause(true),
//! )
//! .unwrap();
//! let params = Parameters::exploration(64, 4, 5);
//! let mut engine = Engine::new(config, params);
//!
//! let (emitter, subscriber) = channel(16);
//! let stop = AtomicBool::new(false);
//! engine.run(&emitter, &stop).unwrap();
//!
//! let last = subscriber.updates.try_iter().last().unwrap();
//! println!("generation {} best fitness {:?}", last.generation, last.best.map(|b| b.fitness));
//! ```

pub mod constants;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod export;
pub mod genome;
pub mod physics;
pub mod population;
pub mod rng;
pub mod stream;
