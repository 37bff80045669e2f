//! Error taxonomy. These are internal recovery signals; the public
//! evaluator API never surfaces a `Result` — callers only ever observe
//! [crate::population::Candidate] values, including rejection sentinels.
//! [EngineError] is the one exception: it reaches the outside world, but only
//! wrapped in a terminal `Update{status: Status::Failed}`.

use thiserror::Error;

/// Internal failure modes of the precise evaluator's worker pool.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("precise evaluation exceeded the {0:?} hard timeout")]
    Timeout(std::time::Duration),
    #[error("precise evaluator worker pool is empty")]
    WorkerUnavailable,
    #[error("precise evaluator worker failed its startup self-test")]
    SelfTestFailed,
}

/// Surfaces as the terminal `Update` on an unrecoverable engine fault.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("engine fault: {0}")]
    Fault(String),
}
