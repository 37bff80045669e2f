//! On-demand export record: a small JSON-shaped snapshot of the current best
//! candidate. No transport or persistence lives here — the embedding layer
//! is responsible for writing this to disk or sending it to collaborators.

use crate::population::Candidate;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// The record returned by [Export::from_candidate].
#[derive(Clone, Debug, Serialize)]
pub struct Export {
    pub coeffs: [f64; 6],
    pub timestamp: DateTime<Utc>,
    pub generation: usize,
    pub fitness: f64,
    pub c_model: f64,
    pub alpha_model: f64,
    pub g_model: f64,
    pub delta_c: f64,
    pub delta_alpha: f64,
    pub delta_g: f64,
}

impl Export {
    pub fn from_candidate(candidate: &Candidate, timestamp: DateTime<Utc>) -> Self {
        Self {
            coeffs: *candidate.genome.genes(),
            timestamp,
            generation: candidate.generation,
            fitness: candidate.fitness,
            c_model: candidate.c_model,
            alpha_model: candidate.alpha_model,
            g_model: candidate.g_model,
            delta_c: candidate.delta_c,
            delta_alpha: candidate.delta_alpha,
            delta_g: candidate.delta_g,
        }
    }

    /// Convenience serialisation; callers that need error handling on
    /// malformed floats (NaN/Inf are rejected by `serde_json`) can call
    /// `serde_json::to_string` directly instead.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::Genome;

    fn candidate() -> Candidate {
        Candidate {
            genome: Genome::new([-0.5, 0.5, 0.0, 0.0, -0.0916, -1.0]),
            fitness: 0.01,
            c_model: crate::constants::C_STAR,
            alpha_model: crate::constants::ALPHA_STAR,
            g_model: crate::constants::G_STAR,
            delta_c: 1e-9,
            delta_alpha: 1e-6,
            delta_g: 1e-5,
            generation: 42,
        }
    }

    #[test]
    fn export_round_trips_through_json() {
        let timestamp = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let export = Export::from_candidate(&candidate(), timestamp);
        let json = export.to_json_string().unwrap();
        assert!(json.contains("\"generation\":42"));
        assert!(json.contains("\"coeffs\""));

        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["generation"], 42);
        assert_eq!(parsed["coeffs"].as_array().unwrap().len(), 6);
    }
}
