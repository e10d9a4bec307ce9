//! FRI parameter derivation for the external STARK prover.
//!
//! The prover only accepts parameter files whose FRI schedule satisfies
//!
//! ```text
//! log2(last_layer_degree_bound) + sum(fri_step_list) == log2(trace_steps) + 4
//! ```
//!
//! where the `+ 4` is the degree margin of the CPU AIR composition
//! polynomial. Everything here is pure arithmetic so the same trace length
//! always yields the same schedule.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Smallest trace the prover accepts.
pub const MIN_TRACE_STEPS: u64 = 512;

/// Largest single FRI folding step the prover supports.
pub const MAX_FRI_STEP: u32 = 4;

/// Degree bound of the last FRI layer. Fixed for the CPU AIR.
pub const LAST_LAYER_DEGREE_BOUND: u64 = 64;

/// Degree margin of the composition polynomial, in bits.
const DEGREE_MARGIN: u32 = 4;

const N_QUERIES: u32 = 18;
const PROOF_OF_WORK_BITS: u32 = 24;
const LOG_N_COSETS: u32 = 4;
const FIELD_NAME: &str = "PrimeField0";

/// A FRI folding schedule for one trace length.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriParameters {
    pub fri_step_list: Vec<u32>,
    pub last_layer_degree_bound: u64,
}

impl FriParameters {
    /// Derives the schedule for `trace_steps`.
    ///
    /// The first step is always 0 (no folding before the first commitment),
    /// followed by as many maximal steps as fit and one remainder step.
    pub fn for_trace(trace_steps: u64) -> Result<Self, PipelineError> {
        if !trace_steps.is_power_of_two() || trace_steps < MIN_TRACE_STEPS {
            return Err(PipelineError::InvalidTraceSize(trace_steps));
        }

        let target = trace_steps.ilog2() + DEGREE_MARGIN;
        let mut remaining = target - LAST_LAYER_DEGREE_BOUND.ilog2();
        let mut fri_step_list = vec![0];
        while remaining >= MAX_FRI_STEP {
            fri_step_list.push(MAX_FRI_STEP);
            remaining -= MAX_FRI_STEP;
        }
        if remaining > 0 {
            fri_step_list.push(remaining);
        }

        Ok(Self {
            fri_step_list,
            last_layer_degree_bound: LAST_LAYER_DEGREE_BOUND,
        })
    }

    pub fn step_sum(&self) -> u32 {
        self.fri_step_list.iter().sum()
    }

    /// Whether this schedule proves a trace of exactly `trace_steps` steps.
    pub fn covers_trace(&self, trace_steps: u64) -> bool {
        if !trace_steps.is_power_of_two() || trace_steps < MIN_TRACE_STEPS {
            return false;
        }
        if !self.last_layer_degree_bound.is_power_of_two() {
            return false;
        }
        self.last_layer_degree_bound.ilog2() + self.step_sum()
            == trace_steps.ilog2() + DEGREE_MARGIN
    }
}

/// The parameter file handed to the prover binary, in its expected JSON
/// shape. Only the FRI section varies per run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProverParameters {
    pub field: String,
    pub stark: StarkParameters,
    pub use_extension_field: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StarkParameters {
    pub fri: FriSection,
    pub log_n_cosets: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FriSection {
    pub fri_step_list: Vec<u32>,
    pub last_layer_degree_bound: u64,
    pub n_queries: u32,
    pub proof_of_work_bits: u32,
}

impl ProverParameters {
    pub fn for_fri(fri: &FriParameters) -> Self {
        Self {
            field: FIELD_NAME.to_owned(),
            stark: StarkParameters {
                fri: FriSection {
                    fri_step_list: fri.fri_step_list.clone(),
                    last_layer_degree_bound: fri.last_layer_degree_bound,
                    n_queries: N_QUERIES,
                    proof_of_work_bits: PROOF_OF_WORK_BITS,
                },
                log_n_cosets: LOG_N_COSETS,
            },
            use_extension_field: false,
        }
    }
}
