use std::sync::Arc;

use shared::fs::FileSystem;
use tracing::{info, warn};

use super::{Experiment, ExperimentCode, IterationResult, StartResult};

/// Where the computed sequence is written, one little-endian `u64` per term.
pub const FIBO_RESULT_FILE: &str = "/fibo.dat";

/// Example experiment: one Fibonacci term per mission pass.
pub struct FiboExperiment {
    fs: Arc<dyn FileSystem>,
    iterations: u32,
    computed: u32,
    terms: (u64, u64),
}

impl FiboExperiment {
    pub const CODE: ExperimentCode = 1;

    pub fn new(fs: Arc<dyn FileSystem>, iterations: u32) -> Self {
        Self {
            fs,
            iterations,
            computed: 0,
            terms: (0, 1),
        }
    }

    /// Number of terms computed by the next run.
    pub fn set_iterations(&mut self, iterations: u32) {
        self.iterations = iterations;
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}

impl Experiment for FiboExperiment {
    fn code(&self) -> ExperimentCode {
        Self::CODE
    }

    fn start(&mut self) -> StartResult {
        if let Err(e) = self.fs.write(FIBO_RESULT_FILE, &[]) {
            warn!("Unable to create {FIBO_RESULT_FILE}: {e}");
            return StartResult::Failure;
        }

        self.computed = 0;
        self.terms = (0, 1);
        info!("Fibonacci experiment started, {} terms", self.iterations);
        StartResult::Success
    }

    fn iteration(&mut self) -> IterationResult {
        if self.computed >= self.iterations {
            return IterationResult::Finished;
        }

        let (current, next) = self.terms;
        if let Err(e) = self.fs.append(FIBO_RESULT_FILE, &current.to_le_bytes()) {
            warn!("Unable to save Fibonacci term {}: {e}", self.computed);
            return IterationResult::Failure;
        }

        self.terms = (next, current.saturating_add(next));
        self.computed += 1;

        if self.computed >= self.iterations {
            IterationResult::Finished
        } else {
            IterationResult::WaitForNextCycle
        }
    }

    fn stop(&mut self, result: IterationResult) {
        info!(
            "Fibonacci experiment stopped after {} terms: {result:?}",
            self.computed
        );
    }
}
