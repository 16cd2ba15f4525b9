//! Long-running experiments.
//!
//! An experiment runs on its own thread, one at a time, and may span many
//! mission passes. The mission loop starts it through the `StartExp` action
//! and paces it through the `KickExp` action.

mod controller;
mod fibo;

pub use controller::{
    ExperimentController, ExperimentEvents, ExperimentInfo, ExperimentSlot, KickExperiment,
    StartExperiment,
};
pub use fibo::{FiboExperiment, FIBO_RESULT_FILE};

/// Operator-visible experiment identifier.
pub type ExperimentCode = u8;

/// Outcome of [`Experiment::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartResult {
    Success,
    Failure,
}

/// Outcome of one [`Experiment::iteration`], also passed to
/// [`Experiment::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationResult {
    /// Nothing more to do.
    Finished,
    /// Run the next iteration right away.
    LoopImmediately,
    /// Run the next iteration after the next mission pass.
    WaitForNextCycle,
    /// The experiment cannot continue.
    Failure,
    /// Terminated by an operator abort.
    Abort,
}

/// An experiment hosted by the [`ExperimentController`].
pub trait Experiment: Send {
    fn code(&self) -> ExperimentCode;

    fn start(&mut self) -> StartResult;

    fn iteration(&mut self) -> IterationResult;

    /// Called once after the iteration loop ended, with its final result.
    fn stop(&mut self, result: IterationResult);
}
