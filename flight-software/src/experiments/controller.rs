use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use bitflags::bitflags;
use shared::sync::{EventGroup, Mailbox, WaitMode};
use tracing::{debug, info, warn};

use super::{Experiment, ExperimentCode, IterationResult, StartResult};
use crate::metrics::ObcMetrics;
use crate::mission::{Action, ActionDescriptor, IterationObserver};
use crate::state::SystemState;

/// A registered experiment.
pub type ExperimentSlot = Arc<Mutex<dyn Experiment>>;

bitflags! {
    /// Coordination bits between the mission loop and the experiment thread.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExperimentEvents: u32 {
        const IN_PROGRESS = 1 << 0;
        const ABORT_REQUEST = 1 << 1;
        const MISSION_LOOP_ITERATION_STARTED = 1 << 2;
        /// Sticky; never cleared once set.
        const SHUTDOWN = 1 << 3;
    }
}

/// Observable controller state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExperimentInfo {
    pub requested: Option<ExperimentCode>,
    pub current: Option<ExperimentCode>,
    pub last_start_result: Option<StartResult>,
    pub last_iteration_result: Option<IterationResult>,
    /// Completed experiment runs.
    pub iteration_counter: u32,
}

/// Hosts at most one running experiment.
pub struct ExperimentController {
    experiments: Mutex<Vec<ExperimentSlot>>,
    requested: Mutex<Option<ExperimentCode>>,
    queue: Mailbox<ExperimentCode>,
    events: EventGroup<ExperimentEvents>,
    /// Set by the start action until the pass that dequeued the request ends.
    pending_start: AtomicBool,
    /// Set by the kick action until the end of the pass.
    kicked: AtomicBool,
    info: Mutex<ExperimentInfo>,
    metrics: Option<Arc<ObcMetrics>>,
}

impl Default for ExperimentController {
    fn default() -> Self {
        Self::new()
    }
}

impl ExperimentController {
    pub fn new() -> Self {
        Self {
            experiments: Mutex::new(Vec::new()),
            requested: Mutex::new(None),
            queue: Mailbox::new(),
            events: EventGroup::new(),
            pending_start: AtomicBool::new(false),
            kicked: AtomicBool::new(false),
            info: Mutex::new(ExperimentInfo::default()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ObcMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Replace the table of registered experiments.
    pub fn set_experiments(&self, experiments: Vec<ExperimentSlot>) {
        *lock(&self.experiments) = experiments;
    }

    /// Ask for `code` to be started on the next mission pass.
    ///
    /// Returns `false` and drops the request while an experiment is running.
    pub fn request_experiment(&self, code: ExperimentCode) -> bool {
        if self.is_in_progress() {
            debug!("Experiment {code} requested while another is running, ignored");
            return false;
        }

        *lock(&self.requested) = Some(code);
        info!("Experiment {code} requested");
        true
    }

    /// Terminate the running experiment at its next iteration boundary.
    pub fn abort_experiment(&self) {
        info!("Experiment abort requested");
        self.events.set(ExperimentEvents::ABORT_REQUEST);
    }

    pub fn is_in_progress(&self) -> bool {
        self.events.get().contains(ExperimentEvents::IN_PROGRESS)
    }

    pub fn events(&self) -> &EventGroup<ExperimentEvents> {
        &self.events
    }

    pub fn current_state(&self) -> ExperimentInfo {
        let requested = *lock(&self.requested);
        ExperimentInfo {
            requested,
            ..*lock(&self.info)
        }
    }

    pub fn build_start_action(self: &Arc<Self>) -> ActionDescriptor<SystemState> {
        ActionDescriptor::new("StartExp", Arc::new(StartExperiment(self.clone())))
    }

    pub fn build_kick_action(self: &Arc<Self>) -> ActionDescriptor<SystemState> {
        ActionDescriptor::new("KickExp", Arc::new(KickExperiment(self.clone())))
    }

    /// Start the experiment thread.
    pub fn spawn(self: &Arc<Self>) -> io::Result<JoinHandle<()>> {
        let controller = self.clone();
        thread::Builder::new()
            .name("experiment".to_string())
            .spawn(move || controller.run())
    }

    /// Stop the experiment thread. A running experiment is aborted and a
    /// request not yet started is dropped.
    pub fn shutdown(&self) {
        self.events.set(ExperimentEvents::SHUTDOWN);
        self.queue.close();
    }

    fn is_shut_down(&self) -> bool {
        self.events.get().contains(ExperimentEvents::SHUTDOWN)
    }

    /// Experiment thread body. Returns once shut down.
    pub fn run(&self) {
        info!("Experiment controller started");
        while let Some(code) = self.queue.pop(None) {
            if self.is_shut_down() {
                info!("Experiment {code} dropped, controller shutting down");
                break;
            }
            self.run_experiment(code);
        }
        info!("Experiment controller stopped");
    }

    fn find(&self, code: ExperimentCode) -> Option<ExperimentSlot> {
        lock(&self.experiments)
            .iter()
            .find(|experiment| {
                experiment
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .code()
                    == code
            })
            .cloned()
    }

    fn run_experiment(&self, code: ExperimentCode) {
        let Some(slot) = self.find(code) else {
            warn!("Experiment {code} is not registered");
            return;
        };
        let mut experiment = slot.lock().unwrap_or_else(PoisonError::into_inner);

        self.events.clear(
            ExperimentEvents::ABORT_REQUEST | ExperimentEvents::MISSION_LOOP_ITERATION_STARTED,
        );
        self.events.set(ExperimentEvents::IN_PROGRESS);
        {
            let mut info = lock(&self.info);
            info.current = Some(code);
            info.last_start_result = None;
            info.last_iteration_result = None;
        }

        info!("Starting experiment {code}");
        let start = experiment.start();
        lock(&self.info).last_start_result = Some(start);
        if start != StartResult::Success {
            warn!("Experiment {code} failed to start");
            self.finish(None);
            return;
        }

        let result = loop {
            let events = self.events.get();
            if events.intersects(ExperimentEvents::ABORT_REQUEST | ExperimentEvents::SHUTDOWN) {
                self.events.clear(ExperimentEvents::ABORT_REQUEST);
                break IterationResult::Abort;
            }

            let result = experiment.iteration();
            lock(&self.info).last_iteration_result = Some(result);

            match result {
                IterationResult::LoopImmediately => {}
                IterationResult::WaitForNextCycle => {
                    self.events.wait(
                        ExperimentEvents::MISSION_LOOP_ITERATION_STARTED
                            | ExperimentEvents::ABORT_REQUEST
                            | ExperimentEvents::SHUTDOWN,
                        WaitMode::Any,
                        false,
                        None,
                    );
                    self.events.clear(ExperimentEvents::MISSION_LOOP_ITERATION_STARTED);
                }
                IterationResult::Finished | IterationResult::Failure | IterationResult::Abort => {
                    break result;
                }
            }
        };

        info!("Stopping experiment {code}: {result:?}");
        experiment.stop(result);
        self.finish(Some(result));
    }

    fn finish(&self, result: Option<IterationResult>) {
        {
            let mut info = lock(&self.info);
            info.current = None;
            if let Some(result) = result {
                info.last_iteration_result = Some(result);
                info.iteration_counter += 1;
            }
        }
        self.events.clear(ExperimentEvents::IN_PROGRESS);

        if let (Some(metrics), Some(result)) = (&self.metrics, result) {
            metrics.record_experiment(result);
        }
    }
}

impl IterationObserver for ExperimentController {
    /// Wake a waiting experiment, unless this pass dequeued it or already
    /// kicked it.
    fn notify_iteration_started(&self) {
        let kicked = self.kicked.swap(false, Ordering::SeqCst);
        let pending = self.pending_start.swap(false, Ordering::SeqCst);
        if !kicked && !pending && self.is_in_progress() {
            self.events.set(ExperimentEvents::MISSION_LOOP_ITERATION_STARTED);
        }
    }
}

/// Hands a pending request to the experiment thread.
pub struct StartExperiment(Arc<ExperimentController>);

impl Action<SystemState> for StartExperiment {
    fn condition(&self, _state: &SystemState) -> bool {
        lock(&self.0.requested).is_some() && !self.0.is_in_progress()
    }

    fn execute(&self, _state: &SystemState) {
        if let Some(code) = lock(&self.0.requested).take() {
            self.0.pending_start.store(true, Ordering::SeqCst);
            self.0.queue.overwrite(code);
        }
    }
}

/// Releases a `WaitForNextCycle` experiment.
pub struct KickExperiment(Arc<ExperimentController>);

impl Action<SystemState> for KickExperiment {
    fn condition(&self, _state: &SystemState) -> bool {
        self.0.is_in_progress() && !self.0.pending_start.load(Ordering::SeqCst)
    }

    fn execute(&self, _state: &SystemState) {
        self.0.kicked.store(true, Ordering::SeqCst);
        self.0.events.set(ExperimentEvents::MISSION_LOOP_ITERATION_STARTED);
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
