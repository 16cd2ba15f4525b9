use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use super::descriptor::{ActionDescriptor, UpdateDescriptor, UpdateResult};
use crate::metrics::ObcMetrics;

/// Told about every completed pass. Implemented by the experiment controller.
pub trait IterationObserver: Send + Sync {
    fn notify_iteration_started(&self);
}

/// What happened during one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Update hooks that returned [`UpdateResult::Warning`].
    pub warnings: usize,
    /// Hooks that panicked.
    pub panics: usize,
    /// Actions whose condition held, in execution order.
    pub actions_run: Vec<&'static str>,
}

/// The periodic update/action engine.
pub struct MissionLoop<S> {
    updates: Vec<UpdateDescriptor<S>>,
    actions: Vec<ActionDescriptor<S>>,
    observer: Option<Arc<dyn IterationObserver>>,
    metrics: Option<Arc<ObcMetrics>>,
    control: Arc<LoopControl>,
    /// Held for the whole of a pass.
    pass: Mutex<()>,
}

impl<S> MissionLoop<S>
where
    S: Default + 'static,
{
    pub fn new(updates: Vec<UpdateDescriptor<S>>, actions: Vec<ActionDescriptor<S>>) -> Self {
        Self {
            updates,
            actions,
            observer: None,
            metrics: None,
            control: Arc::new(LoopControl::new()),
            pass: Mutex::new(()),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn IterationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ObcMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn control(&self) -> &Arc<LoopControl> {
        &self.control
    }

    /// Run one pass: all updates, then all selected actions, then notify the
    /// observer.
    ///
    /// A hook that panics is logged and skipped; the pass continues with the
    /// next hook. Passes are serialised: a call made while the mission thread
    /// is inside a pass blocks until that pass is over.
    pub fn run_once(&self) -> PassSummary {
        let _pass = self.pass.lock().unwrap_or_else(PoisonError::into_inner);
        let mut state = S::default();
        let mut summary = PassSummary::default();

        for descriptor in &self.updates {
            match catch_unwind(AssertUnwindSafe(|| descriptor.update(&mut state))) {
                Ok(UpdateResult::Ok) => {}
                Ok(UpdateResult::Warning) => {
                    warn!(
                        "Update '{}' failed, snapshot left at defaults",
                        descriptor.name()
                    );
                    summary.warnings += 1;
                }
                Err(_) => {
                    error!("Update '{}' panicked", descriptor.name());
                    summary.panics += 1;
                }
            }
        }

        for descriptor in &self.actions {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                if descriptor.condition(&state) {
                    trace!("Running action '{}'", descriptor.name());
                    descriptor.execute(&state);
                    true
                } else {
                    false
                }
            }));

            match outcome {
                Ok(true) => summary.actions_run.push(descriptor.name()),
                Ok(false) => {}
                Err(_) => {
                    error!("Action '{}' panicked", descriptor.name());
                    summary.panics += 1;
                }
            }
        }

        if let Some(observer) = &self.observer {
            observer.notify_iteration_started();
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_pass(&summary);
        }

        debug!(
            "Mission pass done: {} actions, {} warnings, {} panics",
            summary.actions_run.len(),
            summary.warnings,
            summary.panics
        );
        summary
    }

    /// Start the mission thread.
    pub fn spawn(self: &Arc<Self>, tick: Duration) -> io::Result<MissionLoopHandle>
    where
        S: Send,
    {
        let mission = self.clone();
        let control = self.control.clone();

        let thread = thread::Builder::new()
            .name("mission".to_string())
            .spawn(move || {
                info!("Mission loop started, tick {tick:?}");
                while mission.control.wait_for_pass() {
                    let started = Instant::now();
                    mission.run_once();
                    mission.control.pass_completed();
                    mission.control.sleep_until(started + tick);
                }
                info!("Mission loop stopped");
            })?;

        Ok(MissionLoopHandle {
            control,
            thread: Some(thread),
        })
    }
}

#[derive(Debug, Default)]
struct ControlFlags {
    suspended: bool,
    single_iteration: bool,
    shutdown: bool,
}

/// Suspend, single-step and shutdown requests for a running mission loop.
#[derive(Debug, Default)]
pub struct LoopControl {
    flags: Mutex<ControlFlags>,
    changed: Condvar,
    passes: AtomicU64,
}

impl LoopControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop running passes after the current one.
    pub fn suspend(&self) {
        self.flags().suspended = true;
        self.changed.notify_all();
        info!("Mission loop suspended");
    }

    pub fn resume(&self) {
        self.flags().suspended = false;
        self.changed.notify_all();
        info!("Mission loop resumed");
    }

    pub fn is_suspended(&self) -> bool {
        self.flags().suspended
    }

    /// Run one pass as soon as possible. While suspended, exactly one pass
    /// runs and the loop stays suspended; otherwise the pending tick sleep is
    /// cut short.
    pub fn request_single_iteration(&self) {
        self.flags().single_iteration = true;
        self.changed.notify_all();
    }

    pub fn shutdown(&self) {
        self.flags().shutdown = true;
        self.changed.notify_all();
    }

    /// Completed passes since start.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    /// Block until at least `count` passes completed. Returns `false` on
    /// timeout.
    pub fn wait_for_passes(&self, count: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flags = self.flags();
        loop {
            if self.passes() >= count {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            flags = self
                .changed
                .wait_timeout(flags, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Block until a pass may run. Returns `false` once shut down.
    fn wait_for_pass(&self) -> bool {
        let mut flags = self.flags();
        loop {
            if flags.shutdown {
                return false;
            }
            if flags.single_iteration {
                flags.single_iteration = false;
                return true;
            }
            if !flags.suspended {
                return true;
            }
            flags = self
                .changed
                .wait(flags)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn pass_completed(&self) {
        let _flags = self.flags();
        self.passes.fetch_add(1, Ordering::SeqCst);
        self.changed.notify_all();
    }

    /// Sleep the rest of the tick. Any control request ends the sleep early.
    fn sleep_until(&self, deadline: Instant) {
        let mut flags = self.flags();
        loop {
            if flags.shutdown || flags.single_iteration || flags.suspended {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            flags = self
                .changed
                .wait_timeout(flags, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn flags(&self) -> MutexGuard<'_, ControlFlags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Running mission thread. Dropping the handle shuts the loop down.
pub struct MissionLoopHandle {
    control: Arc<LoopControl>,
    thread: Option<JoinHandle<()>>,
}

impl MissionLoopHandle {
    pub fn control(&self) -> &Arc<LoopControl> {
        &self.control
    }

    pub fn suspend(&self) {
        self.control.suspend();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn request_single_iteration(&self) {
        self.control.request_single_iteration();
    }

    pub fn shutdown(&self) {
        self.control.shutdown();
    }

    /// Shut down and wait for the thread to exit.
    pub fn join(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.control.shutdown();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Mission thread panicked");
            }
        }
    }
}

impl Drop for MissionLoopHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mission::{Action, Update};
    use std::sync::atomic::AtomicUsize;

    type Log = Arc<Mutex<Vec<String>>>;

    #[derive(Debug, Default)]
    struct TestState {
        value: u32,
    }

    struct Recorder {
        name: &'static str,
        log: Log,
        result: UpdateResult,
        run: bool,
        panic: bool,
    }

    impl Recorder {
        fn new(name: &'static str, log: &Log) -> Self {
            Self {
                name,
                log: log.clone(),
                result: UpdateResult::Ok,
                run: true,
                panic: false,
            }
        }

        fn push(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }
    }

    impl Update<TestState> for Recorder {
        fn update(&self, state: &mut TestState) -> UpdateResult {
            self.push(format!("update:{}", self.name));
            if self.panic {
                panic!("update {} exploded", self.name);
            }
            state.value += 1;
            self.result
        }
    }

    impl Action<TestState> for Recorder {
        fn condition(&self, _state: &TestState) -> bool {
            self.run
        }

        fn execute(&self, state: &TestState) {
            self.push(format!("action:{}:{}", self.name, state.value));
            if self.panic {
                panic!("action {} exploded", self.name);
            }
        }
    }

    fn update(recorder: Recorder) -> UpdateDescriptor<TestState> {
        UpdateDescriptor::new(recorder.name, Arc::new(recorder))
    }

    fn action(recorder: Recorder) -> ActionDescriptor<TestState> {
        ActionDescriptor::new(recorder.name, Arc::new(recorder))
    }

    #[derive(Default)]
    struct CountingObserver {
        notified: AtomicUsize,
    }

    impl IterationObserver for CountingObserver {
        fn notify_iteration_started(&self) {
            self.notified.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_updates_run_before_actions_in_order() {
        let log = Log::default();
        let mission = MissionLoop::new(
            vec![update(Recorder::new("u1", &log)), update(Recorder::new("u2", &log))],
            vec![action(Recorder::new("a1", &log)), action(Recorder::new("a2", &log))],
        );

        let summary = mission.run_once();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["update:u1", "update:u2", "action:a1:2", "action:a2:2"]
        );
        assert_eq!(summary.actions_run, vec!["a1", "a2"]);
        assert_eq!(summary.warnings, 0);
    }

    #[test]
    fn test_snapshot_is_fresh_every_pass() {
        let log = Log::default();
        let mission = MissionLoop::new(
            vec![update(Recorder::new("u", &log))],
            vec![action(Recorder::new("a", &log))],
        );

        mission.run_once();
        mission.run_once();

        let log = log.lock().unwrap();
        assert_eq!(log[1], "action:a:1");
        assert_eq!(log[3], "action:a:1");
    }

    #[test]
    fn test_condition_gates_action() {
        let log = Log::default();
        let mut skipped = Recorder::new("skipped", &log);
        skipped.run = false;
        let mission = MissionLoop::new(
            vec![],
            vec![action(skipped), action(Recorder::new("a", &log))],
        );

        let summary = mission.run_once();
        assert_eq!(summary.actions_run, vec!["a"]);
        assert_eq!(*log.lock().unwrap(), vec!["action:a:0"]);
    }

    #[test]
    fn test_warnings_are_counted() {
        let log = Log::default();
        let mut failing = Recorder::new("failing", &log);
        failing.result = UpdateResult::Warning;
        let mission = MissionLoop::new(
            vec![update(failing), update(Recorder::new("ok", &log))],
            vec![],
        );

        assert_eq!(mission.run_once().warnings, 1);
    }

    #[test]
    fn test_panicking_hooks_do_not_stop_the_pass() {
        let log = Log::default();
        let mut bad_update = Recorder::new("bad_update", &log);
        bad_update.panic = true;
        let mut bad_action = Recorder::new("bad_action", &log);
        bad_action.panic = true;

        let observer = Arc::new(CountingObserver::default());
        let mission = MissionLoop::new(
            vec![update(bad_update), update(Recorder::new("u", &log))],
            vec![action(bad_action), action(Recorder::new("a", &log))],
        )
        .with_observer(observer.clone());

        let summary = mission.run_once();

        assert_eq!(summary.panics, 2);
        assert_eq!(summary.actions_run, vec!["a"]);
        assert_eq!(log.lock().unwrap().last().unwrap(), "action:a:1");
        assert_eq!(observer.notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_observer_notified_after_actions() {
        let observer = Arc::new(CountingObserver::default());
        let mission = MissionLoop::<TestState>::new(vec![], vec![]).with_observer(observer.clone());

        mission.run_once();
        mission.run_once();
        assert_eq!(observer.notified.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_spawned_loop_runs_until_shutdown() {
        let log = Log::default();
        let mission = Arc::new(MissionLoop::new(vec![update(Recorder::new("u", &log))], vec![]));
        let handle = mission.spawn(Duration::from_millis(5)).unwrap();

        assert!(handle.control().wait_for_passes(3, Duration::from_secs(5)));
        handle.join();

        let passes = mission.control().passes();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(mission.control().passes(), passes);
    }

    #[test]
    fn test_suspend_and_single_iteration() {
        let log = Log::default();
        let mission = Arc::new(MissionLoop::new(vec![update(Recorder::new("u", &log))], vec![]));
        mission.control().suspend();
        let handle = mission.spawn(Duration::from_millis(5)).unwrap();

        thread::sleep(Duration::from_millis(30));
        assert_eq!(handle.control().passes(), 0);

        handle.request_single_iteration();
        assert!(handle.control().wait_for_passes(1, Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(handle.control().passes(), 1);
        assert!(handle.control().is_suspended());

        handle.resume();
        assert!(handle.control().wait_for_passes(3, Duration::from_secs(5)));
    }

    #[derive(Default)]
    struct Overlap {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Action<TestState> for Overlap {
        fn condition(&self, _state: &TestState) -> bool {
            true
        }

        fn execute(&self, _state: &TestState) {
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            self.running.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_direct_pass_waits_for_mission_thread() {
        let overlap = Arc::new(Overlap::default());
        let mission = Arc::new(MissionLoop::new(
            vec![],
            vec![ActionDescriptor::new("overlap", overlap.clone())],
        ));
        let handle = mission.spawn(Duration::from_millis(1)).unwrap();
        assert!(handle.control().wait_for_passes(1, Duration::from_secs(5)));

        for _ in 0..10 {
            mission.run_once();
        }
        handle.join();

        assert_eq!(overlap.peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_single_iteration_cuts_tick_short() {
        let mission = Arc::new(MissionLoop::<TestState>::new(vec![], vec![]));
        let handle = mission.spawn(Duration::from_secs(3600)).unwrap();

        assert!(handle.control().wait_for_passes(1, Duration::from_secs(5)));
        handle.request_single_iteration();
        assert!(handle.control().wait_for_passes(2, Duration::from_secs(5)));
    }
}
