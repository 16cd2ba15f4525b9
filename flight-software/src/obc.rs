//! Composition root.
//!
//! [`Obc`] owns every subsystem, wires the descriptors into the mission loop
//! in their fixed order and exposes the operator commands.

use std::io;
use std::sync::{Arc, Mutex, TryLockError};
use std::thread::JoinHandle;
use std::time::Duration;

use hardware::antenna::{AntennaDriver, MiniportAntennaDriver};
use hardware::fram::{Fram, RedundantFram, FRAM_COPIES};
use hardware::i2c::I2cBus;
use hardware::power::PowerControl;
use hardware::rtc::Rtc;
use hardware::{Device, ErrorPolicy};
use shared::fs::FileSystem;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::adcs::{AdcsCoordinator, AdcsTask};
use crate::antenna::{AntennaMissionState, AntennaTask};
use crate::config::MissionConfig;
use crate::experiments::{
    ExperimentCode, ExperimentController, ExperimentInfo, ExperimentSlot, FiboExperiment,
};
use crate::fdir::Fdir;
use crate::metrics::ObcMetrics;
use crate::mission::{LoopControl, MissionLoop, MissionLoopHandle, PassSummary};
use crate::persistent::{
    register_boot, FramPersistentSettings, PersistentSettings, PersistentState,
    PersistentStateTask,
};
use crate::sail::SailTask;
use crate::state::SystemState;
use crate::telemetry::TelemetryTask;
use crate::time::{CurrentTime, TimePoint, TimeProvider, TimeTask};

#[derive(Error, Debug)]
pub enum ObcError {
    #[error("metrics registry: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("unable to start thread: {0}")]
    Thread(#[from] io::Error),
}

pub type ObcResult<T> = Result<T, ObcError>;

/// How the antenna controllers are reached.
pub enum AntennaHardware {
    /// Controllers on an I2C bus, driven through the miniport protocol.
    Bus(Arc<dyn I2cBus>),
    /// A ready driver.
    Driver(Arc<dyn AntennaDriver>),
}

/// Peripherals the mission executive runs on.
pub struct ObcHardware {
    pub fs: Arc<dyn FileSystem>,
    pub power: Arc<dyn PowerControl>,
    pub antenna: AntennaHardware,
    pub fram: [Arc<dyn Fram>; FRAM_COPIES],
    pub rtc: Arc<dyn Rtc>,
    pub adcs: Arc<dyn AdcsCoordinator>,
}

pub struct Obc {
    boot_index: u32,
    fdir: Arc<Fdir>,
    time: Arc<TimeProvider>,
    settings: Arc<FramPersistentSettings>,
    experiments: Arc<ExperimentController>,
    fibo: Arc<Mutex<FiboExperiment>>,
    antenna: Arc<AntennaTask>,
    sail: Arc<SailTask>,
    mission: Arc<MissionLoop<SystemState>>,
    metrics: Arc<ObcMetrics>,
    tick_period: Duration,
}

impl Obc {
    /// Boot: load persistent settings, recover mission time and build every
    /// task. Nothing runs until [`start`](Self::start).
    pub fn new(hardware: ObcHardware, config: MissionConfig) -> ObcResult<Self> {
        let metrics = Arc::new(ObcMetrics::new()?);
        let fdir = Arc::new(Fdir::new(hardware.power.clone()));

        let fram = RedundantFram::new(hardware.fram, fdir.counting().clone());
        let settings = Arc::new(FramPersistentSettings::load(fram));
        let boot_index = register_boot(settings.as_ref());
        fdir.load_config(&settings.get().fdir_config);

        let time = Arc::new(TimeProvider::new(hardware.fs.clone(), &config));
        {
            let metrics = metrics.clone();
            let fdir = fdir.clone();
            time.set_time_passed_callback(Box::new(move |point: TimePoint| {
                metrics.set_mission_time(point.to_duration());
                metrics.observe_fdir(&fdir.values());
            }));
        }

        let antenna_driver: Arc<dyn AntennaDriver> = match hardware.antenna {
            AntennaHardware::Bus(bus) => {
                Arc::new(MiniportAntennaDriver::new(bus, fdir.counting().clone()))
            }
            AntennaHardware::Driver(driver) => driver,
        };

        let time_task = Arc::new(TimeTask::new(time.clone(), hardware.rtc, &config));
        let persistent_task = PersistentStateTask::new(settings.clone());
        let antenna = Arc::new(
            AntennaTask::new(antenna_driver, &config).with_settings(settings.clone()),
        );
        let sail = Arc::new(SailTask::new(hardware.power, settings.clone(), &config));
        let adcs = AdcsTask::new(hardware.adcs);
        let telemetry = Arc::new(TelemetryTask::new(
            hardware.fs.clone(),
            fdir.counting().clone(),
            &config,
        ));

        let experiments = Arc::new(ExperimentController::new().with_metrics(metrics.clone()));
        let fibo = Arc::new(Mutex::new(FiboExperiment::new(
            hardware.fs,
            config.fibo_iterations,
        )));
        let fibo_slot: ExperimentSlot = fibo.clone();
        experiments.set_experiments(vec![fibo_slot]);

        let updates = vec![
            time_task.build_update(),
            persistent_task.build_update(),
            antenna.build_update(),
            sail.build_update(),
            adcs.build_update(),
        ];
        let actions = vec![
            time_task.build_action(),
            antenna.build_action(),
            sail.build_action(),
            experiments.build_start_action(),
            experiments.build_kick_action(),
            telemetry.build_action(),
        ];
        let mission = Arc::new(
            MissionLoop::new(updates, actions)
                .with_observer(experiments.clone())
                .with_metrics(metrics.clone()),
        );

        info!("OBC initialised, boot #{boot_index}");
        Ok(Self {
            boot_index,
            fdir,
            time,
            settings,
            experiments,
            fibo,
            antenna,
            sail,
            mission,
            metrics,
            tick_period: config.tick_period,
        })
    }

    /// Start the experiment and mission threads.
    pub fn start(&self) -> ObcResult<ObcHandle> {
        let experiment_thread = self.experiments.spawn()?;
        let mission = match self.mission.spawn(self.tick_period) {
            Ok(mission) => mission,
            Err(e) => {
                self.experiments.shutdown();
                if experiment_thread.join().is_err() {
                    error!("Experiment thread panicked");
                }
                return Err(e.into());
            }
        };

        Ok(ObcHandle {
            mission: Some(mission),
            experiments: self.experiments.clone(),
            experiment_thread: Some(experiment_thread),
        })
    }

    pub fn boot_index(&self) -> u32 {
        self.boot_index
    }

    pub fn fdir(&self) -> &Arc<Fdir> {
        &self.fdir
    }

    pub fn time(&self) -> &Arc<TimeProvider> {
        &self.time
    }

    pub fn metrics(&self) -> &Arc<ObcMetrics> {
        &self.metrics
    }

    pub fn mission_control(&self) -> &Arc<LoopControl> {
        self.mission.control()
    }

    /// Run one pass on the calling thread. Waits while the mission thread is
    /// inside a pass.
    pub fn run_once(&self) -> PassSummary {
        self.mission.run_once()
    }

    pub fn suspend_mission(&self) {
        self.mission.control().suspend();
    }

    pub fn resume_mission(&self) {
        self.mission.control().resume();
    }

    /// Let a running mission thread perform one pass.
    pub fn request_single_iteration(&self) {
        self.mission.control().request_single_iteration();
    }

    pub fn current_time(&self) -> Option<Duration> {
        self.time.get_current_time()
    }

    pub fn set_time(&self, time: TimePoint) -> bool {
        self.time.set_current_time(time)
    }

    pub fn advance_time(&self, delta: Duration) {
        self.time.advance_time(delta);
    }

    pub fn request_experiment(&self, code: ExperimentCode) -> bool {
        self.experiments.request_experiment(code)
    }

    pub fn abort_experiment(&self) {
        self.experiments.abort_experiment();
    }

    pub fn experiment_info(&self) -> ExperimentInfo {
        self.experiments.current_state()
    }

    /// Set the number of terms the Fibonacci experiment computes. Refused
    /// while it is running.
    pub fn set_fibo_iterations(&self, iterations: u32) -> bool {
        let mut fibo = match self.fibo.try_lock() {
            Ok(fibo) => fibo,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                warn!("Fibonacci experiment running, iteration count unchanged");
                return false;
            }
        };
        fibo.set_iterations(iterations);
        true
    }

    pub fn antenna_state(&self) -> AntennaMissionState {
        self.antenna.mission_state()
    }

    pub fn set_antenna_override(&self, enable: bool) {
        self.antenna.set_override(enable);
    }

    pub fn restart_antenna_deployment(&self) {
        self.antenna.restart();
    }

    pub fn open_sail(&self) {
        self.sail.open_sail();
    }

    pub fn persistent_state(&self) -> PersistentState {
        self.settings.get()
    }

    /// Change the FDIR policy of one device and persist it.
    pub fn set_fdir_policy(&self, device: Device, policy: ErrorPolicy) {
        self.fdir
            .set(device, policy.limit, policy.increment, policy.decrement);
        let result = self.settings.modify(&mut |state: &mut PersistentState| {
            state.fdir_config[device.index()] = policy;
        });
        if let Err(e) = result {
            warn!("FDIR policy for {} not persisted: {e}", device.name());
        }
    }

    pub fn set_fdir_mask(&self, bitmap: u16) {
        self.fdir.mask(bitmap);
    }
}

/// Running OBC threads. Dropping the handle stops them.
pub struct ObcHandle {
    mission: Option<MissionLoopHandle>,
    experiments: Arc<ExperimentController>,
    experiment_thread: Option<JoinHandle<()>>,
}

impl ObcHandle {
    /// Stop the mission loop, then the experiment thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(mission) = self.mission.take() {
            mission.join();
        }
        self.experiments.shutdown();
        if let Some(thread) = self.experiment_thread.take() {
            if thread.join().is_err() {
                error!("Experiment thread panicked");
            }
        }
    }
}

impl Drop for ObcHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
