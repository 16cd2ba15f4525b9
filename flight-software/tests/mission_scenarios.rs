//! End-to-end scenarios over a fully wired OBC on mock hardware.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use flight_software::adcs::{AdcsMode, CommandedAdcs};
use flight_software::experiments::{FiboExperiment, IterationResult, FIBO_RESULT_FILE};
use flight_software::time::{CurrentTime, TimeProvider, TIME_FILES};
use flight_software::{AntennaHardware, MissionConfig, Obc, ObcHardware};
use hardware::antenna::{AntennaChannel, AntennaDeploymentStatus, AntennaId};
use hardware::fram::Fram;
use hardware::i2c::I2cError;
use hardware::mock::{
    AntennaCall, MemoryFram, MockAntennaDriver, MockI2cBus, MockPowerControl, MockRtc,
};
use hardware::{Device, DeviceError, ErrorPolicy};
use shared::fs::{FileSystem, MemoryFileSystem};

const AFTER_ANTENNA_THRESHOLD: Duration = Duration::from_secs(41 * 60);
const WAIT: Duration = Duration::from_secs(5);

struct Rig {
    fs: Arc<MemoryFileSystem>,
    power: Arc<MockPowerControl>,
    fram: [Arc<dyn Fram>; 3],
}

impl Rig {
    fn new() -> Self {
        Self {
            fs: Arc::new(MemoryFileSystem::new()),
            power: Arc::new(MockPowerControl::new()),
            fram: [0, 1, 2].map(|_| Arc::new(MemoryFram::new(1024)) as Arc<dyn Fram>),
        }
    }

    fn boot(&self, antenna: AntennaHardware, config: MissionConfig) -> Obc {
        let hardware = ObcHardware {
            fs: self.fs.clone(),
            power: self.power.clone(),
            antenna,
            fram: self.fram.clone(),
            rtc: Arc::new(MockRtc::new(Duration::ZERO)),
            adcs: Arc::new(CommandedAdcs::new(AdcsMode::Detumbling)),
        };
        Obc::new(hardware, config).unwrap()
    }

    fn boot_with_driver(&self) -> (Obc, Arc<MockAntennaDriver>) {
        let driver = Arc::new(MockAntennaDriver::new());
        let obc = self.boot(
            AntennaHardware::Driver(driver.clone()),
            MissionConfig::default(),
        );
        (obc, driver)
    }
}

fn fast_config() -> MissionConfig {
    MissionConfig {
        tick_period: Duration::from_millis(10),
        ..Default::default()
    }
}

fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}

fn deployed(antennas: [bool; 4]) -> AntennaDeploymentStatus {
    AntennaDeploymentStatus {
        deployment_status: antennas,
        ..Default::default()
    }
}

#[test]
fn test_antenna_deployment_stops_once_deployed() {
    let rig = Rig::new();
    let (obc, driver) = rig.boot_with_driver();

    obc.run_once();
    assert!(driver.commands().is_empty());

    obc.advance_time(AFTER_ANTENNA_THRESHOLD);
    for _ in 0..3 {
        obc.run_once();
    }
    driver.set_status(AntennaChannel::Primary, deployed([true; 4]));
    for _ in 0..5 {
        obc.run_once();
    }

    assert_eq!(
        driver.commands(),
        vec![
            AntennaCall::Reset(AntennaChannel::Primary),
            AntennaCall::Arm(AntennaChannel::Primary),
            AntennaCall::StartAuto {
                channel: AntennaChannel::Primary,
                timeout: Duration::from_secs(36),
            },
        ]
    );
    assert_eq!(obc.antenna_state().deployment_state, [true; 4]);
    assert_eq!(obc.persistent_state().antenna_deployment_mask, 0x0f);
}

#[test]
fn test_antenna_falls_back_to_backup_channel() {
    let rig = Rig::new();
    let (obc, driver) = rig.boot_with_driver();
    driver.fail_commands(AntennaChannel::Primary, Some(DeviceError::Io));

    obc.advance_time(AFTER_ANTENNA_THRESHOLD);
    for _ in 0..9 {
        obc.run_once();
    }

    let commands = driver.commands();
    assert_eq!(commands.len(), 9);
    assert_eq!(commands[8], AntennaCall::Reset(AntennaChannel::Backup));
    assert_eq!(
        commands[3],
        AntennaCall::Deploy {
            channel: AntennaChannel::Primary,
            antenna: AntennaId::Antenna1,
            timeout: Duration::from_secs(9),
            override_switches: true,
        }
    );
}

#[test]
fn test_antenna_waits_while_burning() {
    let rig = Rig::new();
    let (obc, driver) = rig.boot_with_driver();
    driver.set_status(
        AntennaChannel::Primary,
        AntennaDeploymentStatus {
            is_deployment_active: [true, false, false, false],
            ..Default::default()
        },
    );

    obc.advance_time(AFTER_ANTENNA_THRESHOLD);
    for _ in 0..4 {
        obc.run_once();
    }
    assert!(driver.commands().is_empty());
    assert!(obc.antenna_state().deployment_in_progress);

    driver.set_status(AntennaChannel::Primary, deployed([true, false, false, false]));
    obc.run_once();
    assert_eq!(
        driver.commands(),
        vec![AntennaCall::Reset(AntennaChannel::Primary)]
    );
}

#[test]
fn test_antenna_override_reruns_plan() {
    let rig = Rig::new();
    let (obc, driver) = rig.boot_with_driver();
    driver.set_status(AntennaChannel::Primary, deployed([true; 4]));

    obc.advance_time(AFTER_ANTENNA_THRESHOLD);
    obc.run_once();
    assert!(driver.commands().is_empty());

    obc.set_antenna_override(true);
    obc.run_once();
    assert_eq!(
        driver.commands(),
        vec![AntennaCall::Reset(AntennaChannel::Primary)]
    );
}

#[test]
fn test_clock_recovered_by_majority_vote() {
    let fs = Arc::new(MemoryFileSystem::new());
    fs.insert(TIME_FILES[0], &5000u64.to_le_bytes());
    fs.insert(TIME_FILES[1], &7000u64.to_le_bytes());
    fs.insert(TIME_FILES[2], &5000u64.to_le_bytes());

    let clock = TimeProvider::new(fs.clone(), &MissionConfig::default());
    assert_eq!(clock.get_current_time(), Some(Duration::from_millis(5000)));

    fs.remove(TIME_FILES[1]);
    let clock = TimeProvider::new(fs.clone(), &MissionConfig::default());
    assert_eq!(clock.get_current_time(), Some(Duration::from_millis(5000)));

    fs.insert(TIME_FILES[1], &9000u64.to_le_bytes());
    fs.insert(TIME_FILES[2], &8000u64.to_le_bytes());
    let clock = TimeProvider::new(fs, &MissionConfig::default());
    assert_eq!(clock.get_current_time(), Some(Duration::from_millis(5000)));
}

#[test]
fn test_clock_survives_reboot() {
    let rig = Rig::new();
    let (obc, _) = rig.boot_with_driver();
    obc.advance_time(Duration::from_secs(20 * 60));
    drop(obc);

    for path in TIME_FILES {
        assert_eq!(rig.fs.read(path).unwrap().len(), 8);
    }
    let (obc, _) = rig.boot_with_driver();
    assert!(obc.current_time().unwrap() >= Duration::from_secs(15 * 60));
}

#[test]
fn test_boot_index_and_fdir_policy_persist() {
    let rig = Rig::new();
    let (obc, _) = rig.boot_with_driver();
    assert_eq!(obc.boot_index(), 1);
    obc.set_fdir_policy(Device::Gyro, ErrorPolicy::new(20, 10, 1));
    drop(obc);

    let (obc, _) = rig.boot_with_driver();
    assert_eq!(obc.boot_index(), 2);
    assert_eq!(
        obc.fdir().get_config()[Device::Gyro.index()],
        ErrorPolicy::new(20, 10, 1)
    );
}

#[test]
fn test_failing_antenna_bus_escalates_to_power_cycle() {
    let rig = Rig::new();
    let bus = Arc::new(MockI2cBus::new());
    let obc = rig.boot(AntennaHardware::Bus(bus.clone()), MissionConfig::default());
    obc.set_fdir_policy(Device::AntennaPrimary, ErrorPolicy::new(10, 5, 2));

    bus.fail_next(I2cError::Nack);
    obc.run_once();
    assert_eq!(obc.fdir().values()[Device::AntennaPrimary.index()], 5);
    assert_eq!(rig.power.power_cycle_count(), 0);

    bus.fail_next(I2cError::Timeout);
    obc.run_once();
    assert_eq!(obc.fdir().values()[Device::AntennaPrimary.index()], 10);
    assert_eq!(rig.power.power_cycle_count(), 1);

    obc.run_once();
    assert_eq!(obc.fdir().values()[Device::AntennaPrimary.index()], 8);
}

#[test]
fn test_masked_device_is_not_power_cycled() {
    let rig = Rig::new();
    let bus = Arc::new(MockI2cBus::new());
    let obc = rig.boot(AntennaHardware::Bus(bus.clone()), MissionConfig::default());
    obc.set_fdir_policy(Device::AntennaPrimary, ErrorPolicy::new(5, 5, 2));
    obc.set_fdir_mask(Device::AntennaPrimary.mask_bit());

    bus.fail_next(I2cError::BusError);
    obc.run_once();

    assert_eq!(obc.fdir().values()[Device::AntennaPrimary.index()], 5);
    assert_eq!(rig.power.power_cycle_count(), 0);
}

#[test]
fn test_experiment_runs_to_completion() {
    let rig = Rig::new();
    let driver = Arc::new(MockAntennaDriver::new());
    let obc = rig.boot(AntennaHardware::Driver(driver), fast_config());
    assert!(obc.set_fibo_iterations(3));
    let handle = obc.start().unwrap();

    assert!(obc.request_experiment(FiboExperiment::CODE));
    assert!(wait_for(|| obc.experiment_info().iteration_counter == 1));
    handle.shutdown();

    let info = obc.experiment_info();
    assert_eq!(info.last_iteration_result, Some(IterationResult::Finished));
    assert_eq!(
        rig.fs.contents(FIBO_RESULT_FILE).unwrap().len(),
        3 * std::mem::size_of::<u64>()
    );
}

#[test]
fn test_experiment_abort() {
    let rig = Rig::new();
    let driver = Arc::new(MockAntennaDriver::new());
    let obc = rig.boot(AntennaHardware::Driver(driver), fast_config());
    assert!(obc.set_fibo_iterations(10_000));
    let handle = obc.start().unwrap();

    assert!(obc.request_experiment(FiboExperiment::CODE));
    assert!(wait_for(|| obc.experiment_info().current == Some(FiboExperiment::CODE)));
    assert!(!obc.request_experiment(FiboExperiment::CODE));

    obc.abort_experiment();
    assert!(wait_for(|| obc.experiment_info().current.is_none()));
    let info = obc.experiment_info();
    assert_eq!(info.last_iteration_result, Some(IterationResult::Abort));
    assert_eq!(info.iteration_counter, 1);

    handle.shutdown();
}

#[test]
fn test_suspend_and_single_iteration() {
    let rig = Rig::new();
    let driver = Arc::new(MockAntennaDriver::new());
    let obc = rig.boot(AntennaHardware::Driver(driver), fast_config());
    let handle = obc.start().unwrap();
    let control = obc.mission_control().clone();

    assert!(control.wait_for_passes(3, WAIT));
    obc.suspend_mission();
    thread::sleep(Duration::from_millis(50));
    let passes = control.passes();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(control.passes(), passes);

    obc.request_single_iteration();
    assert!(control.wait_for_passes(passes + 1, WAIT));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(control.passes(), passes + 1);
    assert!(control.is_suspended());

    obc.resume_mission();
    assert!(control.wait_for_passes(passes + 3, WAIT));
    handle.shutdown();

    assert!(obc.metrics().passes() >= passes + 3);
}
