use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{broadcast, watch};

use infrastructure::LogHandle;

use crate::actuator::Actuator;
use crate::core::error::{HeatingError, ThermometerError, TimetableError, exit};
use crate::core::status::StatusSnapshot;
use crate::core::time::DateTime;
use crate::thermometer::Thermometer;
use crate::timetable::SharedTimetable;

/// Shared daemon lifecycle: the enabled flag, the process exit code and
/// the stop signal every long-running task selects on. Components request
/// termination through [`DaemonContext::shutdown`] instead of touching
/// global state.
pub struct DaemonContext {
    enabled: AtomicBool,
    exit_code: AtomicU8,
    stop_tx: watch::Sender<bool>,
}

impl DaemonContext {
    pub fn new() -> Arc<Self> {
        let (stop_tx, _) = watch::channel(false);

        Arc::new(Self {
            enabled: AtomicBool::new(true),
            exit_code: AtomicU8::new(exit::OK),
            stop_tx,
        })
    }

    pub fn shutdown(&self, code: u8) {
        self.exit_code.store(code, Ordering::SeqCst);
        self.enabled.store(false, Ordering::SeqCst);
        let _ = self.stop_tx.send(true);
    }

    /// Record a shutdown-stage failure without clobbering the exit code a
    /// previous shutdown request already set.
    pub fn escalate(&self, code: u8) {
        let _ = self
            .exit_code
            .compare_exchange(exit::OK, code, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown has been requested, also when that happened
    /// before the call.
    pub async fn stopped(&self) {
        let mut rx = self.stop_tx.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

#[derive(Debug, thiserror::Error)]
enum StepError {
    #[error("error from the thermometer: {0}")]
    Thermometer(#[from] ThermometerError),
    #[error("error from the actuator: {0}")]
    Heating(#[from] HeatingError),
    #[error("the timetable state is invalid: {0}")]
    InvalidState(#[from] TimetableError),
}

impl StepError {
    fn explain(&self) -> Option<String> {
        match self {
            StepError::Thermometer(e) => e.suberror().map(str::to_owned),
            StepError::Heating(e) => e.suberror().map(str::to_owned),
            StepError::InvalidState(_) => None,
        }
    }
}

/// The supervisory loop: each turn reads the temperature, asks the
/// timetable for the should-be-on decision, drives the actuator and
/// publishes a status snapshot, all while holding the master lock. Between
/// turns it waits for the configured interval, a timetable change or a
/// shutdown request, whichever comes first.
pub struct ControlCycle {
    timetable: SharedTimetable,
    thermometer: Thermometer,
    actuator: Actuator,
    ctx: Arc<DaemonContext>,
    interval: Duration,
    sleep_on_error: Duration,
    status_tx: watch::Sender<StatusSnapshot>,
    monitor_tx: broadcast::Sender<StatusSnapshot>,
    on_since: Option<DateTime>,
}

impl ControlCycle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        timetable: SharedTimetable,
        thermometer: Thermometer,
        actuator: Actuator,
        ctx: Arc<DaemonContext>,
        interval: Duration,
        sleep_on_error: Duration,
        status_tx: watch::Sender<StatusSnapshot>,
        monitor_tx: broadcast::Sender<StatusSnapshot>,
    ) -> Self {
        Self {
            timetable,
            thermometer,
            actuator,
            ctx,
            interval,
            sleep_on_error,
            status_tx,
            monitor_tx,
            on_since: None,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            "Daemon started, the actuator is currently {}",
            if self.actuator.is_on() { "ON" } else { "OFF" }
        );

        while self.ctx.is_enabled() {
            let sleep_time = match AssertUnwindSafe(self.step()).catch_unwind().await {
                Ok(sleep_time) => sleep_time,
                Err(_) => {
                    tracing::error!("Unknown error escaped the control cycle, shutting down");
                    self.ctx.shutdown(exit::RUN_UNKNOWN);
                    break;
                }
            };

            if self.ctx.is_enabled() {
                tokio::select! {
                    _ = self.timetable.changed() => {},
                    _ = self.ctx.stopped() => {},
                    _ = tokio::time::sleep(sleep_time) => {},
                }
            }
        }

        self.finalize().await;
    }

    /// One cycle turn under the master lock. Returns how long to wait
    /// before the next turn.
    async fn step(&mut self) -> Duration {
        let shared = self.timetable.clone();
        let timetable = shared.lock().await;

        let (snapshot, sleep_time) = match self.tick(&timetable).await {
            Ok(snapshot) => (snapshot, self.interval),
            Err(e) => {
                if let StepError::InvalidState(_) = e {
                    // every mutation path validates before committing, so
                    // this means a daemon bug corrupted the shared state
                    tracing::error!("{}, shutting down", e);
                    self.ctx.shutdown(exit::RUN_INVALID_STATE);
                } else {
                    tracing::error!("{}", e);
                    if let Some(explain) = e.explain() {
                        tracing::debug!("{}", explain);
                    }
                }

                let settings = timetable.settings();
                let snapshot =
                    StatusSnapshot::new(settings.mode, settings.hvac_mode, self.actuator.is_on(), None, None)
                        .with_error(e.to_string(), e.explain());

                (snapshot, self.sleep_on_error)
            }
        };

        // fan out to monitors before releasing the master lock, so every
        // observer sees the state of this very turn
        self.status_tx.send_replace(snapshot.clone());
        let _ = self.monitor_tx.send(snapshot);

        sleep_time
    }

    async fn tick(&mut self, timetable: &crate::timetable::Timetable) -> Result<StatusSnapshot, StepError> {
        timetable.settings().validate()?;

        let temperature = self.thermometer.temperature().await?;
        let actuator_on = self.actuator.status().await?;

        // keep the continuous on-time bookkeeping honest even when the
        // actuator changed behind our back
        match (actuator_on, self.on_since) {
            (true, None) => self.on_since = Some(DateTime::now()),
            (false, _) => self.on_since = None,
            _ => {}
        }

        let decision = timetable.should_the_heating_be_on(temperature, actuator_on, self.on_since);

        if decision.on != actuator_on {
            if decision.on {
                self.actuator.switch_on().await?;
                self.on_since = Some(DateTime::now());
                tracing::info!("The actuator has been switched ON (current temperature {})", temperature);
            } else {
                self.actuator.switch_off().await?;
                self.on_since = None;
                tracing::info!("The actuator has been switched OFF (current temperature {})", temperature);
            }
        }

        let mut status = decision.status;
        status.status = self.actuator.is_on() as u8;
        Ok(status)
    }

    async fn finalize(&mut self) {
        tracing::debug!("Stopping daemon");

        if self.actuator.is_on() {
            match self.actuator.switch_off().await {
                Ok(()) => tracing::info!("The actuator has been switched OFF"),
                Err(e) => {
                    tracing::error!("Cannot switch off the actuator during shutdown: {}", e);
                    self.ctx.escalate(exit::SHUTDOWN_SWITCH_OFF);
                }
            }
        }

        self.thermometer.close().await;
        self.actuator.close().await;

        tracing::info!("Daemon stopped");
    }
}

/// Async-safe signal handling: the handlers only forward into this task,
/// which performs the real work on the main loop's primitives.
pub async fn handle_signals(
    ctx: Arc<DaemonContext>,
    timetable: SharedTimetable,
    logs: Arc<LogHandle>,
) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut user1 = signal(SignalKind::user_defined1())?;

    loop {
        tokio::select! {
            _ = interrupt.recv() => {
                tracing::info!("Shutdown requested by interrupt");
                ctx.shutdown(exit::KEYBOARD_INTERRUPT);
            }
            _ = terminate.recv() => {
                tracing::info!("Shutdown requested");
                ctx.shutdown(exit::OK);
            }
            _ = hangup.recv() => {
                tracing::info!("Timetable reload requested");
                {
                    let mut tt = timetable.lock().await;
                    if let Err(e) = tt.reload() {
                        tracing::error!("Cannot reload the timetable, keeping the previous settings: {}", e);
                    }
                }
                timetable.notify_changed();
            }
            _ = user1.recv() => logs.toggle_debug(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::FakeActuator;
    use crate::core::status::{HvacMode, Inertia, Mode, TemperatureName};
    use crate::core::unit::DegreeScale;
    use crate::thermometer::{Calibration, FakeSensor, ScaleAdapter, Sensor, SensorKind};
    use crate::timetable::{Cell, NamedTemperatures, Timetable, TimetableSettings, WeeklyProgram};

    fn fake_thermometer() -> Thermometer {
        let sensor = Sensor::new(SensorKind::Fake(FakeSensor::new(DegreeScale::Celsius)), Calibration::identity());
        Thermometer::Raw(ScaleAdapter::new(sensor, DegreeScale::Celsius, DegreeScale::Celsius))
    }

    fn shared_timetable(mode: Mode) -> SharedTimetable {
        let settings = TimetableSettings {
            temperatures: NamedTemperatures {
                t0: 5.0,
                tmin: 18.0,
                tmax: 22.0,
            },
            differential: 0.5,
            grace_time: None,
            mode,
            hvac_mode: HvacMode::Heating,
            inertia: Inertia::Low,
            timetable: WeeklyProgram::uniform(Cell::Named(TemperatureName::Tmin)),
        };

        SharedTimetable::new(Timetable::new(settings, "unused.json").unwrap())
    }

    fn cycle_with(mode: Mode, actuator: FakeActuator) -> (ControlCycle, watch::Receiver<StatusSnapshot>) {
        let (status_tx, status_rx) = watch::channel(StatusSnapshot::new(
            mode,
            HvacMode::Heating,
            false,
            None,
            None,
        ));
        let (monitor_tx, _) = broadcast::channel(16);

        let cycle = ControlCycle::new(
            shared_timetable(mode),
            fake_thermometer(),
            Actuator::Fake(actuator),
            DaemonContext::new(),
            Duration::from_secs(30),
            Duration::from_secs(60),
            status_tx,
            monitor_tx,
        );

        (cycle, status_rx)
    }

    #[tokio::test]
    async fn test_step_switches_on_below_target() {
        // fake sensor reads 20.0, tmax target is 22.0
        let (mut cycle, status_rx) = cycle_with(Mode::Tmax, FakeActuator::new());

        let sleep_time = cycle.step().await;

        assert_eq!(sleep_time, Duration::from_secs(30));
        assert!(cycle.actuator.is_on());
        assert!(cycle.on_since.is_some());

        let snapshot = status_rx.borrow();
        assert_eq!(snapshot.status, 1);
        assert_eq!(snapshot.current_temperature, Some(20.0));
        assert_eq!(snapshot.target_temperature, Some(22.0));
        assert_eq!(snapshot.error, None);
    }

    #[tokio::test]
    async fn test_step_switches_off_in_mode_off() {
        let mut actuator = FakeActuator::new();
        actuator.switch_on().unwrap();

        let (mut cycle, _status_rx) = cycle_with(Mode::Off, actuator);
        cycle.step().await;

        assert!(!cycle.actuator.is_on());
        assert!(cycle.on_since.is_none());
    }

    #[tokio::test]
    async fn test_step_builds_error_snapshot_and_backs_off() {
        let mut actuator = FakeActuator::new();
        actuator.fail_next("relay fuse blown");

        let (mut cycle, status_rx) = cycle_with(Mode::Tmax, actuator);
        let sleep_time = cycle.step().await;

        assert_eq!(sleep_time, Duration::from_secs(60), "errors back off to sleep_on_error");

        let snapshot = status_rx.borrow();
        assert!(snapshot.error.as_deref().unwrap().contains("relay fuse blown"));
        assert_eq!(snapshot.current_temperature, None);
    }

    #[tokio::test]
    async fn test_monitors_receive_each_turn() {
        let (mut cycle, _status_rx) = cycle_with(Mode::Tmax, FakeActuator::new());
        let mut monitor_rx = cycle.monitor_tx.subscribe();

        cycle.step().await;

        let frame = monitor_rx.recv().await.unwrap();
        assert_eq!(frame.status, 1);
    }

    #[tokio::test]
    async fn test_run_exits_on_shutdown_and_forces_off() {
        let (cycle, status_rx) = cycle_with(Mode::Tmax, FakeActuator::new());
        let ctx = cycle.ctx.clone();

        let handle = tokio::spawn(cycle.run());

        // wait for the first turn, then request shutdown
        let mut status_rx = status_rx;
        status_rx.changed().await.unwrap();
        ctx.shutdown(exit::OK);

        handle.await.unwrap();
        assert_eq!(ctx.exit_code(), exit::OK);
    }

    #[tokio::test]
    async fn test_panic_in_a_turn_shuts_down_with_unknown_error() {
        let mut actuator = FakeActuator::new();
        actuator.panic_next();

        let (cycle, _status_rx) = cycle_with(Mode::Tmax, actuator);
        let ctx = cycle.ctx.clone();

        cycle.run().await;

        assert!(!ctx.is_enabled());
        assert_eq!(ctx.exit_code(), exit::RUN_UNKNOWN);
    }

    #[tokio::test]
    async fn test_context_shutdown_resolves_stopped() {
        let ctx = DaemonContext::new();
        ctx.shutdown(exit::KEYBOARD_INTERRUPT);

        // resolves even though shutdown happened before the wait
        ctx.stopped().await;

        assert!(!ctx.is_enabled());
        assert_eq!(ctx.exit_code(), exit::KEYBOARD_INTERRUPT);

        ctx.escalate(exit::SHUTDOWN_SWITCH_OFF);
        assert_eq!(ctx.exit_code(), exit::KEYBOARD_INTERRUPT, "escalate keeps the first code");
    }
}
