mod program;

pub use program::{Cell, Day, DayProgram, HOURS_PER_DAY, QUARTERS_PER_HOUR, WeeklyProgram};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard, Notify, TryLockError};

use crate::core::error::TimetableError;
use crate::core::status::{HvacMode, Inertia, Mode, ShouldBeOn, StatusSnapshot, TemperatureName};
use crate::core::time::DateTime;
use crate::core::unit::Degrees;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NamedTemperatures {
    pub t0: f64,
    pub tmin: f64,
    pub tmax: f64,
}

impl NamedTemperatures {
    pub fn get(&self, name: TemperatureName) -> Degrees {
        match name {
            TemperatureName::T0 => Degrees(self.t0),
            TemperatureName::Tmin => Degrees(self.tmin),
            TemperatureName::Tmax => Degrees(self.tmax),
        }
    }

    fn set(&mut self, name: TemperatureName, value: f64) {
        match name {
            TemperatureName::T0 => self.t0 = value,
            TemperatureName::Tmin => self.tmin = value,
            TemperatureName::Tmax => self.tmax = value,
        }
    }
}

/// The persisted document: named temperatures, control settings and the
/// weekly program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimetableSettings {
    pub temperatures: NamedTemperatures,
    pub differential: f64,
    pub grace_time: Option<f64>,
    pub mode: Mode,
    pub hvac_mode: HvacMode,
    pub inertia: Inertia,
    pub timetable: WeeklyProgram,
}

impl TimetableSettings {
    pub fn validate(&self) -> Result<(), TimetableError> {
        validate_temperature(self.temperatures.t0)?;
        validate_temperature(self.temperatures.tmin)?;
        validate_temperature(self.temperatures.tmax)?;
        validate_differential(self.differential)?;

        if let Some(grace) = self.grace_time {
            validate_grace_time(grace)?;
        }

        Ok(())
    }
}

fn validate_temperature(value: f64) -> Result<(), TimetableError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(TimetableError::InvalidContent(format!(
            "temperature `{value}` is invalid, it must be a finite number"
        )))
    }
}

fn validate_differential(value: f64) -> Result<(), TimetableError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(TimetableError::InvalidContent(format!(
            "differential `{value}` is invalid, it must be a number in range [0;1]"
        )))
    }
}

fn validate_grace_time(value: f64) -> Result<(), TimetableError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(TimetableError::InvalidContent(format!(
            "grace time `{value}` is invalid, it must be a positive number of seconds or null"
        )))
    }
}

/// The latching hysteresis decision around `target`.
///
/// The inertia mode selects where the switch-on and switch-off thresholds
/// sit relative to the target; between the two thresholds the prior
/// actuator state is preserved. Cooling mirrors the comparisons. The
/// switch-on condition is checked first, so with a zero differential the
/// actuator turns on at the target.
pub fn hysteresis(
    hvac_mode: HvacMode,
    inertia: Inertia,
    target: f64,
    differential: f64,
    current: f64,
    prior_on: bool,
) -> bool {
    let d = differential;

    match hvac_mode {
        HvacMode::Heating => {
            let (on_below, off_above) = match inertia {
                Inertia::Low => (target - d, target + d),
                Inertia::Medium => (target - 2.0 * d, target),
                Inertia::High => (target - 2.0 * d, target - d),
            };

            if current <= on_below {
                true
            } else if current >= off_above {
                false
            } else {
                prior_on
            }
        }
        HvacMode::Cooling => {
            let (on_above, off_below) = match inertia {
                Inertia::Low => (target + d, target - d),
                Inertia::Medium => (target + 2.0 * d, target),
                Inertia::High => (target + 2.0 * d, target + d),
            };

            if current >= on_above {
                true
            } else if current <= off_below {
                false
            } else {
                prior_on
            }
        }
    }
}

/// The timetable: owns the persisted settings and answers the should-be-on
/// question. Shared between the control cycle and the socket through
/// [`SharedTimetable`].
#[derive(Debug)]
pub struct Timetable {
    settings: TimetableSettings,
    path: PathBuf,
}

impl Timetable {
    /// Create a timetable from in-memory settings, backed by `path` for
    /// later saves.
    pub fn new(settings: TimetableSettings, path: impl Into<PathBuf>) -> Result<Self, TimetableError> {
        settings.validate()?;

        Ok(Self {
            settings,
            path: path.into(),
        })
    }

    /// Read and validate the JSON document at `path`.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, TimetableError> {
        let path = path.into();
        let settings = read_settings(&path)?;

        tracing::debug!("Timetable loaded from {}", path.display());

        Ok(Self { settings, path })
    }

    /// Re-read the backing file; on any failure the in-memory state is
    /// left untouched.
    pub fn reload(&mut self) -> Result<(), TimetableError> {
        self.settings = read_settings(&self.path)?;
        tracing::info!("Timetable reloaded from {}", self.path.display());
        Ok(())
    }

    /// Atomically rewrite the backing file (write to a temp file in the
    /// same directory, then rename over the target).
    pub fn save(&self) -> Result<(), TimetableError> {
        let json = serde_json::to_string_pretty(&self.settings)
            .map_err(|e| TimetableError::InvalidContent(e.to_string()))?;

        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;

        tracing::debug!("Timetable saved to {}", self.path.display());
        Ok(())
    }

    pub fn settings(&self) -> &TimetableSettings {
        &self.settings
    }

    pub fn mode(&self) -> Mode {
        self.settings.mode
    }

    pub fn hvac_mode(&self) -> HvacMode {
        self.settings.hvac_mode
    }

    /// Resolve the target temperature at `now`.
    ///
    /// In mode `on`/`off` the returned value is the infinity that makes the
    /// hysteresis comparison always/never request the actuator, mirrored
    /// for cooling.
    pub fn target_temperature(&self, now: DateTime) -> Degrees {
        let s = &self.settings;

        match s.mode {
            Mode::On => match s.hvac_mode {
                HvacMode::Heating => Degrees(f64::INFINITY),
                HvacMode::Cooling => Degrees(f64::NEG_INFINITY),
            },
            Mode::Off => match s.hvac_mode {
                HvacMode::Heating => Degrees(f64::NEG_INFINITY),
                HvacMode::Cooling => Degrees(f64::INFINITY),
            },
            Mode::T0 => s.temperatures.get(TemperatureName::T0),
            Mode::Tmin => s.temperatures.get(TemperatureName::Tmin),
            Mode::Tmax => s.temperatures.get(TemperatureName::Tmax),
            Mode::Auto => {
                let day = Day::from(now.weekday());
                let hour = now.hour() as usize;
                let quarter = (now.minute() / 15) as usize;

                match s.timetable.cell(day, hour, quarter) {
                    Cell::Named(name) => s.temperatures.get(name),
                    Cell::Value(v) => Degrees(v),
                }
            }
        }
    }

    /// Decide whether the actuator should be on right now.
    ///
    /// `on_since` is the instant the actuator was last switched on and has
    /// stayed on; when the configured grace time has been exceeded the
    /// prior state is treated as off, which forces the decision off inside
    /// the dead zone until the fresh switch-on threshold is crossed again.
    pub fn should_the_heating_be_on(
        &self,
        current: Degrees,
        actuator_on: bool,
        on_since: Option<DateTime>,
    ) -> ShouldBeOn {
        let s = &self.settings;
        let now = DateTime::now();
        let target = self.target_temperature(now);

        let prior_on = actuator_on && !self.grace_expired(now, on_since);
        let on = hysteresis(s.hvac_mode, s.inertia, target.0, s.differential, current.0, prior_on);

        tracing::debug!(
            "Decision: mode {}, current {}, target {}, prior {} -> {}",
            s.mode,
            current,
            target,
            prior_on,
            if on { "ON" } else { "OFF" }
        );

        ShouldBeOn {
            on,
            status: StatusSnapshot::new(s.mode, s.hvac_mode, on, Some(current), Some(target)),
        }
    }

    fn grace_expired(&self, now: DateTime, on_since: Option<DateTime>) -> bool {
        match (self.settings.grace_time, on_since) {
            (Some(grace), Some(since)) => now.elapsed_since(since).as_secs_f64() > grace,
            _ => false,
        }
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.settings.mode = mode;
        tracing::debug!("New mode set: {}", mode);
    }

    pub fn set_hvac_mode(&mut self, hvac_mode: HvacMode) {
        self.settings.hvac_mode = hvac_mode;
        tracing::debug!("New hvac mode set: {}", hvac_mode);
    }

    pub fn set_inertia(&mut self, inertia: Inertia) {
        self.settings.inertia = inertia;
    }

    pub fn set_temperature(&mut self, name: TemperatureName, value: f64) -> Result<(), TimetableError> {
        validate_temperature(value)?;
        self.settings.temperatures.set(name, value);
        tracing::debug!("New {} temperature set: {}", name, value);
        Ok(())
    }

    pub fn set_differential(&mut self, value: f64) -> Result<(), TimetableError> {
        validate_differential(value)?;
        self.settings.differential = value;
        Ok(())
    }

    /// Set the grace time in seconds; `None` disables it.
    pub fn set_grace_time(&mut self, seconds: Option<f64>) -> Result<(), TimetableError> {
        if let Some(seconds) = seconds {
            validate_grace_time(seconds)?;
            self.settings.grace_time = Some(seconds.round());
        } else {
            self.settings.grace_time = None;
        }
        Ok(())
    }

    pub fn set_day(&mut self, day: Day, program: DayProgram) {
        self.settings.timetable.set_day(day, program);
        tracing::debug!("Program updated for {}", day);
    }

    pub fn set_program(&mut self, program: WeeklyProgram) {
        self.settings.timetable = program;
    }

    /// Replace the whole settings document; validated before the swap so
    /// an invalid replacement leaves the previous state intact.
    pub fn replace(&mut self, settings: TimetableSettings) -> Result<(), TimetableError> {
        settings.validate()?;
        self.settings = settings;
        Ok(())
    }
}

fn read_settings(path: &Path) -> Result<TimetableSettings, TimetableError> {
    let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => TimetableError::NotFound(path.to_owned()),
        std::io::ErrorKind::PermissionDenied => TimetableError::PermissionDenied(path.to_owned()),
        _ => TimetableError::Io(e),
    })?;

    let settings: TimetableSettings = serde_json::from_str(&raw).map_err(|e| {
        use serde_json::error::Category;
        match e.classify() {
            Category::Data => TimetableError::InvalidContent(e.to_string()),
            _ => TimetableError::InvalidSyntax(e.to_string()),
        }
    })?;

    settings.validate()?;
    Ok(settings)
}

/// Hub handle to the timetable: the cycle and the socket share the state
/// through the mutex and coordinate through the change notification (the
/// master condition).
#[derive(Clone)]
pub struct SharedTimetable {
    inner: Arc<Mutex<Timetable>>,
    changed: Arc<Notify>,
}

impl SharedTimetable {
    pub fn new(timetable: Timetable) -> Self {
        Self {
            inner: Arc::new(Mutex::new(timetable)),
            changed: Arc::new(Notify::new()),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, Timetable> {
        self.inner.lock().await
    }

    pub fn try_lock(&self) -> Result<MutexGuard<'_, Timetable>, TryLockError> {
        self.inner.try_lock()
    }

    /// Wake the control cycle so a mutation is observed without waiting a
    /// full interval.
    pub fn notify_changed(&self) {
        self.changed.notify_one();
    }

    pub async fn changed(&self) {
        self.changed.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_settings() -> TimetableSettings {
        TimetableSettings {
            temperatures: NamedTemperatures {
                t0: 5.0,
                tmin: 18.0,
                tmax: 21.0,
            },
            differential: 0.5,
            grace_time: None,
            mode: Mode::Auto,
            hvac_mode: HvacMode::Heating,
            inertia: Inertia::Low,
            timetable: WeeklyProgram::uniform(Cell::Named(TemperatureName::Tmin)),
        }
    }

    fn timetable_with(settings: TimetableSettings) -> Timetable {
        Timetable::new(settings, "unused.json").unwrap()
    }

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime {
        chrono::Local.with_ymd_and_hms(y, m, d, h, min, 0).unwrap().into()
    }

    #[test]
    fn test_heating_low_inertia_comfort() {
        // T=20, d=0.5, heating, inertia 1
        let h = |current, prior| hysteresis(HvacMode::Heating, Inertia::Low, 20.0, 0.5, current, prior);

        assert!(h(19.4, false), "cold room switches on");
        assert!(!h(20.6, true), "warm room switches off");
        assert!(h(20.0, true), "dead zone keeps the heating latched on");
        assert!(!h(20.0, false), "dead zone keeps the heating latched off");
    }

    #[test]
    fn test_cooling_medium_inertia() {
        // T=24, d=0.5, cooling, inertia 2
        let h = |current, prior| hysteresis(HvacMode::Cooling, Inertia::Medium, 24.0, 0.5, current, prior);

        assert!(h(25.5, false), "hot room switches on at T+2d");
        assert!(!h(24.0, true), "cooled down to target switches off");
        assert!(h(24.7, true), "dead zone keeps cooling latched on");
    }

    #[test]
    fn test_heating_high_inertia_releases_early() {
        // T=20, d=0.5, heating, inertia 3: off already at T-d
        let h = |current, prior| hysteresis(HvacMode::Heating, Inertia::High, 20.0, 0.5, current, prior);

        assert!(h(18.9, false));
        assert!(!h(19.5, true));
        assert!(h(19.2, true));
    }

    #[test]
    fn test_zero_differential_turns_on_at_target() {
        assert!(hysteresis(HvacMode::Heating, Inertia::Low, 20.0, 0.0, 20.0, false));
    }

    #[test]
    fn test_mode_off_is_always_off() {
        let mut settings = test_settings();
        settings.mode = Mode::Off;

        let tt = timetable_with(settings);
        for (current, prior) in [(-10.0, true), (15.0, false), (35.0, true)] {
            let decision = tt.should_the_heating_be_on(Degrees(current), prior, None);
            assert!(!decision.on);
            assert_eq!(decision.status.target_temperature, None);
        }

        let mut cooling = test_settings();
        cooling.mode = Mode::Off;
        cooling.hvac_mode = HvacMode::Cooling;
        let tt = timetable_with(cooling);
        assert!(!tt.should_the_heating_be_on(Degrees(40.0), true, None).on);
    }

    #[test]
    fn test_mode_on_is_always_on() {
        let mut settings = test_settings();
        settings.mode = Mode::On;

        let tt = timetable_with(settings);
        assert!(tt.should_the_heating_be_on(Degrees(35.0), false, None).on);
    }

    #[test]
    fn test_program_resolution_at_quarter() {
        let mut settings = test_settings();
        let mut monday = DayProgram::uniform(Cell::Named(TemperatureName::Tmin));
        monday.set_cell(8, 2, Cell::Named(TemperatureName::Tmax));
        monday.set_cell(8, 3, Cell::Named(TemperatureName::Tmax));
        settings.timetable.set_day(Day::Monday, monday);

        let tt = timetable_with(settings);

        // 2025-01-06 is a monday; 08:34 falls in the third quarter
        assert_eq!(tt.target_temperature(local(2025, 1, 6, 8, 34)), Degrees(21.0));
        assert_eq!(tt.target_temperature(local(2025, 1, 6, 8, 14)), Degrees(18.0));
        // sunday still follows the uniform program
        assert_eq!(tt.target_temperature(local(2025, 1, 5, 8, 34)), Degrees(18.0));
    }

    #[test]
    fn test_fixed_mode_resolves_named_temperature() {
        let mut settings = test_settings();
        settings.mode = Mode::T0;

        let tt = timetable_with(settings);
        assert_eq!(tt.target_temperature(DateTime::now()), Degrees(5.0));
    }

    #[tokio::test]
    async fn test_grace_time_forces_off_in_dead_zone() {
        let mut settings = test_settings();
        settings.mode = Mode::Tmin; // fixed target 18.0
        settings.grace_time = Some(3600.0);

        let tt = timetable_with(settings);
        let now = local(2025, 1, 6, 12, 0);

        now.eval_timeshifted(async {
            let current = Degrees(18.0); // dead zone: latch would keep it on

            let fresh = tt.should_the_heating_be_on(current, true, Some(now - crate::core::time::Duration::minutes(10)));
            assert!(fresh.on, "within grace the latch holds");

            let stale = tt.should_the_heating_be_on(current, true, Some(now - crate::core::time::Duration::minutes(90)));
            assert!(!stale.on, "grace expired forces off despite the latch");

            let cold = tt.should_the_heating_be_on(Degrees(17.0), true, Some(now - crate::core::time::Duration::minutes(90)));
            assert!(cold.on, "fresh switch-on threshold re-arms the actuator");
        })
        .await;
    }

    #[test]
    fn test_setters_validate_ranges() {
        let mut tt = timetable_with(test_settings());

        assert!(tt.set_differential(0.3).is_ok());
        assert!(tt.set_differential(1.5).is_err());
        assert!(tt.set_differential(f64::NAN).is_err());

        assert!(tt.set_grace_time(Some(120.4)).is_ok());
        assert_eq!(tt.settings().grace_time, Some(120.0));
        assert!(tt.set_grace_time(None).is_ok());
        assert!(tt.set_grace_time(Some(-1.0)).is_err());

        assert!(tt.set_temperature(TemperatureName::Tmax, 22.0).is_ok());
        assert!(tt.set_temperature(TemperatureName::Tmax, f64::INFINITY).is_err());
    }

    #[test]
    fn test_replace_keeps_old_state_on_invalid_settings() {
        let mut tt = timetable_with(test_settings());

        let mut invalid = test_settings();
        invalid.differential = 3.0;

        assert!(tt.replace(invalid).is_err());
        assert_eq!(tt.settings().differential, 0.5);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let path = std::env::temp_dir().join(format!("hearth-roundtrip-{}.json", std::process::id()));

        let tt = Timetable::new(test_settings(), &path).unwrap();
        tt.save().unwrap();

        let loaded = Timetable::load(&path).unwrap();
        assert_eq!(loaded.settings(), tt.settings());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_shipped_sample_timetable_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../timetable.json");
        let tt = Timetable::load(path).unwrap();

        assert_eq!(tt.mode(), Mode::Auto);
        assert_eq!(tt.settings().inertia, Inertia::Low);
        // monday 07:00 is a comfort slot in the shipped program
        assert_eq!(tt.settings().timetable.cell(Day::Monday, 7, 0), Cell::Named(TemperatureName::Tmax));
    }

    #[test]
    fn test_load_error_kinds() {
        let missing = Timetable::load("/no/such/dir/timetable.json");
        assert!(matches!(missing, Err(TimetableError::NotFound(_))));

        let path = std::env::temp_dir().join(format!("hearth-broken-{}.json", std::process::id()));

        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(Timetable::load(&path), Err(TimetableError::InvalidSyntax(_))));

        std::fs::write(&path, "{\"mode\": \"auto\"}").unwrap();
        assert!(matches!(Timetable::load(&path), Err(TimetableError::InvalidContent(_))));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_reload_preserves_state_on_failure() {
        let path = std::env::temp_dir().join(format!("hearth-reload-{}.json", std::process::id()));

        let mut tt = Timetable::new(test_settings(), &path).unwrap();
        tt.save().unwrap();

        std::fs::write(&path, "garbage").unwrap();
        assert!(tt.reload().is_err());
        assert_eq!(tt.settings(), &test_settings());

        std::fs::remove_file(&path).ok();
    }
}
