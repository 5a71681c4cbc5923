use std::path::PathBuf;
use std::time::Duration;

use config::{Config, File};
use serde::Deserialize;

use infrastructure::{HttpServerConfig, MonitoringConfig};

use crate::actuator::{Actuator, FakeActuator, GpioActuator, ScriptActuator};
use crate::core::error::{ConfigError, HeatingError, ScriptError, exit};
use crate::core::script::CommandLine;
use crate::core::unit::DegreeScale;
use crate::thermometer::{
    AnalogSensor, AveragingTask, Calibration, FakeSensor, OneWireSensor, ScaleAdapter, ScriptSensor, Sensor,
    SensorKind, SimilarityChecker, Thermometer,
};

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub daemon: DaemonConfig,
    pub monitoring: MonitoringConfig,
    pub socket: HttpServerConfig,
    pub thermometer: ThermometerConfig,
    pub actuator: ActuatorConfig,
}

impl Settings {
    /// Read the TOML configuration from `$HEARTH_CONFIG`, falling back to
    /// `config.toml` in the working directory and `/etc/hearth`.
    pub fn new() -> Result<Self, config::ConfigError> {
        const SEARCH_PATHS: [&str; 2] = ["config.toml", "/etc/hearth/config.toml"];

        let path = std::env::var("HEARTH_CONFIG").ok().or_else(|| {
            SEARCH_PATHS
                .iter()
                .find(|p| std::path::Path::new(p).exists())
                .map(|p| (*p).to_owned())
        });

        let path = path.ok_or_else(|| {
            config::ConfigError::NotFound(format!("no configuration file found in {SEARCH_PATHS:?}"))
        })?;

        let s = Config::builder().add_source(File::with_name(&path)).build()?;

        s.try_deserialize()
    }

    /// Cross-field checks that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.interval == 0 {
            return Err(ConfigError("the cycle interval must be at least 1 second".to_owned()));
        }

        let t = &self.thermometer;

        if t.similarity_queuelen == 0 {
            return Err(ConfigError("similarity_queuelen must be a positive integer".to_owned()));
        }

        if !(t.similarity_delta > 0.0) {
            return Err(ConfigError("similarity_delta must be a positive number".to_owned()));
        }

        if t.avgint == 0 {
            return Err(ConfigError("avgint must be at least 1 second".to_owned()));
        }

        if t.avgtime * 60 < 2 * self.daemon.interval {
            return Err(ConfigError(format!(
                "avgtime must cover at least two cycle intervals ({} seconds)",
                2 * self.daemon.interval
            )));
        }

        if !(0.0..1.0).contains(&t.avgskip) {
            return Err(ConfigError("avgskip must be a number in range [0;1)".to_owned()));
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct DaemonConfig {
    pub enabled: bool,
    #[serde(default)]
    pub debug: bool,
    /// Path of the persisted timetable JSON document.
    pub timetable: PathBuf,
    /// Seconds between two control cycle turns.
    pub interval: u64,
    /// Seconds to wait after a failed turn; twice the interval by default.
    pub sleep_on_error: Option<u64>,
    #[serde(default = "default_scale")]
    pub scale: DegreeScale,
}

impl DaemonConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn sleep_on_error(&self) -> Duration {
        Duration::from_secs(self.sleep_on_error.unwrap_or(2 * self.interval))
    }
}

/// A component failed to come up at startup; carries the matching process
/// exit code.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("script `{}` cannot be used: {}", .0.script, .0)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Heating(#[from] HeatingError),
}

impl InitError {
    pub fn exit_code(&self) -> u8 {
        match self {
            InitError::Config(_) => exit::CFG_FILE_INVALID,
            InitError::Script(_) => exit::SCRIPT_INIT,
            InitError::Heating(_) => exit::INIT_OTHER,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ThermometerConfig {
    pub source: SourceConfig,
    /// Degree scale of the raw readings; converted to the working scale.
    #[serde(default = "default_scale")]
    pub scale: DegreeScale,
    #[serde(default)]
    pub t_ref: Vec<f64>,
    #[serde(default)]
    pub t_raw: Vec<f64>,
    #[serde(default = "default_true")]
    pub similarity_check: bool,
    #[serde(default = "default_similarity_queuelen")]
    pub similarity_queuelen: usize,
    #[serde(default = "default_similarity_delta")]
    pub similarity_delta: f64,
    #[serde(default = "default_true")]
    pub averaging_task: bool,
    /// Seconds between two background samples.
    #[serde(default = "default_avgint")]
    pub avgint: u64,
    /// Minutes covered by the averaging window.
    #[serde(default = "default_avgtime")]
    pub avgtime: u64,
    /// Fraction of extreme samples discarded by the averaging read.
    #[serde(default = "default_avgskip")]
    pub avgskip: f64,
    /// Seconds granted to the thermometer script.
    #[serde(default = "default_script_timeout")]
    pub script_timeout: u64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    Script {
        command: CommandLine,
    },
    Analog {
        channels: Vec<u8>,
        #[serde(default = "default_stddev")]
        stddev: f64,
    },
    OneWire {
        devices: Vec<String>,
        #[serde(default = "default_stddev")]
        stddev: f64,
    },
    Fake,
}

impl ThermometerConfig {
    /// Assemble the pipeline: source (with calibration) -> scale adapter
    /// -> similarity checker -> averaging task, honoring the switches.
    pub fn build(&self, daemon: &DaemonConfig) -> Result<Thermometer, InitError> {
        let calibration = Calibration::from_points(&self.t_raw, &self.t_ref)?;
        let timeout = Duration::from_secs(self.script_timeout);

        let kind = match &self.source {
            SourceConfig::Script { command } => SensorKind::Script(ScriptSensor::new(command, daemon.debug, timeout)?),
            SourceConfig::Analog { channels, stddev } => {
                SensorKind::Analog(AnalogSensor::new(channels.clone(), *stddev)?)
            }
            SourceConfig::OneWire { devices, stddev } => {
                SensorKind::OneWire(OneWireSensor::new(devices.clone(), *stddev)?)
            }
            SourceConfig::Fake => SensorKind::Fake(FakeSensor::new(self.scale)),
        };

        let adapted = ScaleAdapter::new(Sensor::new(kind, calibration), self.scale, daemon.scale);

        let thermometer = match (self.averaging_task, self.similarity_check) {
            (true, true) => {
                let checked = SimilarityChecker::new(adapted, self.similarity_queuelen, self.similarity_delta);
                Thermometer::Averaged(self.spawn_averaging(checked, daemon))
            }
            (true, false) => Thermometer::Averaged(self.spawn_averaging(adapted, daemon)),
            (false, true) => Thermometer::Checked(SimilarityChecker::new(
                adapted,
                self.similarity_queuelen,
                self.similarity_delta,
            )),
            (false, false) => Thermometer::Raw(adapted),
        };

        Ok(thermometer)
    }

    fn spawn_averaging<S>(&self, source: S, daemon: &DaemonConfig) -> AveragingTask
    where
        S: crate::thermometer::TemperatureSource + Send + 'static,
    {
        AveragingTask::spawn(
            source,
            Duration::from_secs(self.avgint),
            Duration::from_secs(self.avgtime * 60),
            self.avgskip,
            daemon.sleep_on_error(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerLevel {
    High,
    Low,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ActuatorConfig {
    Scripts {
        switchon: CommandLine,
        switchoff: CommandLine,
        status: Option<CommandLine>,
        #[serde(default = "default_script_timeout")]
        script_timeout: u64,
    },
    Gpio {
        pins: Vec<u8>,
        #[serde(default = "default_trigger_level")]
        switch_on_level: TriggerLevel,
    },
    Fake,
}

impl ActuatorConfig {
    pub fn build(&self, daemon: &DaemonConfig) -> Result<Actuator, InitError> {
        let actuator = match self {
            ActuatorConfig::Scripts {
                switchon,
                switchoff,
                status,
                script_timeout,
            } => Actuator::Script(ScriptActuator::new(
                switchon,
                switchoff,
                status.as_ref(),
                daemon.debug,
                Duration::from_secs(*script_timeout),
            )?),
            ActuatorConfig::Gpio { pins, switch_on_level } => {
                Actuator::Gpio(GpioActuator::new(pins, *switch_on_level == TriggerLevel::High)?)
            }
            ActuatorConfig::Fake => Actuator::Fake(FakeActuator::new()),
        };

        Ok(actuator)
    }
}

fn default_scale() -> DegreeScale {
    DegreeScale::Celsius
}

fn default_true() -> bool {
    true
}

fn default_similarity_queuelen() -> usize {
    12
}

fn default_similarity_delta() -> f64 {
    3.0
}

fn default_avgint() -> u64 {
    3
}

fn default_avgtime() -> u64 {
    6
}

fn default_avgskip() -> f64 {
    0.33
}

fn default_script_timeout() -> u64 {
    10
}

fn default_stddev() -> f64 {
    2.0
}

fn default_trigger_level() -> TriggerLevel {
    TriggerLevel::High
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn parse(toml: &str) -> Settings {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_shipped_sample_config_parses() {
        let sample = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../config.toml"));
        let settings = parse(sample);

        settings.validate().unwrap();
        assert!(settings.daemon.enabled);
    }

    #[test]
    fn test_defaults_and_cross_checks() {
        let settings = parse(
            r#"
            [daemon]
            enabled = true
            timetable = "timetable.json"
            interval = 30

            [monitoring.logs]
            default_level = "info"

            [socket]
            host = "127.0.0.1"
            port = 4344

            [thermometer]
            [thermometer.source]
            kind = "fake"

            [actuator]
            kind = "fake"
            "#,
        );

        settings.validate().unwrap();

        assert_eq!(settings.daemon.sleep_on_error(), Duration::from_secs(60));
        assert_eq!(settings.thermometer.similarity_queuelen, 12);
        assert!(settings.thermometer.averaging_task);
        assert!(matches!(settings.actuator, ActuatorConfig::Fake));
    }

    #[test]
    fn test_avgtime_must_cover_two_intervals() {
        let mut settings = parse(
            r#"
            [daemon]
            enabled = true
            timetable = "timetable.json"
            interval = 300

            [monitoring.logs]
            default_level = "info"

            [socket]
            host = "127.0.0.1"
            port = 4344

            [thermometer]
            avgtime = 6

            [thermometer.source]
            kind = "fake"

            [actuator]
            kind = "fake"
            "#,
        );

        // 6 minutes of window cannot cover two 300 s intervals
        assert!(settings.validate().is_err());

        settings.thermometer.avgtime = 10;
        settings.validate().unwrap();
    }

    #[test]
    fn test_script_source_configuration() {
        let settings = parse(
            r#"
            [daemon]
            enabled = true
            timetable = "timetable.json"
            interval = 30
            scale = "fahrenheit"

            [monitoring.logs]
            default_level = "info"

            [socket]
            host = "127.0.0.1"
            port = 4344

            [thermometer]
            scale = "celsius"

            [thermometer.source]
            kind = "script"
            command = "/usr/local/bin/get-temp --json"

            [actuator]
            kind = "scripts"
            switchon = ["/usr/local/bin/heating", "--on"]
            switchoff = ["/usr/local/bin/heating", "--off"]
            "#,
        );

        assert_eq!(settings.daemon.scale, DegreeScale::Fahrenheit);
        assert!(matches!(settings.thermometer.source, SourceConfig::Script { .. }));
        assert!(matches!(
            settings.actuator,
            ActuatorConfig::Scripts { status: None, .. }
        ));
    }
}
