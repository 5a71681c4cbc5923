mod analog;
mod averaging;
mod calibration;
mod fake;
mod onewire;
mod script;
mod similarity;

pub use analog::AnalogSensor;
pub use averaging::{AveragingTask, trimmed_mean};
pub use calibration::Calibration;
pub use fake::FakeSensor;
pub use onewire::OneWireSensor;
pub use script::ScriptSensor;
pub use similarity::SimilarityChecker;

use crate::core::error::ThermometerError;
use crate::core::unit::{DegreeScale, Degrees};

/// Capability of anything that can produce a temperature reading. The
/// pipeline decorators wrap another implementation of this trait; the chain
/// is assembled once at startup.
pub trait TemperatureSource {
    fn read(&mut self) -> impl Future<Output = Result<Degrees, ThermometerError>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// A concrete temperature source plus its calibration. Calibration is a
/// property of the raw reading, so it is applied here, inside the source,
/// before any decorator sees the value.
pub struct Sensor {
    kind: SensorKind,
    calibration: Calibration,
}

pub enum SensorKind {
    Script(ScriptSensor),
    Analog(AnalogSensor),
    OneWire(OneWireSensor),
    Fake(FakeSensor),
}

impl Sensor {
    pub fn new(kind: SensorKind, calibration: Calibration) -> Self {
        Self { kind, calibration }
    }
}

impl TemperatureSource for Sensor {
    async fn read(&mut self) -> Result<Degrees, ThermometerError> {
        let raw = match &mut self.kind {
            SensorKind::Script(s) => s.read().await?,
            SensorKind::Analog(s) => s.read().await?,
            SensorKind::OneWire(s) => s.read().await?,
            SensorKind::Fake(s) => s.read().await?,
        };

        // additional decimals are meaningless on this hardware
        let calibrated = (self.calibration.apply(raw.0) * 100.0).round() / 100.0;

        Ok(Degrees(calibrated))
    }
}

/// Converts the wrapped source's degree scale to the daemon's working
/// scale; a no-op when the two match.
pub struct ScaleAdapter<S> {
    inner: S,
    from: DegreeScale,
    to: DegreeScale,
}

impl<S: TemperatureSource + Send> ScaleAdapter<S> {
    pub fn new(inner: S, from: DegreeScale, to: DegreeScale) -> Self {
        if from != to {
            tracing::debug!("Converting all temperatures from {} to {}", from, to);
        }

        Self { inner, from, to }
    }
}

impl<S: TemperatureSource + Send> TemperatureSource for ScaleAdapter<S> {
    async fn read(&mut self) -> Result<Degrees, ThermometerError> {
        let t = self.inner.read().await?;
        Ok(self.from.convert(t, self.to))
    }

    async fn close(&mut self) {
        self.inner.close().await;
    }
}

/// The assembled thermometer pipeline, built once at startup:
/// source -> scale adapter -> similarity checker -> averaging task,
/// with the last two individually switchable in configuration.
pub enum Thermometer {
    Raw(ScaleAdapter<Sensor>),
    Checked(SimilarityChecker<ScaleAdapter<Sensor>>),
    Averaged(AveragingTask),
}

impl Thermometer {
    pub async fn temperature(&mut self) -> Result<Degrees, ThermometerError> {
        match self {
            Thermometer::Raw(t) => t.read().await,
            Thermometer::Checked(t) => t.read().await,
            Thermometer::Averaged(t) => t.read().await,
        }
    }

    pub async fn close(&mut self) {
        match self {
            Thermometer::Raw(t) => t.close().await,
            Thermometer::Checked(t) => t.close().await,
            Thermometer::Averaged(t) => t.close().await,
        }
    }
}
