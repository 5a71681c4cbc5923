use crate::core::error::ThermometerError;
use crate::core::unit::{DegreeScale, Degrees, celsius_to_fahrenheit};

/// Stub source reporting a constant comfortable room temperature, used to
/// run the daemon without hardware and in tests.
pub struct FakeSensor {
    scale: DegreeScale,
}

impl FakeSensor {
    pub fn new(scale: DegreeScale) -> Self {
        Self { scale }
    }

    pub async fn read(&mut self) -> Result<Degrees, ThermometerError> {
        let t = 20.0;

        Ok(match self.scale {
            DegreeScale::Celsius => Degrees(t),
            DegreeScale::Fahrenheit => Degrees(celsius_to_fahrenheit(t)),
        })
    }
}
