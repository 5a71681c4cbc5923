mod fake;
mod gpio;
mod script;

pub use fake::FakeActuator;
pub use gpio::GpioActuator;
pub use script::ScriptActuator;

use crate::core::error::HeatingError;

/// The switchable heating (or cooling) device driven by the control cycle.
///
/// Between a successful switch call and the next one, `is_on` reflects the
/// last commanded state; a failed switch leaves it unchanged and raises a
/// [`HeatingError`].
pub enum Actuator {
    Script(ScriptActuator),
    Gpio(GpioActuator),
    Fake(FakeActuator),
}

impl Actuator {
    /// Bring the actuator to a known state at daemon startup: query the
    /// hardware where possible, otherwise force it off.
    pub async fn init(&mut self) -> Result<(), HeatingError> {
        match self {
            Actuator::Script(a) => a.init().await,
            Actuator::Gpio(_) | Actuator::Fake(_) => Ok(()),
        }
    }

    pub async fn switch_on(&mut self) -> Result<(), HeatingError> {
        match self {
            Actuator::Script(a) => a.switch_on().await,
            Actuator::Gpio(a) => a.switch_on(),
            Actuator::Fake(a) => a.switch_on(),
        }
    }

    pub async fn switch_off(&mut self) -> Result<(), HeatingError> {
        match self {
            Actuator::Script(a) => a.switch_off().await,
            Actuator::Gpio(a) => a.switch_off(),
            Actuator::Fake(a) => a.switch_off(),
        }
    }

    /// The current status as reported by the hardware (or the cached state
    /// when the hardware cannot be queried): `true` = on.
    pub async fn status(&mut self) -> Result<bool, HeatingError> {
        match self {
            Actuator::Script(a) => a.status().await,
            Actuator::Gpio(a) => a.status(),
            Actuator::Fake(a) => a.status(),
        }
    }

    /// The last commanded state, without touching the hardware.
    pub fn is_on(&self) -> bool {
        match self {
            Actuator::Script(a) => a.is_on(),
            Actuator::Gpio(a) => a.is_on(),
            Actuator::Fake(a) => a.is_on(),
        }
    }

    pub async fn close(&mut self) {}
}
