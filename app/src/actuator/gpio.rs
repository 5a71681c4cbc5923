use rppal::gpio::{Gpio, Level, OutputPin};

use crate::core::error::HeatingError;

/// Actuator driving one or more relays connected to BCM GPIO pins. The
/// configured trigger level is the level that switches the relays on; all
/// pins are driven together and must read back the same state.
pub struct GpioActuator {
    pins: Vec<OutputPin>,
    on_level: Level,
    cached_on: bool,
}

impl GpioActuator {
    pub fn new(pin_numbers: &[u8], switch_on_high: bool) -> Result<Self, HeatingError> {
        if pin_numbers.is_empty() {
            return Err(HeatingError::new("no GPIO pins provided for the relay actuator"));
        }

        if let Some(p) = pin_numbers.iter().find(|p| **p > 27) {
            return Err(HeatingError::new(format!(
                "GPIO pin numbers must be in range 0-27, {p} given"
            )));
        }

        let gpio = Gpio::new().map_err(|e| HeatingError::with_sub("cannot access the GPIO controller", e.to_string()))?;

        let on_level = if switch_on_high { Level::High } else { Level::Low };

        let mut pins = Vec::with_capacity(pin_numbers.len());
        for number in pin_numbers {
            let pin = gpio
                .get(*number)
                .map_err(|e| HeatingError::with_sub(format!("cannot claim GPIO pin {number}"), e.to_string()))?;

            // claim each pin already driven to the off level
            let pin = match on_level {
                Level::High => pin.into_output_low(),
                Level::Low => pin.into_output_high(),
            };

            pins.push(pin);
        }

        tracing::debug!("Relay actuator initialized on GPIO pins {:?}, off", pin_numbers);

        Ok(Self {
            pins,
            on_level,
            cached_on: false,
        })
    }

    fn drive(&mut self, level: Level) {
        for pin in &mut self.pins {
            pin.write(level);
        }
    }

    pub fn switch_on(&mut self) -> Result<(), HeatingError> {
        self.drive(self.on_level);
        self.cached_on = true;
        Ok(())
    }

    pub fn switch_off(&mut self) -> Result<(), HeatingError> {
        let off_level = match self.on_level {
            Level::High => Level::Low,
            Level::Low => Level::High,
        };
        self.drive(off_level);
        self.cached_on = false;
        Ok(())
    }

    /// Read the state back from the pins; they must all agree.
    pub fn status(&mut self) -> Result<bool, HeatingError> {
        let on_is_high = self.on_level == Level::High;

        let mut states = self.pins.iter().map(|pin| pin.is_set_high() == on_is_high);

        let first = states
            .next()
            .ok_or_else(|| HeatingError::new("no GPIO pins available"))?;

        if states.any(|s| s != first) {
            return Err(HeatingError::with_sub(
                "the relay pins report an inconsistent state",
                "some relays are on and some are off, the hardware needs attention",
            ));
        }

        self.cached_on = first;
        Ok(first)
    }

    pub fn is_on(&self) -> bool {
        self.cached_on
    }
}
