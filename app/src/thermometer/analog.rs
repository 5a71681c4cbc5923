use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

use crate::core::error::{ConfigError, ThermometerError};
use crate::core::unit::Degrees;

// Voltage divider on the analog board reference input, in millivolt.
const VREF: f64 = (3.32 / (3.32 + 7.5)) * 3.3 * 1000.0;

// Best SPI clock found for TMP36 probes behind an MCP3008 converter.
const SPI_CLOCK_HZ: u32 = 15_200;

/// Temperature source reading TMP36 probes through an MCP3008 A/D
/// converter on the SPI bus. With more than one channel the reading is the
/// mean of all probes, guarded by a maximum standard deviation so a broken
/// probe surfaces as an error instead of skewing the result.
pub struct AnalogSensor {
    spi: Spi,
    channels: Vec<u8>,
    stddev: f64,
}

impl AnalogSensor {
    pub fn new(channels: Vec<u8>, stddev: f64) -> Result<Self, ConfigError> {
        if channels.is_empty() {
            return Err(ConfigError("missing input channels for the analog thermometer".to_owned()));
        }

        if let Some(c) = channels.iter().find(|c| **c > 7) {
            return Err(ConfigError(format!(
                "analog input channels must be in range 0-7, {c} given"
            )));
        }

        if stddev <= 0.0 {
            return Err(ConfigError("the analog stddev bound must be positive".to_owned()));
        }

        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, SPI_CLOCK_HZ, Mode::Mode0)
            .map_err(|e| ConfigError(format!("cannot open SPI device for the analog thermometer: {e}")))?;

        tracing::debug!("A/D converter initialized with channels {:?}", channels);

        Ok(Self { spi, channels, stddev })
    }

    fn read_channel(&mut self, channel: u8) -> Result<f64, ThermometerError> {
        let write = [1u8, (8 + channel) << 4, 0];
        let mut read = [0u8; 3];

        self.spi
            .transfer(&mut read, &write)
            .map_err(|e| ThermometerError::with_sub("cannot read from the A/D converter", e.to_string()))?;

        let data = (((read[1] & 3) as u16) << 8) + read[2] as u16;
        let value = data as f64 / 1023.0;

        // TMP36: 500 mV offset, 10 mV per degree
        Ok(((value * VREF) - 500.0) / 10.0)
    }

    pub async fn read(&mut self) -> Result<Degrees, ThermometerError> {
        let mut temperatures = Vec::with_capacity(self.channels.len());
        for channel in self.channels.clone() {
            temperatures.push(self.read_channel(channel)?);
        }

        let raw = checked_mean(&temperatures, self.stddev).ok_or_else(|| {
            ThermometerError::with_sub(
                "the analog probes disagree, one of them is probably broken",
                format!("temperatures {temperatures:?} exceed the allowed standard deviation {}", self.stddev),
            )
        })?;

        Ok(Degrees((raw * 10000.0).round() / 10000.0))
    }
}

/// Mean of `values` when their population standard deviation stays within
/// `bound`, `None` otherwise (or when there are no values at all).
pub(super) fn checked_mean(values: &[f64], bound: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let stddev = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();

    if stddev <= bound { Some(mean) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_mean_within_bound() {
        assert_eq!(checked_mean(&[20.0, 20.0, 20.0], 2.0), Some(20.0));
        assert_eq!(checked_mean(&[19.0, 21.0], 2.0), Some(20.0));
    }

    #[test]
    fn test_checked_mean_rejects_disagreeing_probes() {
        // one probe reads way off: pstdev of [20, 20, 32] is ~5.66
        assert_eq!(checked_mean(&[20.0, 20.0, 32.0], 2.0), None);
    }

    #[test]
    fn test_checked_mean_empty_is_none() {
        assert_eq!(checked_mean(&[], 2.0), None);
    }

    #[test]
    fn test_rejects_invalid_channel_configuration() {
        assert!(AnalogSensor::new(vec![], 2.0).is_err());
        assert!(AnalogSensor::new(vec![9], 2.0).is_err());
        assert!(AnalogSensor::new(vec![0, 1], 0.0).is_err());
    }
}
