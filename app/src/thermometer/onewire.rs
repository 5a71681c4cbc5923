use std::path::PathBuf;

use crate::core::error::{ConfigError, ThermometerError};
use crate::core::unit::Degrees;

use super::analog::checked_mean;

/// Temperature source reading DS18B20-style 1-Wire probes through their
/// `w1_slave` device files. Probes that are not ready are skipped with a
/// warning; the remaining readings must agree within the configured
/// standard deviation and are averaged.
pub struct OneWireSensor {
    devices: Vec<PathBuf>,
    stddev: f64,
}

impl OneWireSensor {
    /// `devices` are either bare 1-Wire device ids (resolved under
    /// `/sys/bus/w1/devices`) or full paths to `w1_slave` files.
    pub fn new(devices: Vec<String>, stddev: f64) -> Result<Self, ConfigError> {
        if devices.is_empty() {
            return Err(ConfigError("missing 1-Wire devices to read the temperature from".to_owned()));
        }

        if stddev <= 0.0 {
            return Err(ConfigError("the 1-Wire stddev bound must be positive".to_owned()));
        }

        let devices = devices
            .into_iter()
            .map(|dev| {
                if dev.starts_with('/') {
                    PathBuf::from(dev)
                } else {
                    PathBuf::from(format!("/sys/bus/w1/devices/{dev}/w1_slave"))
                }
            })
            .collect::<Vec<_>>();

        tracing::debug!("1-Wire thermometer initialized with devices {:?}", devices);

        Ok(Self { devices, stddev })
    }

    pub async fn read(&mut self) -> Result<Degrees, ThermometerError> {
        let mut temperatures = Vec::with_capacity(self.devices.len());

        for dev in &self.devices {
            match tokio::fs::read_to_string(dev).await {
                Ok(data) => match parse_w1_slave(&data) {
                    Some(t) => temperatures.push(t),
                    None => tracing::warn!("1-Wire device {} not ready, keep going without it", dev.display()),
                },
                Err(e) => {
                    tracing::warn!("Cannot access 1-Wire device {}: {}", dev.display(), e);
                }
            }
        }

        if temperatures.is_empty() {
            return Err(ThermometerError::new(
                "no temperature retrieved, probably all 1-Wire devices are not ready or unavailable",
            ));
        }

        let raw = checked_mean(&temperatures, self.stddev).ok_or_else(|| {
            ThermometerError::with_sub(
                "the 1-Wire probes disagree, one of them is probably broken",
                format!("temperatures {temperatures:?} exceed the allowed standard deviation {}", self.stddev),
            )
        })?;

        Ok(Degrees(raw))
    }
}

/// Parse the two-line `w1_slave` protocol: a CRC line ending in `YES`
/// followed by a payload line with `t=<millidegrees>`.
fn parse_w1_slave(data: &str) -> Option<f64> {
    let mut lines = data.lines();

    let crc = lines.next()?;
    if !crc.trim_end().ends_with("YES") {
        return None;
    }

    let payload = lines.next()?;
    let (_, millidegrees) = payload.split_once("t=")?;

    millidegrees.trim().parse::<f64>().ok().map(|t| t / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const READY: &str = "6e 01 4b 46 7f ff 02 10 71 : crc=71 YES\n6e 01 4b 46 7f ff 02 10 71 t=22875\n";
    const NOT_READY: &str = "6e 01 4b 46 7f ff 02 10 71 : crc=71 NO\n6e 01 4b 46 7f ff 02 10 71 t=22875\n";

    fn write_device(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("hearth-w1-{}-{}", name, std::process::id()));
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "{content}").unwrap();
        path
    }

    #[test]
    fn test_parse_w1_slave_protocol() {
        assert_eq!(parse_w1_slave(READY), Some(22.875));
        assert_eq!(parse_w1_slave(NOT_READY), None);
        assert_eq!(parse_w1_slave("garbage"), None);
    }

    #[tokio::test]
    async fn test_reads_and_averages_devices() {
        let a = write_device("a", READY);
        let b = write_device("b", "ok YES\nt=23125\n");

        let mut sensor = OneWireSensor::new(vec![a.display().to_string(), b.display().to_string()], 2.0).unwrap();

        let t = sensor.read().await.unwrap();
        assert!((t.0 - 23.0).abs() < 1e-9);

        std::fs::remove_file(&a).ok();
        std::fs::remove_file(&b).ok();
    }

    #[tokio::test]
    async fn test_not_ready_devices_are_skipped() {
        let a = write_device("skip-a", READY);
        let b = write_device("skip-b", NOT_READY);

        let mut sensor = OneWireSensor::new(vec![a.display().to_string(), b.display().to_string()], 2.0).unwrap();

        assert_eq!(sensor.read().await.unwrap(), Degrees(22.875));

        std::fs::remove_file(&a).ok();
        std::fs::remove_file(&b).ok();
    }

    #[tokio::test]
    async fn test_all_devices_unavailable_is_an_error() {
        let mut sensor = OneWireSensor::new(vec!["/no/such/device".to_owned()], 2.0).unwrap();
        assert!(sensor.read().await.is_err());
    }

    #[test]
    fn test_bare_ids_resolve_under_sysfs() {
        let sensor = OneWireSensor::new(vec!["28-0000075a2b1c".to_owned()], 2.0).unwrap();
        assert_eq!(
            sensor.devices[0],
            PathBuf::from("/sys/bus/w1/devices/28-0000075a2b1c/w1_slave")
        );
    }
}
