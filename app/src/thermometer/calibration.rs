use crate::core::error::ConfigError;

/// Piecewise-linear transform mapping raw thermometer readings onto
/// reference temperatures. Between two adjacent calibration points the
/// value is interpolated; beyond the first or last point it is extrapolated
/// along the nearest segment. With no points the transform is the identity,
/// which is also the mode used while collecting raw data for a future
/// calibration.
#[derive(Debug, Clone, Default)]
pub struct Calibration {
    /// (raw, reference) pairs, sorted by raw value.
    points: Vec<(f64, f64)>,
}

impl Calibration {
    pub fn identity() -> Self {
        Self::default()
    }

    /// Build a calibration from the two configured sequences. Both must
    /// have the same length and at least two entries; an empty `t_raw`
    /// yields the identity.
    pub fn from_points(t_raw: &[f64], t_ref: &[f64]) -> Result<Self, ConfigError> {
        if t_raw.is_empty() {
            return Ok(Self::identity());
        }

        if t_raw.len() != t_ref.len() {
            return Err(ConfigError(
                "calibration lists t_raw and t_ref have a different number of elements".to_owned(),
            ));
        }

        if t_raw.len() < 2 {
            return Err(ConfigError(
                "calibration requires at least 2 reference points".to_owned(),
            ));
        }

        let mut points: Vec<(f64, f64)> = t_raw.iter().copied().zip(t_ref.iter().copied()).collect();

        if points.iter().any(|(raw, reference)| !raw.is_finite() || !reference.is_finite()) {
            return Err(ConfigError("calibration points must be finite numbers".to_owned()));
        }

        points.sort_by(|a, b| a.0.total_cmp(&b.0));

        if points.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(ConfigError("calibration t_raw values must be distinct".to_owned()));
        }

        Ok(Self { points })
    }

    pub fn apply(&self, raw: f64) -> f64 {
        if self.points.is_empty() {
            return raw;
        }

        let segment = self
            .points
            .windows(2)
            .find(|w| raw <= w[1].0)
            .unwrap_or_else(|| &self.points[self.points.len() - 2..]);

        let (x0, y0) = segment[0];
        let (x1, y1) = segment[1];

        y0 + (raw - x0) * (y1 - y0) / (x1 - x0)
    }
}
