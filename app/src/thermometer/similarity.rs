use std::collections::VecDeque;

use crate::core::error::ThermometerError;
use crate::core::unit::Degrees;

use super::TemperatureSource;

/// Rejects readings that are too far from the recent history, so a single
/// hardware glitch does not reach the control decision.
///
/// A bounded queue keeps the last accepted readings; a new reading is
/// accepted when it lies within `delta` of the queue's median. The very
/// first reading is always accepted, and rejected readings leave the queue
/// unchanged.
pub struct SimilarityChecker<S> {
    inner: S,
    history: VecDeque<f64>,
    capacity: usize,
    delta: f64,
}

impl<S: TemperatureSource + Send> SimilarityChecker<S> {
    pub fn new(inner: S, capacity: usize, delta: f64) -> Self {
        tracing::debug!("Similarity queue size is {}, maximum allowed delta is {} degrees", capacity, delta);

        Self {
            inner,
            history: VecDeque::with_capacity(capacity),
            capacity,
            delta,
        }
    }

    fn accept(&mut self, value: f64) {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(value);
    }
}

impl<S: TemperatureSource + Send> TemperatureSource for SimilarityChecker<S> {
    async fn read(&mut self) -> Result<Degrees, ThermometerError> {
        let reading = self.inner.read().await?;

        let Some(median) = median(self.history.iter().copied()) else {
            self.accept(reading.0);
            return Ok(reading);
        };

        let distance = (reading.0 - median).abs();

        if distance > self.delta {
            return Err(ThermometerError::with_sub(
                format!(
                    "the just read temperature ({reading}) has been ignored because it is more than \
                     {} degrees away from the median of the previous temperatures ({median:.2})",
                    self.delta
                ),
                "this is probably a hardware fault",
            ));
        }

        self.accept(reading.0);
        Ok(reading)
    }

    async fn close(&mut self) {
        self.inner.close().await;
    }
}

fn median(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut sorted: Vec<f64> = values.collect();
    if sorted.is_empty() {
        return None;
    }

    sorted.sort_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}
