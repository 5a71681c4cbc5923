use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::core::error::ThermometerError;
use crate::core::unit::Degrees;

use super::TemperatureSource;

type SampleRing = VecDeque<(Instant, f64)>;

/// Smooths a noisy source by sampling it in the background and answering
/// reads with a trimmed mean over a sliding window.
///
/// The background worker owns the wrapped source exclusively and appends a
/// timestamped sample every `sample_interval`; reads only look at the ring.
/// Source errors are logged and sampling continues; a crashed worker is
/// respawned with exponential backoff.
pub struct AveragingTask {
    samples: Arc<Mutex<SampleRing>>,
    window: Duration,
    skip: f64,
    worker: JoinHandle<()>,
}

impl AveragingTask {
    pub fn spawn<S>(source: S, sample_interval: Duration, window: Duration, skip: f64, max_backoff: Duration) -> Self
    where
        S: TemperatureSource + Send + 'static,
    {
        let samples: Arc<Mutex<SampleRing>> = Arc::new(Mutex::new(VecDeque::new()));

        let worker = tokio::spawn(supervise(
            source,
            samples.clone(),
            sample_interval,
            window,
            max_backoff,
        ));

        Self {
            samples,
            window,
            skip,
            worker,
        }
    }

    pub async fn read(&mut self) -> Result<Degrees, ThermometerError> {
        let values: Vec<f64> = {
            let mut samples = lock_ring(&self.samples);
            trim_window(&mut samples, Instant::now(), self.window);
            samples.iter().map(|(_, v)| *v).collect()
        };

        trimmed_mean(values, self.skip)
            .map(Degrees)
            .ok_or_else(|| ThermometerError::new("no samples yet"))
    }

    pub async fn close(&mut self) {
        tracing::debug!("Stopping the temperature sampling task");
        self.worker.abort();
    }
}

impl Drop for AveragingTask {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

fn lock_ring(samples: &Mutex<SampleRing>) -> MutexGuard<'_, SampleRing> {
    samples.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn trim_window(samples: &mut SampleRing, now: Instant, window: Duration) {
    while let Some((taken, _)) = samples.front() {
        if now.duration_since(*taken) > window {
            samples.pop_front();
        } else {
            break;
        }
    }
}

/// Mean of `values` after discarding the lowest and highest `skip / 2`
/// fraction, each rounded down so at least one value always remains.
/// `None` when there are no values at all.
pub fn trimmed_mean(mut values: Vec<f64>, skip: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    values.sort_by(f64::total_cmp);

    let cut = (values.len() as f64 * skip / 2.0).floor() as usize;
    let kept = if values.len() > 2 * cut {
        &values[cut..values.len() - cut]
    } else {
        &values[..]
    };

    Some(kept.iter().sum::<f64>() / kept.len() as f64)
}

async fn supervise<S>(
    mut source: S,
    samples: Arc<Mutex<SampleRing>>,
    sample_interval: Duration,
    window: Duration,
    max_backoff: Duration,
) where
    S: TemperatureSource + Send + 'static,
{
    let mut backoff = Duration::from_secs(1);

    loop {
        let run = std::panic::AssertUnwindSafe(sample_loop(&mut source, &samples, sample_interval, window));

        if run.catch_unwind().await.is_err() {
            tracing::error!(
                "The temperature sampling task crashed, restarting in {}s",
                backoff.as_secs()
            );
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(max_backoff);
        }
    }
}

async fn sample_loop<S: TemperatureSource + Send>(
    source: &mut S,
    samples: &Mutex<SampleRing>,
    sample_interval: Duration,
    window: Duration,
) {
    tracing::debug!("Starting the temperature sampling task");

    loop {
        match source.read().await {
            Ok(t) => {
                let now = Instant::now();
                let mut samples = lock_ring(samples);
                samples.push_back((now, t.0));
                trim_window(&mut samples, now, window);
            }
            Err(e) => tracing::warn!("Error reading the temperature in the sampling task: {}", e),
        }

        tokio::time::sleep(sample_interval).await;
    }
}
