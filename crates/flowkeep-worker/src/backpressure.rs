//! Load-aware claim throttling: stop claiming new executions once the worker's in-flight
//! count crosses a high watermark, resume once it drops back below a low watermark. The
//! gap between the two watermarks is hysteresis, so the worker doesn't flap claim-on/off
//! every poll near the boundary.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

/// # Example
///
/// ```
/// use flowkeep_worker::backpressure::BackpressureConfig;
///
/// let config = BackpressureConfig::default()
///     .with_high_watermark(0.85)
///     .with_low_watermark(0.65);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackpressureConfig {
    /// Stop claiming once in-flight/max_concurrency exceeds this ratio.
    pub high_watermark: f64,
    /// Resume claiming once the ratio drops to or below this.
    pub low_watermark: f64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            high_watermark: 0.9,
            low_watermark: 0.7,
        }
    }
}

impl BackpressureConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_high_watermark(mut self, watermark: f64) -> Self {
        self.high_watermark = watermark.clamp(0.0, 1.0);
        self
    }

    pub fn with_low_watermark(mut self, watermark: f64) -> Self {
        self.low_watermark = watermark.clamp(0.0, 1.0);
        self
    }

    pub fn validate(&self) -> Result<(), BackpressureError> {
        if self.low_watermark >= self.high_watermark {
            return Err(BackpressureError::InvalidConfig(
                "low_watermark must be less than high_watermark".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackpressureError {
    #[error("invalid backpressure configuration: {0}")]
    InvalidConfig(String),
}

/// Tracks in-flight step count against `max_concurrency` with atomics, so `should_claim`
/// can be checked from the poll loop without locking.
pub struct BackpressureState {
    config: BackpressureConfig,
    current_load: AtomicUsize,
    max_concurrency: usize,
    accepting: AtomicBool,
}

impl BackpressureState {
    pub fn new(config: BackpressureConfig, max_concurrency: usize) -> Self {
        Self {
            config,
            current_load: AtomicUsize::new(0),
            max_concurrency,
            accepting: AtomicBool::new(true),
        }
    }

    pub fn should_claim(&self) -> bool {
        let load_ratio = self.load_ratio();
        if self.accepting.load(Ordering::Relaxed) {
            if load_ratio >= self.config.high_watermark {
                self.accepting.store(false, Ordering::Relaxed);
                return false;
            }
            true
        } else if load_ratio <= self.config.low_watermark {
            self.accepting.store(true, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn load_ratio(&self) -> f64 {
        self.current_load.load(Ordering::Relaxed) as f64 / self.max_concurrency.max(1) as f64
    }

    pub fn available_slots(&self) -> usize {
        self.max_concurrency
            .saturating_sub(self.current_load.load(Ordering::Relaxed))
    }

    pub fn step_started(&self) {
        self.current_load.fetch_add(1, Ordering::Relaxed);
    }

    pub fn step_finished(&self) {
        self.current_load.fetch_sub(1, Ordering::Relaxed);
    }
}
