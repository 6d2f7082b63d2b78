//! Sliding-window error-rate monitor with alert levels and trend (spec
//! §4.9).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
  Normal,
  Warning,
  Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
  Increasing,
  Decreasing,
  Stable,
}

#[derive(Debug, Clone, Copy)]
pub struct Metrics {
  pub total: usize,
  pub failed: usize,
  pub error_rate: f64,
  pub success_rate: f64,
}

#[derive(Debug, Clone)]
pub struct ErrorRateMonitorConfig {
  pub window_duration: Duration,
  pub minimum_samples: usize,
  pub alert_threshold: f64,
  pub critical_threshold: f64,
}

impl Default for ErrorRateMonitorConfig {
  fn default() -> Self {
    Self {
      window_duration: Duration::from_secs(60),
      minimum_samples: 10,
      alert_threshold: 0.2,
      critical_threshold: 0.5,
    }
  }
}

#[derive(Clone, Copy)]
struct Sample {
  timestamp: Instant,
  failed: bool,
}

struct Inner {
  samples: VecDeque<Sample>,
  last_alert_level: AlertLevel,
}

pub type AlertCallback = Arc<dyn Fn(AlertLevel, AlertLevel) + Send + Sync>;

pub struct ErrorRateMonitor {
  config: ErrorRateMonitorConfig,
  inner: Mutex<Inner>,
  alert_callbacks: Mutex<Vec<AlertCallback>>,
}

impl ErrorRateMonitor {
  pub fn new(config: ErrorRateMonitorConfig) -> Self {
    Self {
      config,
      inner: Mutex::new(Inner {
        samples: VecDeque::new(),
        last_alert_level: AlertLevel::Normal,
      }),
      alert_callbacks: Mutex::new(Vec::new()),
    }
  }

  pub fn on_alert(&self, callback: AlertCallback) {
    self.alert_callbacks.lock().push(callback);
  }

  pub fn record_success(&self) {
    self.record(false);
  }

  pub fn record_failure(&self) {
    self.record(true);
  }

  fn record(&self, failed: bool) {
    let mut inner = self.inner.lock();
    let now = Instant::now();
    inner.samples.push_back(Sample {
      timestamp: now,
      failed,
    });
    self.prune(&mut inner, now);

    let level = self.alert_level_locked(&inner);
    if level != inner.last_alert_level {
      let from = inner.last_alert_level;
      inner.last_alert_level = level;
      let callbacks = self.alert_callbacks.lock().clone();
      for cb in callbacks {
        cb(from, level);
      }
    }
  }

  fn prune(&self, inner: &mut Inner, now: Instant) {
    while let Some(front) = inner.samples.front() {
      if now.duration_since(front.timestamp) > self.config.window_duration {
        inner.samples.pop_front();
      } else {
        break;
      }
    }
  }

  pub fn metrics(&self) -> Metrics {
    let mut inner = self.inner.lock();
    let now = Instant::now();
    self.prune(&mut inner, now);
    self.metrics_locked(&inner)
  }

  fn metrics_locked(&self, inner: &Inner) -> Metrics {
    let total = inner.samples.len();
    let failed = inner.samples.iter().filter(|s| s.failed).count();
    let error_rate = if total > 0 {
      failed as f64 / total as f64
    } else {
      0.0
    };
    Metrics {
      total,
      failed,
      error_rate,
      success_rate: 1.0 - error_rate,
    }
  }

  pub fn alert_level(&self) -> AlertLevel {
    let mut inner = self.inner.lock();
    let now = Instant::now();
    self.prune(&mut inner, now);
    self.alert_level_locked(&inner)
  }

  fn alert_level_locked(&self, inner: &Inner) -> AlertLevel {
    let metrics = self.metrics_locked(inner);
    if metrics.total < self.config.minimum_samples {
      return AlertLevel::Normal;
    }
    if metrics.error_rate >= self.config.critical_threshold {
      AlertLevel::Critical
    } else if metrics.error_rate >= self.config.alert_threshold {
      AlertLevel::Warning
    } else {
      AlertLevel::Normal
    }
  }

  /// Splits the window in half by index; requires at least 20 samples
  /// (spec §4.9).
  pub fn trend(&self) -> Trend {
    let mut inner = self.inner.lock();
    let now = Instant::now();
    self.prune(&mut inner, now);
    if inner.samples.len() < 20 {
      return Trend::Stable;
    }
    let mid = inner.samples.len() / 2;
    let (first, second) = inner.samples.make_contiguous().split_at(mid);
    let rate = |samples: &[Sample]| {
      if samples.is_empty() {
        0.0
      } else {
        samples.iter().filter(|s| s.failed).count() as f64 / samples.len() as f64
      }
    };
    let delta = rate(second) - rate(first);
    if delta > 0.05 {
      Trend::Increasing
    } else if delta < -0.05 {
      Trend::Decreasing
    } else {
      Trend::Stable
    }
  }
}

/// Process-wide registry; `aggregate()` sums counts across every
/// registered monitor.
#[derive(Default)]
pub struct ErrorRateMonitorRegistry {
  monitors: DashMap<String, Arc<ErrorRateMonitor>>,
}

impl ErrorRateMonitorRegistry {
  pub fn new() -> Self {
    Self {
      monitors: DashMap::new(),
    }
  }

  pub fn get_or_insert(
    &self,
    name: &str,
    config: impl FnOnce() -> ErrorRateMonitorConfig,
  ) -> Arc<ErrorRateMonitor> {
    self
      .monitors
      .entry(name.to_string())
      .or_insert_with(|| Arc::new(ErrorRateMonitor::new(config())))
      .clone()
  }

  pub fn aggregate(&self) -> Metrics {
    let mut total = 0;
    let mut failed = 0;
    for entry in self.monitors.iter() {
      let m = entry.value().metrics();
      total += m.total;
      failed += m.failed;
    }
    let error_rate = if total > 0 {
      failed as f64 / total as f64
    } else {
      0.0
    };
    Metrics {
      total,
      failed,
      error_rate,
      success_rate: 1.0 - error_rate,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn normal_below_minimum_samples() {
    let monitor = ErrorRateMonitor::new(ErrorRateMonitorConfig {
      minimum_samples: 10,
      ..Default::default()
    });
    for _ in 0..5 {
      monitor.record_failure();
    }
    assert_eq!(monitor.alert_level(), AlertLevel::Normal);
  }

  #[test]
  fn critical_above_threshold() {
    let monitor = ErrorRateMonitor::new(ErrorRateMonitorConfig {
      minimum_samples: 4,
      critical_threshold: 0.5,
      alert_threshold: 0.2,
      ..Default::default()
    });
    for _ in 0..4 {
      monitor.record_failure();
    }
    assert_eq!(monitor.alert_level(), AlertLevel::Critical);
  }

  #[test]
  fn registry_aggregates_across_monitors() {
    let registry = ErrorRateMonitorRegistry::new();
    let a = registry.get_or_insert("a", ErrorRateMonitorConfig::default);
    let b = registry.get_or_insert("b", ErrorRateMonitorConfig::default);
    a.record_failure();
    b.record_success();
    let agg = registry.aggregate();
    assert_eq!(agg.total, 2);
    assert_eq!(agg.failed, 1);
  }
}
