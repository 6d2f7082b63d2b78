//! Periodic probe with adaptive interval and loss accounting (spec §4.10).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
  Idle,
  Active,
  Warning,
  Timeout,
}

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatStatistics {
  pub sent: u64,
  pub received: u64,
  pub lost: u64,
  pub loss_rate: f64,
  pub avg_latency: Duration,
  pub last_received_at: Option<Instant>,
  pub state: HeartbeatState,
}

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
  pub interval: Duration,
  pub timeout: Duration,
  pub max_lost_count: u32,
  pub adaptive: bool,
  pub min_interval: Duration,
  pub max_interval: Duration,
}

impl Default for HeartbeatConfig {
  fn default() -> Self {
    Self {
      interval: Duration::from_secs(15),
      timeout: Duration::from_secs(5),
      max_lost_count: 3,
      adaptive: true,
      min_interval: Duration::from_secs(5),
      max_interval: Duration::from_secs(60),
    }
  }
}

/// The transport-facing half of the heartbeat contract: hands probe bytes
/// to the connection. A failed send is treated as a lost heartbeat.
#[async_trait]
pub trait HeartbeatTransport: Send + Sync {
  async fn send_probe(&self, probe: Vec<u8>) -> Result<(), String>;
}

struct Shared {
  current_interval: Duration,
  consecutive_lost: u32,
  total_lost: u64,
  sent: u64,
  received: u64,
  last_sent_at: Option<Instant>,
  last_received_at: Option<Instant>,
  avg_latency: Duration,
  state: HeartbeatState,
}

/// Single-writer actor: owned exclusively by one connection, started on
/// `Connected`, stopped on `Disconnecting`.
pub struct HeartbeatManager {
  config: HeartbeatConfig,
  shared: Arc<Mutex<Shared>>,
  restart_timer: Arc<Notify>,
  running: Arc<AtomicBool>,
  task: Mutex<Option<JoinHandle<()>>>,
  timeout_callback: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl HeartbeatManager {
  pub fn new(config: HeartbeatConfig) -> Self {
    let interval = config.interval;
    Self {
      config,
      shared: Arc::new(Mutex::new(Shared {
        current_interval: interval,
        consecutive_lost: 0,
        total_lost: 0,
        sent: 0,
        received: 0,
        last_sent_at: None,
        last_received_at: None,
        avg_latency: Duration::ZERO,
        state: HeartbeatState::Idle,
      })),
      restart_timer: Arc::new(Notify::new()),
      running: Arc::new(AtomicBool::new(false)),
      task: Mutex::new(None),
      timeout_callback: Mutex::new(None),
    }
  }

  pub fn on_timeout(&self, callback: Arc<dyn Fn() + Send + Sync>) {
    *self.timeout_callback.lock() = Some(callback);
  }

  pub fn statistics(&self) -> HeartbeatStatistics {
    let s = self.shared.lock();
    let loss_rate = if s.sent > 0 {
      s.total_lost as f64 / s.sent as f64
    } else {
      0.0
    };
    HeartbeatStatistics {
      sent: s.sent,
      received: s.received,
      lost: s.total_lost,
      loss_rate,
      avg_latency: s.avg_latency,
      last_received_at: s.last_received_at,
      state: s.state,
    }
  }

  pub fn start(&self, transport: Arc<dyn HeartbeatTransport>) {
    if self.running.swap(true, Ordering::SeqCst) {
      return;
    }
    self.shared.lock().state = HeartbeatState::Active;

    let config = self.config.clone();
    let shared = self.shared.clone();
    let restart_timer = self.restart_timer.clone();
    let running = self.running.clone();
    let timeout_callback = self.timeout_callback.lock().clone();

    let handle = tokio::spawn(async move {
      while running.load(Ordering::SeqCst) {
        let interval = shared.lock().current_interval;
        tokio::select! {
          _ = tokio::time::sleep(interval) => {}
          _ = restart_timer.notified() => { continue; }
        }
        if !running.load(Ordering::SeqCst) {
          break;
        }

        let mut lost_this_tick = false;
        {
          let mut s = shared.lock();
          if let Some(last_received) = s.last_received_at {
            if last_received.elapsed() >= config.timeout {
              s.consecutive_lost += 1;
              s.total_lost += 1;
              lost_this_tick = true;
            }
          } else if s.sent > 0 {
            // Never received anything and we've already sent probes.
            s.consecutive_lost += 1;
            s.total_lost += 1;
            lost_this_tick = true;
          }
        }

        let probe = build_probe();
        shared.lock().last_sent_at = Some(Instant::now());
        let send_result = transport.send_probe(probe).await;
        match send_result {
          Ok(()) => {
            shared.lock().sent += 1;
          }
          Err(_) => {
            let mut s = shared.lock();
            s.consecutive_lost += 1;
            s.total_lost += 1;
            lost_this_tick = true;
          }
        }

        let mut s = shared.lock();
        if s.consecutive_lost >= config.max_lost_count {
          if s.state != HeartbeatState::Timeout {
            s.state = HeartbeatState::Timeout;
            drop(s);
            if let Some(cb) = &timeout_callback {
              cb();
            }
          }
        } else if lost_this_tick {
          s.state = HeartbeatState::Warning;
        }
      }
    });

    *self.task.lock() = Some(handle);
  }

  pub fn stop(&self) {
    self.running.store(false, Ordering::SeqCst);
    self.restart_timer.notify_waiters();
    if let Some(handle) = self.task.lock().take() {
      handle.abort();
    }
    self.shared.lock().state = HeartbeatState::Idle;
  }

  /// Records a successful probe response: computes latency, resets the
  /// loss streak, adapts the interval if configured, and restarts the
  /// timer with the new interval.
  pub fn record_response(&self) {
    let mut s = self.shared.lock();
    let now = Instant::now();
    let latency = s
      .last_sent_at
      .map(|sent| now.saturating_duration_since(sent))
      .unwrap_or(Duration::ZERO);

    s.received += 1;
    s.last_received_at = Some(now);
    s.consecutive_lost = 0;
    // Simple exponential moving average, matching the "avg_latency"
    // accounting the adaptive-interval rule reads from.
    s.avg_latency = if s.avg_latency.is_zero() {
      latency
    } else {
      (s.avg_latency + latency) / 2
    };

    if matches!(s.state, HeartbeatState::Warning | HeartbeatState::Timeout) {
      s.state = HeartbeatState::Active;
    }

    if self.config.adaptive {
      if s.avg_latency < Duration::from_millis(100) {
        let target = (s.current_interval.mul_f64(0.9)).max(self.config.min_interval);
        s.current_interval = target;
      } else if s.avg_latency > Duration::from_millis(500) {
        let target = (s.current_interval.mul_f64(1.1)).min(self.config.max_interval);
        s.current_interval = target;
      }
    }
    drop(s);
    self.restart_timer.notify_waiters();
  }
}

impl Drop for HeartbeatManager {
  fn drop(&mut self) {
    self.stop();
  }
}

fn build_probe() -> Vec<u8> {
  let mut probe = b"HEARTBEAT".to_vec();
  let timestamp = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs_f64();
  probe.extend_from_slice(&timestamp.to_be_bytes());
  probe
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicU32;

  struct CountingTransport {
    calls: Arc<AtomicU32>,
  }

  #[async_trait]
  impl HeartbeatTransport for CountingTransport {
    async fn send_probe(&self, _probe: Vec<u8>) -> Result<(), String> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }
  }

  #[tokio::test]
  async fn successive_responses_keep_state_active() {
    let manager = HeartbeatManager::new(HeartbeatConfig {
      interval: Duration::from_millis(10),
      timeout: Duration::from_millis(50),
      max_lost_count: 3,
      adaptive: false,
      ..HeartbeatConfig::default()
    });
    let calls = Arc::new(AtomicU32::new(0));
    manager.start(Arc::new(CountingTransport { calls: calls.clone() }));

    for _ in 0..5 {
      tokio::time::sleep(Duration::from_millis(15)).await;
      manager.record_response();
    }

    let stats = manager.statistics();
    assert_eq!(stats.state, HeartbeatState::Active);
    assert_eq!(stats.lost, 0);
    manager.stop();
  }

  #[test]
  fn probe_bytes_start_with_heartbeat_tag() {
    let probe = build_probe();
    assert!(probe.starts_with(b"HEARTBEAT"));
  }
}
