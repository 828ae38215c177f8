//! Memory-pressure monitoring
//!
//! While active, the monitor samples process memory on an interval and
//! purges the disk cache when usage crosses the pressure threshold. Hosts
//! that receive pressure signals of their own can push them through
//! [`PressureMonitor::notify_pressure`]. Every purge is broadcast as a
//! [`PressureEvent`] so other components can refresh their state.

use crate::store::DiskStore;
use crate::types::{CacheConfig, ClearReport, MemoryInfo};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 16;
const MIB: f64 = 1024.0 * 1024.0;

/// Source of memory usage samples
pub trait MemoryProbe: Send + Sync {
    /// Returns (used bytes, total bytes)
    fn sample(&self) -> (u64, u64);
}

/// Resident memory of this process against total physical memory
pub struct SystemMemoryProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SystemMemoryProbe {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| warn!(error = %e, "Cannot determine current pid"))
            .ok();
        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn sample(&self) -> (u64, u64) {
        let mut system = self.system.lock();
        system.refresh_memory();
        let total = system.total_memory();

        let used = match self.pid {
            Some(pid) => {
                system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
                system.process(pid).map(|p| p.memory()).unwrap_or(0)
            }
            None => 0,
        };

        (used, total)
    }
}

/// Emitted after the cache was purged in response to memory pressure
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PressureEvent {
    CacheCleared {
        entries_before: usize,
        bytes_before: u64,
        report: ClearReport,
    },
}

struct MonitorState {
    store: Arc<DiskStore>,
    probe: Arc<dyn MemoryProbe>,
    threshold: f64,
    events: broadcast::Sender<PressureEvent>,
    monitoring: AtomicBool,
}

impl MonitorState {
    fn memory_info(&self) -> MemoryInfo {
        let (used, total) = self.probe.sample();
        MemoryInfo::new(used, total, self.threshold)
    }

    async fn handle_pressure(&self) -> PressureEvent {
        warn!("Memory pressure detected, clearing image cache");

        let before = self.store.stats().await;
        info!(
            entries = before.entries,
            size_mb = before.total_size as f64 / MIB,
            "Cache before clearing"
        );

        let report = self.store.clear().await;
        let event = PressureEvent::CacheCleared {
            entries_before: before.entries,
            bytes_before: before.total_size,
            report,
        };

        // No subscribers is fine
        let _ = self.events.send(event.clone());
        event
    }
}

pub struct PressureMonitor {
    state: Arc<MonitorState>,
    poll_interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PressureMonitor {
    pub fn new(
        store: Arc<DiskStore>,
        probe: Arc<dyn MemoryProbe>,
        threshold: f64,
        poll_interval: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(MonitorState {
                store,
                probe,
                threshold,
                events,
                monitoring: AtomicBool::new(false),
            }),
            poll_interval,
            task: Mutex::new(None),
        }
    }

    /// Monitor backed by [`SystemMemoryProbe`]
    pub fn from_config(config: &CacheConfig, store: Arc<DiskStore>) -> Self {
        Self::new(
            store,
            Arc::new(SystemMemoryProbe::new()),
            config.pressure_threshold,
            config.pressure_poll_interval(),
        )
    }

    /// Start polling for pressure. No-op if already monitoring.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }

        let state = self.state.clone();
        let poll_interval = self.poll_interval;
        state.monitoring.store(true, Ordering::SeqCst);

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut was_under_pressure = false;

            loop {
                ticker.tick().await;
                // Sampling reads /proc under a blocking lock
                let sampler = state.clone();
                let info = match tokio::task::spawn_blocking(move || sampler.memory_info()).await {
                    Ok(info) => info,
                    Err(e) => {
                        warn!(error = %e, "Memory sampling task failed");
                        continue;
                    }
                };
                // Purge once per episode, not on every tick while it lasts
                if info.under_pressure && !was_under_pressure {
                    state.handle_pressure().await;
                }
                was_under_pressure = info.under_pressure;
            }
        }));

        info!(
            threshold = self.state.threshold,
            poll_interval = ?self.poll_interval,
            "Memory monitoring started"
        );
    }

    /// Stop polling. No-op if not monitoring.
    pub fn stop(&self) {
        let mut task = self.task.lock();
        let Some(handle) = task.take() else {
            return;
        };
        handle.abort();
        // Flipped under the task lock so it always agrees with the poller
        self.state.monitoring.store(false, Ordering::SeqCst);
        drop(task);
        info!("Memory monitoring stopped");
    }

    pub fn is_monitoring(&self) -> bool {
        self.state.monitoring.load(Ordering::SeqCst)
    }

    /// Deliver a pressure signal from the host. Ignored unless monitoring.
    pub async fn notify_pressure(&self) -> Option<PressureEvent> {
        if !self.is_monitoring() {
            debug!("Pressure signal ignored, monitor is stopped");
            return None;
        }
        Some(self.state.handle_pressure().await)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PressureEvent> {
        self.state.events.subscribe()
    }

    pub fn current_memory_info(&self) -> MemoryInfo {
        self.state.memory_info()
    }

    pub fn log_memory_usage(&self) {
        let info = self.current_memory_info();
        info!(
            "Memory usage: {:.1} MB / {:.1} MB ({:.1}%)",
            info.used_bytes as f64 / MIB,
            info.total_bytes as f64 / MIB,
            info.usage_percent()
        );
        if info.under_pressure {
            warn!("Memory pressure detected");
        }
    }
}

impl Drop for PressureMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CacheStats;
    use std::sync::atomic::AtomicU64;
    use tempfile::tempdir;

    struct FixedProbe {
        used: AtomicU64,
        total: u64,
    }

    impl FixedProbe {
        fn new(used: u64, total: u64) -> Arc<Self> {
            Arc::new(Self {
                used: AtomicU64::new(used),
                total,
            })
        }

        fn set_used(&self, used: u64) {
            self.used.store(used, Ordering::SeqCst);
        }
    }

    impl MemoryProbe for FixedProbe {
        fn sample(&self) -> (u64, u64) {
            (self.used.load(Ordering::SeqCst), self.total)
        }
    }

    async fn populated_store(dir: &std::path::Path) -> Arc<DiskStore> {
        let store = Arc::new(DiskStore::new(dir.join("cache"), "jpg"));
        store.put("a", &[1u8; 100]).await.unwrap();
        store.put("b", &[2u8; 50]).await.unwrap();
        store
    }

    fn monitor(store: Arc<DiskStore>, probe: Arc<FixedProbe>) -> PressureMonitor {
        PressureMonitor::new(store, probe, 0.8, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DiskStore::new(dir.path().to_path_buf(), "jpg"));
        let monitor = monitor(store, FixedProbe::new(10, 100));

        assert!(!monitor.is_monitoring());
        monitor.stop();
        assert!(!monitor.is_monitoring());

        monitor.start();
        monitor.start();
        assert!(monitor.is_monitoring());

        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_monitoring());

        monitor.start();
        assert!(monitor.is_monitoring());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_start_stop_from_many_threads_stays_consistent() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DiskStore::new(dir.path().to_path_buf(), "jpg"));
        let monitor = Arc::new(monitor(store, FixedProbe::new(10, 100)));

        let mut handles = Vec::new();
        for i in 0..8 {
            let monitor = monitor.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..200 {
                    if i % 2 == 0 {
                        monitor.start();
                    } else {
                        monitor.stop();
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // The flag always matches whether a poller is installed
        assert_eq!(monitor.is_monitoring(), monitor.task.lock().is_some());

        monitor.start();
        assert!(monitor.is_monitoring());
        assert!(monitor.task.lock().is_some());
        assert!(monitor.notify_pressure().await.is_some());

        monitor.stop();
        assert!(!monitor.is_monitoring());
        assert!(monitor.task.lock().is_none());
    }

    #[tokio::test]
    async fn test_signal_ignored_when_stopped() {
        let dir = tempdir().unwrap();
        let store = populated_store(dir.path()).await;
        let monitor = monitor(store.clone(), FixedProbe::new(10, 100));

        assert!(monitor.notify_pressure().await.is_none());
        assert_eq!(store.stats().await.entries, 2);
    }

    #[tokio::test]
    async fn test_signal_clears_and_broadcasts() {
        let dir = tempdir().unwrap();
        let store = populated_store(dir.path()).await;
        let monitor = monitor(store.clone(), FixedProbe::new(10, 100));
        let mut events = monitor.subscribe();

        monitor.start();
        let event = monitor.notify_pressure().await.unwrap();

        let expected = PressureEvent::CacheCleared {
            entries_before: 2,
            bytes_before: 150,
            report: ClearReport {
                removed: 2,
                failed: 0,
            },
        };
        assert_eq!(event, expected);
        assert_eq!(events.recv().await.unwrap(), expected);
        assert_eq!(store.stats().await, CacheStats::default());
    }

    #[tokio::test]
    async fn test_polling_detects_pressure_once_per_episode() {
        let dir = tempdir().unwrap();
        let store = populated_store(dir.path()).await;
        let probe = FixedProbe::new(90, 100);
        let monitor = monitor(store.clone(), probe.clone());
        let mut events = monitor.subscribe();

        monitor.start();
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("pressure event")
            .unwrap();
        assert!(matches!(
            event,
            PressureEvent::CacheCleared {
                entries_before: 2,
                ..
            }
        ));
        assert_eq!(store.stats().await, CacheStats::default());

        // Pressure persists: no further purge
        store.put("c", &[3u8; 10]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.stats().await.entries, 1);

        // Pressure relieved, then returns
        probe.set_used(10);
        tokio::time::sleep(Duration::from_millis(50)).await;
        probe.set_used(95);
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("second pressure event")
            .unwrap();
        assert!(matches!(
            event,
            PressureEvent::CacheCleared {
                entries_before: 1,
                bytes_before: 10,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_stopped_monitor_does_not_poll() {
        let dir = tempdir().unwrap();
        let store = populated_store(dir.path()).await;
        let monitor = monitor(store.clone(), FixedProbe::new(99, 100));

        monitor.start();
        monitor.stop();
        store.put("late", &[0u8; 5]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.get("late").await.is_some());
    }

    #[test]
    fn test_current_memory_info() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DiskStore::new(dir.path().to_path_buf(), "jpg"));
        let probe = FixedProbe::new(50, 100);
        let monitor = monitor(store, probe.clone());

        let info = monitor.current_memory_info();
        assert_eq!(info.used_bytes, 50);
        assert_eq!(info.total_bytes, 100);
        assert!(!info.under_pressure);

        probe.set_used(81);
        assert!(monitor.current_memory_info().under_pressure);
    }

    #[test]
    fn test_system_probe_reports_memory() {
        let probe = SystemMemoryProbe::new();
        let (used, total) = probe.sample();
        assert!(total > 0);
        assert!(used <= total);
    }

    #[test]
    fn test_event_serialization() {
        let event = PressureEvent::CacheCleared {
            entries_before: 3,
            bytes_before: 1024,
            report: ClearReport::default(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"cache_cleared\""));
        assert!(json.contains("\"bytes_before\":1024"));
    }
}
