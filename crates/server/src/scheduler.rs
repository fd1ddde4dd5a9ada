//! Phase watcher that re-derives the active global phase on a configurable
//! interval and announces calendar transitions.
//!
//! Phase status is never stored; it follows from the schedules and today's
//! date. The watcher only notices when the derived active phase changes
//! (midnight rollover, a schedule edit) so it can write an audit entry and
//! tell connected clients to refresh their gate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Notify};
use tokio::time;
use tracing::{error, info};

use olimpiada_core::models::GlobalPhase;
use olimpiada_core::Orchestrator;
use olimpiada_web::ws::publish;

/// Aggregate counters across watcher ticks.
pub struct WatcherStats {
    pub total_ticks: AtomicU64,
    pub phase_changes: AtomicU64,
    pub total_errors: AtomicU64,
}

impl WatcherStats {
    fn new() -> Self {
        Self {
            total_ticks: AtomicU64::new(0),
            phase_changes: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
        }
    }
}

/// A change of the active phase between two ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseChange {
    pub previous: Option<GlobalPhase>,
    pub current: Option<GlobalPhase>,
}

pub struct PhaseWatcher {
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    ws_broadcast: broadcast::Sender<String>,
    last: Option<GlobalPhase>,
    stats: Arc<WatcherStats>,
}

impl PhaseWatcher {
    /// The current active phase is taken as the baseline; only later
    /// changes are announced.
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        interval: Duration,
        ws_broadcast: broadcast::Sender<String>,
    ) -> Self {
        let last = orchestrator.active_phase().unwrap_or_else(|e| {
            error!(error = %e, "failed to read active phase at startup");
            None
        });
        if let Some(phase) = &last {
            info!(phase = %phase.code, "active phase at startup");
        }
        Self {
            orchestrator,
            interval,
            ws_broadcast,
            last,
            stats: Arc::new(WatcherStats::new()),
        }
    }

    pub fn stats(&self) -> Arc<WatcherStats> {
        self.stats.clone()
    }

    /// Main watcher loop. Returns once `shutdown` is notified.
    pub async fn run(&mut self, shutdown: Arc<Notify>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "phase watcher started"
        );

        let mut interval = time::interval(self.interval);
        // The first tick fires immediately; the baseline was read in `new`.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick();
                }
                _ = shutdown.notified() => {
                    info!("phase watcher stopping");
                    break;
                }
            }
        }
    }

    /// Re-derive the active phase once and announce a change, if any.
    pub fn tick(&mut self) -> Option<PhaseChange> {
        self.stats.total_ticks.fetch_add(1, Ordering::SeqCst);

        let current = match self.orchestrator.active_phase() {
            Ok(current) => current,
            Err(e) => {
                let errors = self.stats.total_errors.fetch_add(1, Ordering::SeqCst) + 1;
                error!(error = %e, total_errors = errors, "failed to derive active phase");
                return None;
            }
        };

        let same = self.last.as_ref().map(|p| p.id) == current.as_ref().map(|p| p.id);
        if same {
            return None;
        }

        let change = PhaseChange {
            previous: self.last.take(),
            current,
        };
        self.last = change.current.clone();
        self.stats.phase_changes.fetch_add(1, Ordering::SeqCst);

        info!(
            from = ?change.previous.as_ref().map(|p| &p.code),
            to = ?change.current.as_ref().map(|p| &p.code),
            "active phase changed"
        );
        self.orchestrator
            .record_phase_change(change.previous.as_ref(), change.current.as_ref());
        publish(
            &self.ws_broadcast,
            "phase_changed",
            &serde_json::json!({
                "previous": change.previous,
                "current": change.current,
            }),
        );
        Some(change)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::NaiveDate;

    use olimpiada_core::config::PolicyConfig;
    use olimpiada_core::models::ScheduleInput;
    use olimpiada_core::{Clock, Database};

    use super::*;

    /// A clock the test can move forward.
    struct ManualClock(Mutex<NaiveDate>);

    impl Clock for ManualClock {
        fn today(&self) -> NaiveDate {
            *self.0.lock().unwrap()
        }
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_tick_announces_only_changes() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let clock = Arc::new(ManualClock(Mutex::new(day("2025-01-05"))));
        let orch = Arc::new(Orchestrator::new(
            Arc::new(db),
            clock.clone(),
            PolicyConfig::default(),
        ));
        orch.initialize_cycle(
            2025,
            Some(ScheduleInput {
                start_date: day("2025-01-05"),
                end_date: day("2025-01-31"),
            }),
            None,
        )
        .unwrap();
        let eval = orch.phase_overview().unwrap()[1].phase.id;
        orch.schedule_phase(
            eval,
            ScheduleInput {
                start_date: day("2025-02-01"),
                end_date: day("2025-02-28"),
            },
            None,
        )
        .unwrap();

        let (tx, mut rx) = broadcast::channel(8);
        let mut watcher = PhaseWatcher::new(orch.clone(), Duration::from_secs(60), tx);
        assert_eq!(watcher.tick(), None);

        *clock.0.lock().unwrap() = day("2025-02-01");
        let change = watcher.tick().unwrap();
        assert_eq!(change.previous.unwrap().code, "CONFIGURACION");
        assert_eq!(change.current.unwrap().code, "EVALUACION");

        let msg: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(msg["type"], "phase_changed");
        assert_eq!(msg["data"]["current"]["code"], "EVALUACION");

        assert_eq!(watcher.tick(), None);
        assert_eq!(watcher.stats().phase_changes.load(Ordering::SeqCst), 1);

        let audit = orch.audit_log(10, Some("phase_changed")).unwrap();
        assert_eq!(audit.len(), 1);
    }
}
