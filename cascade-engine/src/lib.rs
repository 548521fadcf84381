//! Stale-driven recomputation cascade.
//!
//! Worker threads drain the stale queue bottom-up. Each key is recomputed
//! from the persisted data as of call time, written (or deleted when empty),
//! and only a changed result marks the next coarser slot stale. Hour cascades
//! to Day to Month; coarser and folded levels are recomputed lazily at query
//! time. Audit records mirror the same walk, and a changed Month audit
//! re-sums the all-time audit total.

pub mod queue;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use audit_engine::{AuditEngine, AuditError};
use core_types::config::AppConfig;
use core_types::level::Level;
use core_types::types::{StreamId, StreamSchema};
use engine_api::{Engine, EngineError, EngineHealth, EngineResult, HealthStatus};
use log::{error, info, warn};
use parking_lot::Mutex;
use rollup_engine::{RollupEngine, RollupError};
use store_api::{AggregateStore, Catalog, LiveSink, StoreError};
use thiserror::Error;

use queue::{StaleKey, StaleQueue};

#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("rollup failed: {0}")]
    Rollup(#[from] RollupError),
    #[error("audit rollup failed: {0}")]
    Audit(#[from] AuditError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Raise the stale markers for one ingested point or reset record: the Hour
/// slot containing `ts_ns`, plus the previous Hour slot when the timestamp
/// falls within one sample period of the slot's leading boundary.
pub fn mark_ingested(
    queue: &StaleQueue,
    schema: &StreamSchema,
    stream: StreamId,
    ts_ns: i64,
    sample_period: Duration,
) {
    let Some(hour_start) = Level::Hour.align(ts_ns, schema.offset) else {
        return;
    };
    queue.raise(StaleKey {
        level: Level::Hour,
        slot_start_ns: hour_start,
        stream,
    });
    let slack = sample_period.as_nanos() as i64;
    if let Some(duration) = Level::Hour.fixed_duration_ns() {
        if ts_ns - hour_start < slack {
            queue.raise(StaleKey {
                level: Level::Hour,
                slot_start_ns: hour_start - duration,
                stream,
            });
        }
    }
}

pub struct CascadeProcessor {
    inner: Arc<CascadeInner>,
}

impl CascadeProcessor {
    pub fn new(
        config: AppConfig,
        queue: Arc<StaleQueue>,
        catalog: Arc<dyn Catalog>,
        rollup: Arc<RollupEngine>,
        audit: Arc<AuditEngine>,
        aggregates: Arc<dyn AggregateStore>,
        sink: Arc<dyn LiveSink>,
    ) -> Self {
        Self {
            inner: Arc::new(CascadeInner {
                config,
                queue,
                catalog,
                rollup,
                audit,
                aggregates,
                sink,
                state: Mutex::new(RuntimeState::Stopped),
                health: Mutex::new(EngineHealth::default()),
            }),
        }
    }

    pub fn queue(&self) -> Arc<StaleQueue> {
        Arc::clone(&self.inner.queue)
    }

    /// Drain everything currently pending, synchronously. Failed keys are
    /// deferred and counted, never retried within the same call.
    pub fn process_pending(&self) -> PassOutcome {
        self.inner.queue.rearm();
        self.inner.process_batch(usize::MAX)
    }
}

impl Engine for CascadeProcessor {
    fn start(&self) -> EngineResult<()> {
        CascadeInner::start(&self.inner)
    }

    fn stop(&self) -> EngineResult<()> {
        self.inner.stop()
    }

    fn health(&self) -> EngineHealth {
        self.inner.health.lock().clone()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassOutcome {
    pub processed: usize,
    pub failed: usize,
}

struct CascadeInner {
    config: AppConfig,
    queue: Arc<StaleQueue>,
    catalog: Arc<dyn Catalog>,
    rollup: Arc<RollupEngine>,
    audit: Arc<AuditEngine>,
    aggregates: Arc<dyn AggregateStore>,
    sink: Arc<dyn LiveSink>,
    state: Mutex<RuntimeState>,
    health: Mutex<EngineHealth>,
}

impl CascadeInner {
    fn start(this: &Arc<Self>) -> EngineResult<()> {
        let mut guard = this.state.lock();
        if matches!(*guard, RuntimeState::Running(_)) {
            return Err(EngineError::AlreadyRunning);
        }
        this.set_health(HealthStatus::Starting, None);
        let cancel = Arc::new(AtomicBool::new(false));
        let workers = this.config.cascade.workers.max(1);
        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let runner = Arc::clone(this);
            let cancel_flag = Arc::clone(&cancel);
            let handle = thread::Builder::new()
                .name(format!("cascade-{index}"))
                .spawn(move || runner.run(cancel_flag))
                .map_err(|err| EngineError::Failure {
                    source: Box::new(err),
                })?;
            handles.push(handle);
        }
        info!("cascade processor starting with {workers} workers");
        *guard = RuntimeState::Running(WorkerBundle { cancel, handles });
        Ok(())
    }

    fn stop(&self) -> EngineResult<()> {
        let mut guard = self.state.lock();
        let Some(bundle) = guard.take_running() else {
            return Err(EngineError::NotRunning);
        };
        bundle.cancel.store(true, Ordering::Relaxed);
        for handle in bundle.handles {
            if let Err(err) = handle.join() {
                error!("cascade worker join error: {err:?}");
            }
        }
        *guard = RuntimeState::Stopped;
        self.set_health(HealthStatus::Stopped, None);
        Ok(())
    }

    fn run(self: Arc<Self>, cancel: Arc<AtomicBool>) {
        self.set_health(HealthStatus::Ready, None);
        let idle = Duration::from_millis(self.config.cascade.idle_backoff_ms);
        while !cancel.load(Ordering::Relaxed) {
            self.queue.rearm();
            let outcome = self.process_batch(self.config.cascade.batch_limit);
            if outcome.failed > 0 {
                self.set_health(
                    HealthStatus::Degraded,
                    Some(format!("{} keys failed last pass", outcome.failed)),
                );
                thread::sleep(idle);
            } else if outcome.processed == 0 {
                thread::sleep(idle);
            } else {
                self.set_health(HealthStatus::Ready, None);
            }
        }
        self.set_health(HealthStatus::Stopped, None);
        info!("cascade worker stopped");
    }

    fn process_batch(&self, limit: usize) -> PassOutcome {
        let mut outcome = PassOutcome::default();
        while outcome.processed + outcome.failed < limit {
            let Some(lease) = self.queue.acquire() else {
                break;
            };
            let key = lease.key();
            match self.recompute(key) {
                Ok(()) => {
                    lease.complete();
                    outcome.processed += 1;
                }
                Err(err) => {
                    warn!(
                        "recompute failed for {:?} {} at {}: {err}",
                        key.level, key.stream, key.slot_start_ns
                    );
                    lease.fail();
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }

    fn recompute(&self, key: StaleKey) -> Result<(), CascadeError> {
        let schema = self.catalog.schema_for(key.stream)?;
        let Some(end_ns) = key.level.slot_end(key.slot_start_ns, schema.offset) else {
            // Only Hour/Day/Month keys are ever raised.
            warn!("dropping stale key with unbounded level {:?}", key.level);
            return Ok(());
        };

        let next = self
            .rollup
            .compute_window(key.stream, key.level, key.slot_start_ns, end_ns)?;
        let previous = self
            .aggregates
            .get(key.stream, key.level, key.slot_start_ns)?;
        match &next {
            Some(record) => self.aggregates.write(record.clone())?,
            None => self
                .aggregates
                .delete(key.stream, key.level, key.slot_start_ns)?,
        }
        let aggregate_changed = previous != next;

        let audit_changed =
            self.audit
                .recompute(key.stream, key.level, key.slot_start_ns, schema.offset)?;
        if key.level == Level::Month && audit_changed {
            self.audit.recompute_running_total(key.stream)?;
        }

        if aggregate_changed || audit_changed {
            if let Some(coarser) = key.level.coarser() {
                if let Some(parent_start) = coarser.align(key.slot_start_ns, schema.offset) {
                    self.queue.raise(StaleKey {
                        level: coarser,
                        slot_start_ns: parent_start,
                        stream: key.stream,
                    });
                }
            }
        }

        if self.config.live.enabled {
            let now = now_ns();
            if now >= key.slot_start_ns && now < end_ns {
                if let Some(record) = &next {
                    self.sink
                        .notify_live(key.stream, key.level, key.slot_start_ns, record);
                }
            }
        }
        Ok(())
    }

    fn set_health(&self, status: HealthStatus, detail: Option<String>) {
        let mut guard = self.health.lock();
        guard.status = status;
        guard.detail = detail;
    }
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_nanos() as i64)
}

enum RuntimeState {
    Stopped,
    Running(WorkerBundle),
}

impl RuntimeState {
    fn take_running(&mut self) -> Option<WorkerBundle> {
        match std::mem::replace(self, RuntimeState::Stopped) {
            RuntimeState::Running(bundle) => Some(bundle),
            other => {
                *self = other;
                None
            }
        }
    }
}

struct WorkerBundle {
    cancel: Arc<AtomicBool>,
    handles: Vec<thread::JoinHandle<()>>,
}
