//! Background stage scheduler.
//!
//! Runs each buffer stage on its own named thread:
//! - Analysis: sizes newly inserted records
//! - Indexing: feeds analyzed records to the index
//! - Eviction: retires the oldest records under memory pressure
//!
//! Stages block inside the buffer while idle. Interruptions are counted and
//! the loop carries on; only [`StageScheduler::stop`] ends a stage thread.

use crate::buffer::{AtomicBuffer, StageOutcome};
use crate::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// A buffer stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Record size analysis
    Analysis,
    /// Index insertion and maintenance
    Indexing,
    /// Fragment eviction
    Eviction,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 3] = [Stage::Analysis, Stage::Indexing, Stage::Eviction];

    /// Stage name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Analysis => "analysis",
            Stage::Indexing => "indexing",
            Stage::Eviction => "eviction",
        }
    }

    /// Name of the thread running this stage.
    pub fn thread_name(&self) -> &'static str {
        match self {
            Stage::Analysis => "tracebuf-analysis",
            Stage::Indexing => "tracebuf-indexing",
            Stage::Eviction => "tracebuf-eviction",
        }
    }

    fn run<R>(&self, buffer: &AtomicBuffer<R>) -> StageOutcome {
        match self {
            Stage::Analysis => buffer.analyze_next(),
            Stage::Indexing => buffer.index_next(),
            Stage::Eviction => buffer.evict(),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Status of a stage task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Task was never started
    Idle,
    /// Task thread is looping
    Running,
    /// Task thread has exited
    Stopped,
}

impl TaskStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => TaskStatus::Running,
            2 => TaskStatus::Stopped,
            _ => TaskStatus::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            TaskStatus::Idle => 0,
            TaskStatus::Running => 1,
            TaskStatus::Stopped => 2,
        }
    }
}

/// Information about a stage task.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    /// Stage run by the task
    pub stage: Stage,
    /// Current status
    pub status: TaskStatus,
    /// Stage calls that completed a unit of work
    pub iterations: u64,
    /// Stage calls that returned interrupted
    pub interruptions: u64,
    /// When the task thread last started
    pub started_at: Option<Instant>,
}

/// Live counters of one task, updated by its thread.
#[derive(Debug, Default)]
struct TaskState {
    status: AtomicU8,
    iterations: AtomicU64,
    interruptions: AtomicU64,
    started_at: RwLock<Option<Instant>>,
}

impl TaskState {
    fn set_status(&self, status: TaskStatus) {
        self.status.store(status.as_u8(), Ordering::Release);
    }

    fn snapshot(&self, stage: Stage) -> TaskInfo {
        TaskInfo {
            stage,
            status: TaskStatus::from_u8(self.status.load(Ordering::Acquire)),
            iterations: self.iterations.load(Ordering::Acquire),
            interruptions: self.interruptions.load(Ordering::Acquire),
            started_at: *self.started_at.read(),
        }
    }
}

/// Runs the three buffer stages on dedicated threads.
pub struct StageScheduler<R> {
    buffer: Arc<AtomicBuffer<R>>,
    tasks: HashMap<Stage, Arc<TaskState>>,
    stop: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<R: Send + Sync + 'static> StageScheduler<R> {
    /// Create a scheduler for `buffer`. Nothing runs until [`start`](Self::start).
    pub fn new(buffer: Arc<AtomicBuffer<R>>) -> Self {
        let tasks = Stage::ALL
            .iter()
            .map(|stage| (*stage, Arc::new(TaskState::default())))
            .collect();
        Self {
            buffer,
            tasks,
            stop: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// The scheduled buffer.
    pub fn buffer(&self) -> &Arc<AtomicBuffer<R>> {
        &self.buffer
    }

    /// Spawn the stage threads. Does nothing if they are already running.
    pub fn start(&self) -> Result<()> {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            warn!("Stage scheduler already running");
            return Ok(());
        }

        info!("Starting stage scheduler");
        self.stop.store(false, Ordering::Release);
        self.buffer.resume_stages();

        for stage in Stage::ALL {
            match self.spawn_stage(stage) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!(stage = %stage, error = %e, "Failed to spawn stage thread");
                    self.shutdown(&mut handles);
                    return Err(e);
                }
            }
        }

        info!(stages = handles.len(), "Stage scheduler started");
        Ok(())
    }

    /// Stop all stage threads and wait for them to exit.
    pub fn stop(&self) {
        let mut handles = self.handles.lock();
        if handles.is_empty() {
            return;
        }

        info!("Stopping stage scheduler");
        self.shutdown(&mut handles);
        info!("Stage scheduler stopped");
    }

    /// Interrupt whatever the stages are waiting on. They keep running.
    pub fn interrupt(&self) {
        self.buffer.interrupt_stages();
    }

    /// Whether stage threads are running.
    pub fn is_running(&self) -> bool {
        !self.handles.lock().is_empty()
    }

    /// Get status of all tasks.
    pub fn task_statuses(&self) -> HashMap<Stage, TaskInfo> {
        self.tasks
            .iter()
            .map(|(stage, state)| (*stage, state.snapshot(*stage)))
            .collect()
    }

    /// Get status of a specific task.
    pub fn task_status(&self, stage: Stage) -> Option<TaskInfo> {
        self.tasks.get(&stage).map(|state| state.snapshot(stage))
    }

    fn spawn_stage(&self, stage: Stage) -> Result<JoinHandle<()>> {
        let state = self
            .tasks
            .get(&stage)
            .map(Arc::clone)
            .ok_or_else(|| Error::StageSpawn {
                stage: stage.name(),
                message: "stage not registered".into(),
            })?;
        let buffer = Arc::clone(&self.buffer);
        let stop = Arc::clone(&self.stop);

        thread::Builder::new()
            .name(stage.thread_name().to_string())
            .spawn(move || run_stage(stage, &buffer, &state, &stop))
            .map_err(|e| Error::StageSpawn {
                stage: stage.name(),
                message: e.to_string(),
            })
    }

    fn shutdown(&self, handles: &mut Vec<JoinHandle<()>>) {
        self.stop.store(true, Ordering::Release);
        self.buffer.shutdown_stages();

        for handle in handles.drain(..) {
            let name = handle.thread().name().unwrap_or("stage").to_string();
            if handle.join().is_err() {
                error!(thread = %name, "Stage thread panicked");
            }
        }
    }
}

impl<R> Drop for StageScheduler<R> {
    fn drop(&mut self) {
        let handles = std::mem::take(self.handles.get_mut());
        if handles.is_empty() {
            return;
        }

        self.stop.store(true, Ordering::Release);
        self.buffer.shutdown_stages();
        for handle in handles {
            let _ = handle.join();
        }
        debug!("Stage scheduler dropped");
    }
}

fn run_stage<R>(
    stage: Stage,
    buffer: &AtomicBuffer<R>,
    state: &TaskState,
    stop: &AtomicBool,
) {
    *state.started_at.write() = Some(Instant::now());
    state.set_status(TaskStatus::Running);
    debug!(stage = %stage, "Stage task started");

    while !stop.load(Ordering::Acquire) {
        match stage.run(buffer) {
            StageOutcome::Completed => {
                state.iterations.fetch_add(1, Ordering::AcqRel);
            }
            StageOutcome::Interrupted => {
                if stop.load(Ordering::Acquire) || buffer.is_shut_down() {
                    break;
                }
                state.interruptions.fetch_add(1, Ordering::AcqRel);
                debug!(stage = %stage, "Stage interrupted, continuing");
            }
        }
    }

    state.set_status(TaskStatus::Stopped);
    debug!(stage = %stage, "Stage task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferBuilder;
    use crate::config::BufferConfig;
    use crate::estimator::{FootprintEstimator, HeapSize};
    use crate::index::{IndexKey, MemoryIndex};
    use std::time::Duration;

    struct Event(u64);

    impl IndexKey for Event {
        type Key = u64;

        fn index_key(&self) -> u64 {
            self.0 % 16
        }
    }

    impl HeapSize for Event {
        fn heap_size(&self) -> usize {
            0
        }
    }

    fn create_test_scheduler(max_size: u64) -> StageScheduler<Event> {
        let buffer = BufferBuilder::<Event>::new(BufferConfig::default())
            .with_estimator(Arc::new(FootprintEstimator::new()))
            .with_index(Arc::new(MemoryIndex::<Event>::new()))
            .with_max_size(max_size)
            .build()
            .unwrap();
        StageScheduler::new(Arc::new(buffer))
    }

    fn wait_for(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_scheduler_creation() {
        let scheduler = create_test_scheduler(1 << 20);
        assert!(!scheduler.is_running());

        let statuses = scheduler.task_statuses();
        assert_eq!(statuses.len(), 3);
        for stage in Stage::ALL {
            let info = &statuses[&stage];
            assert_eq!(info.status, TaskStatus::Idle);
            assert_eq!(info.iterations, 0);
            assert!(info.started_at.is_none());
        }
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Analysis.to_string(), "analysis");
        assert_eq!(Stage::Indexing.thread_name(), "tracebuf-indexing");
        assert_eq!(Stage::Eviction.thread_name(), "tracebuf-eviction");
    }

    #[test]
    fn test_scheduler_processes_records() {
        let scheduler = create_test_scheduler(1 << 20);
        scheduler.start().unwrap();
        assert!(scheduler.is_running());

        let buffer = Arc::clone(scheduler.buffer());
        for i in 0..100 {
            buffer.insert(Event(i));
        }

        assert!(wait_for(|| buffer.indexed_count() == 100));
        assert_eq!(buffer.analyzed_count(), 100);
        assert!(wait_for(|| {
            scheduler.task_status(Stage::Indexing).unwrap().iterations == 100
        }));

        scheduler.stop();
        assert!(!scheduler.is_running());
        for info in scheduler.task_statuses().values() {
            assert_eq!(info.status, TaskStatus::Stopped);
            assert!(info.started_at.is_some());
        }
    }

    #[test]
    fn test_scheduler_evicts_under_pressure() {
        let scheduler = create_test_scheduler(4096);
        scheduler.start().unwrap();

        let buffer = Arc::clone(scheduler.buffer());
        for i in 0..1000 {
            buffer.insert(Event(i));
        }

        assert!(wait_for(|| buffer.indexed_count() == 1000));
        assert!(wait_for(|| !buffer.should_evict()));
        assert!(buffer.evicted_count() > 0);
        assert_eq!(
            buffer.retained_count(),
            buffer.inserted_count() - buffer.evicted_count()
        );

        scheduler.stop();
    }

    #[test]
    fn test_interrupt_is_counted_and_survived() {
        let scheduler = create_test_scheduler(1 << 20);
        scheduler.start().unwrap();
        assert!(wait_for(|| scheduler
            .task_statuses()
            .values()
            .all(|info| info.status == TaskStatus::Running)));

        thread::sleep(Duration::from_millis(20));
        scheduler.interrupt();

        assert!(wait_for(|| {
            scheduler.task_status(Stage::Analysis).unwrap().interruptions >= 1
        }));
        assert!(scheduler.is_running());

        scheduler.buffer().insert(Event(1));
        assert!(wait_for(|| scheduler.buffer().analyzed_count() == 1));

        scheduler.stop();
    }

    #[test]
    fn test_start_twice_is_noop() {
        let scheduler = create_test_scheduler(1 << 20);
        scheduler.start().unwrap();
        scheduler.start().unwrap();
        assert_eq!(scheduler.handles.lock().len(), 3);
        scheduler.stop();
    }

    #[test]
    fn test_restart_after_stop() {
        let scheduler = create_test_scheduler(1 << 20);
        scheduler.start().unwrap();
        scheduler.stop();
        assert!(scheduler.buffer().is_shut_down());

        scheduler.start().unwrap();
        assert!(!scheduler.buffer().is_shut_down());
        scheduler.buffer().insert(Event(1));
        assert!(wait_for(|| scheduler.buffer().indexed_count() == 1));
        scheduler.stop();
    }

    #[test]
    fn test_drop_stops_threads() {
        let scheduler = create_test_scheduler(1 << 20);
        let buffer = Arc::clone(scheduler.buffer());
        scheduler.start().unwrap();

        drop(scheduler);
        assert!(buffer.is_shut_down());
        assert_eq!(Arc::strong_count(&buffer), 1);
    }
}
