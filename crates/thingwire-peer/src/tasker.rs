use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, trace};

use crate::error::{PeerError, Result};

/// Number of task slots.
pub const MAX_TASKS: usize = 5;

/// A periodic task. Receives the current time in milliseconds since the
/// Unix epoch and must return promptly.
pub type TaskFn = dyn Fn(u64) + Send + Sync;

/// Slot index of a created task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(usize);

impl TaskId {
    pub fn index(self) -> usize {
        self.0
    }
}

struct Slot {
    interval_ms: u64,
    next_run_ms: u64,
    task: Arc<TaskFn>,
}

struct State {
    slots: [Option<Slot>; MAX_TASKS],
    last_serviced: usize,
}

/// Cooperative fixed-slot scheduler driven by repeated [`tick`](Tasker::tick)
/// calls from the embedding application.
///
/// Tasks run on the caller's thread, outside the slot lock. A tick that
/// starts while another is still running returns immediately.
pub struct Tasker {
    state: Mutex<State>,
    in_progress: AtomicBool,
}

impl Tasker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                slots: [const { None }; MAX_TASKS],
                last_serviced: MAX_TASKS - 1,
            }),
            in_progress: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Put `task` in the first free slot. It first runs on the next tick.
    pub fn create_task<F>(&self, interval: Duration, task: F) -> Result<TaskId>
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        let mut state = self.lock();
        let Some(index) = state.slots.iter().position(Option::is_none) else {
            return Err(PeerError::MaxTasksExceeded { max: MAX_TASKS });
        };
        let interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        state.slots[index] = Some(Slot {
            interval_ms,
            next_run_ms: 0,
            task: Arc::new(task),
        });
        debug!(task = index, interval_ms, "task created");
        Ok(TaskId(index))
    }

    pub fn remove_task(&self, id: TaskId) -> Result<()> {
        let mut state = self.lock();
        let Some(slot) = state.slots.get_mut(id.0).filter(|s| s.is_some()) else {
            return Err(PeerError::TaskNotFound(id.0));
        };
        *slot = None;
        debug!(task = id.0, "task removed");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every due task once, using the system clock.
    pub fn tick(&self) -> usize {
        self.tick_at(now_millis())
    }

    /// Run every task due at `now_ms`, starting from the slot after the one
    /// serviced last. Returns how many tasks ran.
    pub fn tick_at(&self, now_ms: u64) -> usize {
        if self.in_progress.swap(true, Ordering::Acquire) {
            trace!("tick already in progress");
            return 0;
        }
        let _running = TickGuard(&self.in_progress);

        let start = (self.lock().last_serviced + 1) % MAX_TASKS;
        let mut ran = 0;
        for offset in 0..MAX_TASKS {
            let index = (start + offset) % MAX_TASKS;
            let task = {
                let mut state = self.lock();
                let due = match state.slots[index].as_mut() {
                    Some(slot) if now_ms >= slot.next_run_ms => {
                        slot.next_run_ms = now_ms.saturating_add(slot.interval_ms);
                        Some(Arc::clone(&slot.task))
                    }
                    _ => None,
                };
                if due.is_some() {
                    state.last_serviced = index;
                }
                due
            };
            if let Some(task) = task {
                task(now_ms);
                ran += 1;
            }
        }
        ran
    }
}

/// Clears the in-progress flag when a tick ends, including by panic.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for Tasker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Tasker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tasker")
            .field("tasks", &self.len())
            .field("in_progress", &self.in_progress.load(Ordering::Relaxed))
            .finish()
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
