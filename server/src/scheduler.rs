//! Time-ordered deferred and repeating callbacks
//!
//! The scheduler has no clock of its own: whoever owns it advances time by
//! calling [`TaskScheduler::update`] with the elapsed slice, and every task
//! whose due time has been reached fires synchronously inside that call.
//! Role main loops drive one scheduler each, and every shard thread drives
//! its own.
//!
//! Ordering guarantees:
//! - tasks fire in due-time order
//! - tasks with equal due times fire in the order they were scheduled
//! - a task re-armed while firing, or created from inside a task, is queued
//!   after the current pass and never fires twice in one `update`

use log::debug;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::Duration;

/// Handle used to cancel a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

pub type TaskFn = Box<dyn FnMut(&mut TaskContext<'_>) + Send>;

struct ScheduledTask {
    due: Duration,
    seq: u64,
    id: TaskId,
    interval: Duration,
    group: Option<u32>,
    callback: TaskFn,
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    // Reversed so the max-heap pops the earliest task first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

enum NextRun {
    Done,
    After(Duration),
}

struct NewTask {
    delay: Duration,
    group: Option<u32>,
    callback: TaskFn,
    id: TaskId,
}

/// What a task can do while it fires
pub struct TaskContext<'a> {
    id: TaskId,
    now: Duration,
    interval: Duration,
    shutting_down: bool,
    next: NextRun,
    spawned: &'a mut Vec<NewTask>,
    next_id: &'a mut u64,
}

impl<'a> TaskContext<'a> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Scheduler time at which this task fired
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// Re-arms the task with its original interval.
    /// Refused once shutdown has begun.
    pub fn repeat(&mut self) -> bool {
        let interval = self.interval;
        self.repeat_after(interval)
    }

    /// Re-arms the task to fire `delay` from now, keeping `delay` as its
    /// interval for later repeats
    pub fn repeat_after(&mut self, delay: Duration) -> bool {
        if self.shutting_down {
            return false;
        }
        self.next = NextRun::After(delay);
        true
    }

    /// Undoes an earlier `repeat` in the same firing
    pub fn cancel(&mut self) {
        self.next = NextRun::Done;
    }

    /// Schedules another task; it is queued once the current pass ends
    pub fn schedule<F>(&mut self, delay: Duration, callback: F) -> TaskId
    where
        F: FnMut(&mut TaskContext<'_>) + Send + 'static,
    {
        let id = TaskId(*self.next_id);
        *self.next_id += 1;
        self.spawned.push(NewTask {
            delay,
            group: None,
            callback: Box::new(callback),
            id,
        });
        id
    }
}

/// Min-ordered queue of tasks keyed by due time
pub struct TaskScheduler {
    now: Duration,
    queue: BinaryHeap<ScheduledTask>,
    next_seq: u64,
    next_id: u64,
    cancelled: HashSet<TaskId>,
    shutting_down: bool,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            queue: BinaryHeap::new(),
            next_seq: 0,
            next_id: 1,
            cancelled: HashSet::new(),
            shutting_down: false,
        }
    }

    /// Current scheduler time: the sum of every elapsed slice so far
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Number of tasks still waiting to fire
    pub fn len(&self) -> usize {
        self.queue.len() - self.cancelled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// Schedules `callback` to fire once, `delay` from now.
    /// The callback may re-arm itself through its context.
    pub fn schedule<F>(&mut self, delay: Duration, callback: F) -> TaskId
    where
        F: FnMut(&mut TaskContext<'_>) + Send + 'static,
    {
        let id = self.allocate_id();
        self.push(id, delay, delay, None, Box::new(callback));
        id
    }

    /// Same as [`schedule`](Self::schedule), tagged so that the whole group
    /// can be cancelled at once
    pub fn schedule_in_group<F>(&mut self, group: u32, delay: Duration, callback: F) -> TaskId
    where
        F: FnMut(&mut TaskContext<'_>) + Send + 'static,
    {
        let id = self.allocate_id();
        self.push(id, delay, delay, Some(group), Box::new(callback));
        id
    }

    /// Schedules a task that fires every `interval` until it calls
    /// `cancel` or shutdown begins
    pub fn schedule_repeating<F>(&mut self, interval: Duration, mut callback: F) -> TaskId
    where
        F: FnMut(&mut TaskContext<'_>) + Send + 'static,
    {
        self.schedule(interval, move |ctx| {
            ctx.repeat();
            callback(ctx);
        })
    }

    /// Cancels a pending task. Returns false when it already fired or
    /// never existed.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        if self.cancelled.contains(&id) || !self.queue.iter().any(|task| task.id == id) {
            return false;
        }
        self.cancelled.insert(id)
    }

    /// Cancels every pending task of `group`, returning how many
    pub fn cancel_group(&mut self, group: u32) -> usize {
        let ids: Vec<TaskId> = self
            .queue
            .iter()
            .filter(|task| task.group == Some(group))
            .map(|task| task.id)
            .collect();
        ids.into_iter().filter(|id| self.cancelled.insert(*id)).count()
    }

    /// Time remaining until `id` fires, if it is still pending
    pub fn due_in(&self, id: TaskId) -> Option<Duration> {
        if self.cancelled.contains(&id) {
            return None;
        }
        self.queue
            .iter()
            .find(|task| task.id == id)
            .map(|task| task.due.saturating_sub(self.now))
    }

    /// Time remaining until the earliest pending task fires
    pub fn next_due(&self) -> Option<Duration> {
        self.queue
            .iter()
            .filter(|task| !self.cancelled.contains(&task.id))
            .map(|task| task.due)
            .min()
            .map(|due| due.saturating_sub(self.now))
    }

    /// Stops all repeats from now on. Already queued tasks still fire.
    pub fn begin_shutdown(&mut self) {
        self.shutting_down = true;
    }

    /// Drops every pending task
    pub fn clear(&mut self) {
        self.queue.clear();
        self.cancelled.clear();
    }

    /// Advances time by `elapsed` and fires every task that became due,
    /// returning how many fired
    pub fn update(&mut self, elapsed: Duration) -> usize {
        self.now += elapsed;

        let mut rearmed = Vec::new();
        let mut spawned = Vec::new();
        let mut fired = 0;

        while self.queue.peek().map_or(false, |task| task.due <= self.now) {
            let Some(mut task) = self.queue.pop() else {
                break;
            };
            if self.cancelled.remove(&task.id) {
                continue;
            }

            let mut ctx = TaskContext {
                id: task.id,
                now: self.now,
                interval: task.interval,
                shutting_down: self.shutting_down,
                next: NextRun::Done,
                spawned: &mut spawned,
                next_id: &mut self.next_id,
            };
            (task.callback)(&mut ctx);
            fired += 1;

            if let NextRun::After(delay) = ctx.next {
                task.interval = delay;
                rearmed.push(task);
            }
        }

        for task in rearmed {
            let ScheduledTask {
                id,
                interval,
                group,
                callback,
                ..
            } = task;
            self.push(id, interval, interval, group, callback);
        }
        for task in spawned {
            self.push(task.id, task.delay, task.delay, task.group, task.callback);
        }

        if fired > 0 {
            debug!("Scheduler fired {} task(s) at {:?}", fired, self.now);
        }
        fired
    }

    fn allocate_id(&mut self) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        id
    }

    fn push(
        &mut self,
        id: TaskId,
        delay: Duration,
        interval: Duration,
        group: Option<u32>,
        callback: TaskFn,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(ScheduledTask {
            due: self.now + delay,
            seq,
            id,
            interval,
            group,
            callback,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> TaskFn) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = Arc::clone(&log);
        let make = move |name: &'static str| -> TaskFn {
            let log = Arc::clone(&log_clone);
            Box::new(move |_ctx: &mut TaskContext<'_>| log.lock().unwrap().push(name))
        };
        (log, make)
    }

    #[test]
    fn test_fires_in_due_order_regardless_of_insertion() {
        let (log, make) = recorder();
        let mut scheduler = TaskScheduler::new();
        scheduler.schedule(Duration::from_millis(30), make("late"));
        scheduler.schedule(Duration::from_millis(10), make("early"));
        scheduler.schedule(Duration::from_millis(20), make("middle"));

        assert_eq!(scheduler.update(Duration::from_millis(50)), 3);
        assert_eq!(*log.lock().unwrap(), vec!["early", "middle", "late"]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_ties_fire_in_insertion_order() {
        let (log, make) = recorder();
        let mut scheduler = TaskScheduler::new();
        for name in ["a", "b", "c", "d"] {
            scheduler.schedule(Duration::from_millis(5), make(name));
        }
        scheduler.update(Duration::from_millis(5));
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_not_due_does_not_fire() {
        let (log, make) = recorder();
        let mut scheduler = TaskScheduler::new();
        scheduler.schedule(Duration::from_millis(100), make("x"));
        assert_eq!(scheduler.update(Duration::from_millis(99)), 0);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(scheduler.next_due(), Some(Duration::from_millis(1)));
        assert_eq!(scheduler.update(Duration::from_millis(1)), 1);
    }

    #[test]
    fn test_repeat_uses_original_interval() {
        let fired_at = Arc::new(Mutex::new(Vec::new()));
        let fired = Arc::clone(&fired_at);
        let mut scheduler = TaskScheduler::new();
        scheduler.schedule(Duration::from_millis(10), move |ctx| {
            fired.lock().unwrap().push(ctx.now());
            ctx.repeat();
        });

        // One large slice fires the task only once
        scheduler.update(Duration::from_millis(25));
        assert_eq!(fired_at.lock().unwrap().len(), 1);

        scheduler.update(Duration::from_millis(9));
        assert_eq!(fired_at.lock().unwrap().len(), 1);
        scheduler.update(Duration::from_millis(1));

        let times = fired_at.lock().unwrap().clone();
        assert_eq!(
            times,
            vec![Duration::from_millis(25), Duration::from_millis(35)]
        );
        assert!(times[1] >= times[0] + Duration::from_millis(10));
    }

    #[test]
    fn test_repeat_after_changes_delay() {
        let count = Arc::new(Mutex::new(0));
        let c = Arc::clone(&count);
        let mut scheduler = TaskScheduler::new();
        let id = scheduler.schedule(Duration::from_millis(10), move |ctx| {
            *c.lock().unwrap() += 1;
            ctx.repeat_after(Duration::from_millis(50));
        });

        scheduler.update(Duration::from_millis(10));
        assert_eq!(scheduler.due_in(id), Some(Duration::from_millis(50)));
        scheduler.update(Duration::from_millis(50));
        assert_eq!(*count.lock().unwrap(), 2);
    }

    #[test]
    fn test_task_cancels_itself() {
        let count = Arc::new(Mutex::new(0));
        let c = Arc::clone(&count);
        let mut scheduler = TaskScheduler::new();
        scheduler.schedule_repeating(Duration::from_millis(10), move |ctx| {
            let mut n = c.lock().unwrap();
            *n += 1;
            if *n == 3 {
                ctx.cancel();
            }
        });

        for _ in 0..10 {
            scheduler.update(Duration::from_millis(10));
        }
        assert_eq!(*count.lock().unwrap(), 3);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_cancel_by_id_and_group() {
        let (log, make) = recorder();
        let mut scheduler = TaskScheduler::new();
        let a = scheduler.schedule(Duration::from_millis(10), make("a"));
        scheduler.schedule_in_group(7, Duration::from_millis(10), make("g1"));
        scheduler.schedule_in_group(7, Duration::from_millis(20), make("g2"));
        scheduler.schedule(Duration::from_millis(10), make("b"));

        assert!(scheduler.cancel(a));
        assert!(!scheduler.cancel(a));
        assert_eq!(scheduler.cancel_group(7), 2);
        assert_eq!(scheduler.len(), 1);

        scheduler.update(Duration::from_millis(30));
        assert_eq!(*log.lock().unwrap(), vec!["b"]);
        assert!(!scheduler.cancel(a));
    }

    #[test]
    fn test_shutdown_refuses_repeat() {
        let count = Arc::new(Mutex::new(0));
        let refused = Arc::new(Mutex::new(false));
        let (c, r) = (Arc::clone(&count), Arc::clone(&refused));
        let mut scheduler = TaskScheduler::new();
        scheduler.schedule(Duration::from_millis(10), move |ctx| {
            *c.lock().unwrap() += 1;
            if !ctx.repeat() {
                *r.lock().unwrap() = ctx.is_shutting_down();
            }
        });

        scheduler.update(Duration::from_millis(10));
        scheduler.begin_shutdown();
        scheduler.update(Duration::from_millis(10));
        scheduler.update(Duration::from_millis(10));

        assert_eq!(*count.lock().unwrap(), 2);
        assert!(*refused.lock().unwrap());
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_task_schedules_follow_up_after_pass() {
        let (log, make) = recorder();
        let follow_up = Mutex::new(Some(make("follow-up")));
        let mut scheduler = TaskScheduler::new();
        scheduler.schedule(Duration::ZERO, move |ctx| {
            if let Some(callback) = follow_up.lock().unwrap().take() {
                ctx.schedule(Duration::ZERO, callback);
            }
        });

        assert_eq!(scheduler.update(Duration::ZERO), 1);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(scheduler.update(Duration::ZERO), 1);
        assert_eq!(*log.lock().unwrap(), vec!["follow-up"]);
    }
}
