//! Single-threaded cooperative task scheduler.
//!
//! A [`Timeline`] is a cheap, cloneable handle that submits work over a
//! channel to one [`Executor`], which owns the server state and runs every
//! task to completion on its own thread. Tasks run in due-time order; tasks
//! due at the same instant run in submission order.
//!
//! Recurring work implements [`RecurringTask`] and is submitted once. The
//! executor re-submits it after every run, whether that run succeeded, failed
//! or panicked.

use std::any::Any;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{self, AtomicU64};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::error::ServerError;

/// A one-shot unit of work.
pub type Task<S> = Box<dyn FnOnce(&mut S, &Timeline<S>) -> anyhow::Result<()> + Send>;

/// Work that runs repeatedly with its own delay policy.
pub trait RecurringTask<S>: Send {
    /// Label used in logs.
    fn name(&self) -> &'static str;

    fn run(&mut self, state: &mut S, timeline: &Timeline<S>) -> anyhow::Result<()>;

    /// Delay between the end of one run and the start of the next.
    fn next_delay(&self) -> Duration;
}

enum Job<S> {
    Once(Task<S>),
    Recurring(Box<dyn RecurringTask<S>>),
}

enum Command<S> {
    Submit(Entry<S>),
    Shutdown,
}

struct Entry<S> {
    due: Instant,
    seq: u64,
    job: Job<S>,
}

impl<S> PartialEq for Entry<S> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<S> Eq for Entry<S> {}

impl<S> Ord for Entry<S> {
    // Reversed so the max-heap pops the earliest (due, seq) first.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.due, other.seq).cmp(&(self.due, self.seq))
    }
}

impl<S> PartialOrd for Entry<S> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ---------------------------------------------------------------------------
// Timeline (submission handle)
// ---------------------------------------------------------------------------

pub struct Timeline<S> {
    sender: Sender<Command<S>>,
    seq: Arc<AtomicU64>,
}

impl<S> Clone for Timeline<S> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            seq: Arc::clone(&self.seq),
        }
    }
}

impl<S> Timeline<S> {
    /// Run `task` as soon as every earlier "now" task has run.
    pub fn schedule_now<F>(&self, task: F) -> Result<(), ServerError>
    where
        F: FnOnce(&mut S, &Timeline<S>) -> anyhow::Result<()> + Send + 'static,
    {
        self.schedule_at(Instant::now(), task)
    }

    /// Run `task` no earlier than `delay` from now.
    pub fn schedule_in<F>(&self, delay: Duration, task: F) -> Result<(), ServerError>
    where
        F: FnOnce(&mut S, &Timeline<S>) -> anyhow::Result<()> + Send + 'static,
    {
        self.schedule_at(Instant::now() + delay, task)
    }

    pub fn schedule_at<F>(&self, due: Instant, task: F) -> Result<(), ServerError>
    where
        F: FnOnce(&mut S, &Timeline<S>) -> anyhow::Result<()> + Send + 'static,
    {
        self.submit(due, Job::Once(Box::new(task)))
    }

    /// Submit a recurring task once; its first run is after `initial_delay`.
    pub fn schedule_recurring<T>(&self, initial_delay: Duration, task: T) -> Result<(), ServerError>
    where
        T: RecurringTask<S> + 'static,
    {
        self.submit(Instant::now() + initial_delay, Job::Recurring(Box::new(task)))
    }

    /// Ask the executor to stop. One-shot tasks that are already due still
    /// run; delayed and recurring work is dropped.
    pub fn shutdown(&self) {
        // A closed channel means the executor is already gone.
        let _ = self.sender.send(Command::Shutdown);
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, atomic::Ordering::Relaxed)
    }

    fn submit(&self, due: Instant, job: Job<S>) -> Result<(), ServerError> {
        let entry = Entry {
            due,
            seq: self.next_seq(),
            job,
        };
        self.sender
            .send(Command::Submit(entry))
            .map_err(|_| ServerError::SchedulerStopped)
    }
}

// ---------------------------------------------------------------------------
// Executor (worker side)
// ---------------------------------------------------------------------------

pub struct Executor<S> {
    receiver: Receiver<Command<S>>,
    timeline: Timeline<S>,
    queue: BinaryHeap<Entry<S>>,
    stopping: bool,
}

/// Create a connected timeline handle and executor.
pub fn timeline<S>() -> (Timeline<S>, Executor<S>) {
    let (sender, receiver) = mpsc::channel();
    let timeline = Timeline {
        sender,
        seq: Arc::new(AtomicU64::new(0)),
    };
    let executor = Executor {
        receiver,
        timeline: timeline.clone(),
        queue: BinaryHeap::new(),
        stopping: false,
    };
    (timeline, executor)
}

impl<S> Executor<S> {
    /// Run tasks until [`Timeline::shutdown`] is called, then hand the state
    /// back.
    pub fn run(mut self, mut state: S) -> S {
        debug!("timeline started");

        while !self.stopping {
            self.accept_pending();
            if self.stopping {
                break;
            }

            let now = Instant::now();
            match self.queue.peek().map(|entry| entry.due) {
                Some(due) if due <= now => {
                    if let Some(entry) = self.queue.pop() {
                        self.execute(entry, &mut state);
                    }
                }
                Some(due) => self.wait(Some(due - now)),
                None => self.wait(None),
            }
        }

        self.drain(&mut state);
        debug!(dropped = self.queue.len(), "timeline stopped");
        state
    }

    /// Run every task that is due right now without blocking, including tasks
    /// those tasks schedule for now. Returns how many ran.
    pub fn run_pending(&mut self, state: &mut S) -> usize {
        let mut executed = 0;
        loop {
            self.accept_pending();
            match self.queue.peek() {
                Some(entry) if entry.due <= Instant::now() => {}
                _ => return executed,
            }
            if let Some(entry) = self.queue.pop() {
                self.execute(entry, state);
                executed += 1;
            }
        }
    }

    fn accept(&mut self, command: Command<S>) {
        match command {
            Command::Submit(entry) => self.queue.push(entry),
            Command::Shutdown => self.stopping = true,
        }
    }

    fn accept_pending(&mut self) {
        while let Ok(command) = self.receiver.try_recv() {
            self.accept(command);
        }
    }

    /// Block until a command arrives or `timeout` elapses. The executor
    /// holds a sender of its own, so the channel never disconnects.
    fn wait(&mut self, timeout: Option<Duration>) {
        let received = match timeout {
            Some(timeout) => self.receiver.recv_timeout(timeout).ok(),
            None => self.receiver.recv().ok(),
        };
        if let Some(command) = received {
            self.accept(command);
        }
    }

    fn drain(&mut self, state: &mut S) {
        loop {
            self.accept_pending();
            match self.queue.peek() {
                Some(entry) if entry.due <= Instant::now() => {}
                _ => return,
            }
            if let Some(entry) = self.queue.pop() {
                if matches!(entry.job, Job::Once(_)) {
                    self.execute(entry, state);
                }
            }
        }
    }

    fn execute(&mut self, entry: Entry<S>, state: &mut S) {
        let timeline = &self.timeline;
        match entry.job {
            Job::Once(task) => {
                let outcome = catch_unwind(AssertUnwindSafe(move || task(state, timeline)));
                report("task", outcome);
            }
            Job::Recurring(mut task) => {
                let outcome = catch_unwind(AssertUnwindSafe(|| task.run(state, timeline)));
                report(task.name(), outcome);

                if !self.stopping {
                    let due = Instant::now() + task.next_delay();
                    let seq = self.timeline.next_seq();
                    self.queue.push(Entry {
                        due,
                        seq,
                        job: Job::Recurring(task),
                    });
                }
            }
        }
    }
}

fn report(name: &str, outcome: std::thread::Result<anyhow::Result<()>>) {
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(task = name, error = %format!("{e:#}"), "task failed"),
        Err(payload) => error!(task = name, panic = %panic_message(payload.as_ref()), "task panicked"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
