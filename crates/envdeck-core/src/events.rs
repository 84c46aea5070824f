//! Callback surfaces shared by every long-running operation.
//!
//! Operations never touch presentation state directly. They push output lines
//! and progress fractions into sinks, and callers that need the work off their
//! own thread wrap it with [`spawn_operation`] and drain the resulting events.

use std::panic;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

pub trait LineSink {
    fn line(&mut self, seq: u64, text: &str);
}

impl<F> LineSink for F
where
    F: FnMut(u64, &str),
{
    fn line(&mut self, seq: u64, text: &str) {
        self(seq, text)
    }
}

pub trait ProgressSink {
    /// `fraction` is in `0.0..=1.0`.
    fn progress(&mut self, fraction: f64);
}

impl<F> ProgressSink for F
where
    F: FnMut(f64),
{
    fn progress(&mut self, fraction: f64) {
        self(fraction)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LineSink for NullSink {
    fn line(&mut self, _seq: u64, _text: &str) {}
}

impl ProgressSink for NullSink {
    fn progress(&mut self, _fraction: f64) {}
}

/// Forwards only non-decreasing fractions, clamped to `0.0..=1.0`.
#[derive(Debug)]
pub struct MonotonicProgress<S> {
    inner: S,
    last: Option<f64>,
}

impl<S: ProgressSink> MonotonicProgress<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, last: None }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: ProgressSink> ProgressSink for MonotonicProgress<S> {
    fn progress(&mut self, fraction: f64) {
        if fraction.is_nan() {
            return;
        }
        let bounded = fraction.clamp(0.0, 1.0);
        if self.last.is_some_and(|last| bounded < last) {
            return;
        }
        self.last = Some(bounded);
        self.inner.progress(bounded);
    }
}

#[derive(Debug)]
pub enum OperationEvent<T, E> {
    Line { seq: u64, text: String },
    Progress(f64),
    Finished(Result<T, E>),
}

/// Sink handed to a background operation; forwards everything to its handle.
pub struct OperationReporter<T, E> {
    tx: Sender<OperationEvent<T, E>>,
    next_seq: u64,
    progress_floor: Option<f64>,
}

impl<T, E> OperationReporter<T, E> {
    fn new(tx: Sender<OperationEvent<T, E>>) -> Self {
        Self {
            tx,
            next_seq: 1,
            progress_floor: None,
        }
    }

    /// Starts a new progress phase; the next fraction may be lower than the last one.
    pub fn restart_progress(&mut self) {
        self.progress_floor = None;
    }
}

impl<T, E> LineSink for OperationReporter<T, E> {
    fn line(&mut self, _seq: u64, text: &str) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let _ = self.tx.send(OperationEvent::Line {
            seq,
            text: text.to_string(),
        });
    }
}

impl<T, E> ProgressSink for OperationReporter<T, E> {
    fn progress(&mut self, fraction: f64) {
        if fraction.is_nan() {
            return;
        }
        let bounded = fraction.clamp(0.0, 1.0);
        if self.progress_floor.is_some_and(|floor| bounded < floor) {
            return;
        }
        self.progress_floor = Some(bounded);
        let _ = self.tx.send(OperationEvent::Progress(bounded));
    }
}

pub struct OperationHandle<T, E> {
    rx: Receiver<OperationEvent<T, E>>,
    worker: Option<JoinHandle<()>>,
}

impl<T, E> OperationHandle<T, E> {
    /// Blocks until the operation finishes, handing every intermediate event to
    /// `on_event`. A panic in the worker is resumed on the calling thread.
    pub fn finish<F>(self, mut on_event: F) -> Result<T, E>
    where
        F: FnMut(&OperationEvent<T, E>),
    {
        let Self { rx, worker } = self;
        for event in rx.iter() {
            if let OperationEvent::Finished(result) = event {
                join_worker(worker);
                return result;
            }
            on_event(&event);
        }

        // The sender only disappears without a Finished event if the worker died.
        match worker.map(JoinHandle::join) {
            Some(Err(payload)) => panic::resume_unwind(payload),
            _ => unreachable!("operation worker exited without reporting a result"),
        }
    }
}

fn join_worker(worker: Option<JoinHandle<()>>) {
    if let Some(worker) = worker {
        if let Err(payload) = worker.join() {
            panic::resume_unwind(payload);
        }
    }
}

/// Runs `operation` on a worker thread.
///
/// Line sequence numbers are renumbered from 1 per operation and progress
/// is monotonic; `Finished` is always the final event.
pub fn spawn_operation<T, E, F>(operation: F) -> OperationHandle<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
    F: FnOnce(&mut OperationReporter<T, E>) -> Result<T, E> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let worker = thread::spawn(move || {
        let mut reporter = OperationReporter::new(tx);
        let result = operation(&mut reporter);
        let _ = reporter.tx.send(OperationEvent::Finished(result));
    });

    OperationHandle {
        rx,
        worker: Some(worker),
    }
}
