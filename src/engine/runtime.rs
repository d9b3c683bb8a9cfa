//! Run loop around the engine.
//!
//! The engine itself never does I/O. This module supplies the glue a caller
//! needs to feed it: a `LineSource` abstraction, pre/post hooks run around each
//! `process` call, and `EngineRuntime`, a single worker thread fed by a bounded
//! channel so any number of producers can submit lines without racing each
//! other.

use std::io::BufRead;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::error::{panic_message, BoxError, EngineError, EngineResult, ExecutionError};

use super::{Engine, ProcessReport};

/// Called with no arguments before or after each `process` call.
pub type Hook = Arc<dyn Fn() + Send + Sync>;

/// Receives the report of every processed line.
pub type ReportSink = Arc<dyn Fn(&ProcessReport) + Send + Sync>;

/// Anything that yields raw lines.
pub trait LineSource {
    /// Next line, `None` once the source is exhausted.
    fn next_line(&mut self) -> Option<Result<String, BoxError>>;
}

/// Line source over an iterator of strings.
#[derive(Debug, Clone)]
pub struct IterSource<I> {
    inner: I,
}

impl<I> IterSource<I> {
    pub fn new(inner: I) -> Self {
        Self { inner }
    }
}

impl<I, S> LineSource for IterSource<I>
where
    I: Iterator<Item = S>,
    S: Into<String>,
{
    fn next_line(&mut self) -> Option<Result<String, BoxError>> {
        self.inner.next().map(|s| Ok(s.into()))
    }
}

/// Line source over a buffered reader. Trailing `\r\n` / `\n` is stripped.
#[derive(Debug)]
pub struct ReaderSource<R> {
    reader: R,
    buf: String,
}

impl<R: BufRead> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: String::new(),
        }
    }
}

impl<R: BufRead> LineSource for ReaderSource<R> {
    fn next_line(&mut self) -> Option<Result<String, BoxError>> {
        self.buf.clear();
        match self.reader.read_line(&mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                let line = self.buf.trim_end_matches(['\r', '\n']);
                Some(Ok(line.to_string()))
            }
            Err(e) => Some(Err(e.into())),
        }
    }
}

/// Hooks run around every processed line.
#[derive(Clone, Default)]
pub struct RuntimeHooks {
    before: Vec<Hook>,
    after: Vec<Hook>,
    on_report: Option<ReportSink>,
}

impl RuntimeHooks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn before(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.before.push(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn after(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.after.push(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn on_report(mut self, sink: impl Fn(&ProcessReport) + Send + Sync + 'static) -> Self {
        self.on_report = Some(Arc::new(sink));
        self
    }

    fn run_hooks(hooks: &[Hook], stage: &'static str) {
        for hook in hooks {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| hook())) {
                warn!(stage, error = %panic_message(payload.as_ref()), "runtime hook panicked");
            }
        }
    }
}

impl std::fmt::Debug for RuntimeHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeHooks")
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .field("on_report", &self.on_report.is_some())
            .finish()
    }
}

/// Totals from driving a `LineSource` to exhaustion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub lines: u64,
    pub fired: u64,
    pub transform_failures: u64,
    pub callback_failures: u64,
}

impl RunSummary {
    fn absorb(&mut self, report: &ProcessReport) {
        self.lines += 1;
        self.fired += report.fired.len() as u64;
        self.transform_failures += report.transform_failures.len() as u64;
        self.callback_failures += report.callback_failures.len() as u64;
    }
}

/// One line through hooks and engine.
fn process_line(engine: &Engine, hooks: &RuntimeHooks, line: &str) -> EngineResult<ProcessReport> {
    RuntimeHooks::run_hooks(&hooks.before, "before");
    let result = engine.process(line);
    RuntimeHooks::run_hooks(&hooks.after, "after");
    if let (Ok(report), Some(sink)) = (&result, &hooks.on_report) {
        sink(report);
    }
    result
}

/// Drive `source` through `engine` on the current thread until it is exhausted.
///
/// A failing source stops the loop; the error is returned and nothing is
/// retried.
pub fn run_source(
    engine: &Engine,
    hooks: &RuntimeHooks,
    source: &mut dyn LineSource,
) -> EngineResult<RunSummary> {
    let mut summary = RunSummary::default();
    while let Some(next) = source.next_line() {
        let line = next.map_err(|e| {
            EngineError::Execution(ExecutionError::Source {
                message: e.to_string(),
            })
        })?;
        let report = process_line(engine, hooks, &line)?;
        summary.absorb(&report);
    }
    Ok(summary)
}

enum Job {
    Line(String),
    Flush(Sender<()>),
}

/// Engine running on a dedicated worker thread.
///
/// Lines submitted from any thread are processed one at a time, in submission
/// order.
pub struct EngineRuntime {
    engine: Arc<Engine>,
    hooks: RuntimeHooks,
    tx: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    queue_capacity: usize,
    dropped: AtomicU64,
    processed: Arc<AtomicU64>,
}

impl EngineRuntime {
    /// Spawn the worker thread. Registration must be complete: the engine is
    /// shared immutably from here on.
    pub fn start(engine: Engine, config: RuntimeConfig, hooks: RuntimeHooks) -> EngineResult<Self> {
        config.validate()?;
        let engine = Arc::new(engine);
        let (tx, rx) = bounded::<Job>(config.queue_capacity);
        let processed = Arc::new(AtomicU64::new(0));

        let worker_engine = Arc::clone(&engine);
        let worker_hooks = hooks.clone();
        let worker_processed = Arc::clone(&processed);
        let worker = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || worker_loop(&worker_engine, &worker_hooks, &worker_processed, &rx))
            .map_err(|e| EngineError::internal(format!("failed to spawn engine worker: {e}")))?;

        debug!(thread = %config.thread_name, capacity = config.queue_capacity, "engine runtime started");

        Ok(Self {
            engine,
            hooks,
            tx: Some(tx),
            worker: Some(worker),
            queue_capacity: config.queue_capacity,
            dropped: AtomicU64::new(0),
            processed,
        })
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    fn sender(&self) -> EngineResult<&Sender<Job>> {
        self.tx.as_ref().ok_or_else(disconnected)
    }

    /// Non-blocking enqueue. A full queue counts the line as dropped.
    pub fn submit(&self, line: impl Into<String>) -> EngineResult<()> {
        match self.sender()?.try_send(Job::Line(line.into())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(EngineError::Execution(ExecutionError::QueueFull {
                    path: "lines".to_string(),
                    capacity: self.queue_capacity,
                }))
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(disconnected())
            }
        }
    }

    /// Enqueue, waiting for room in the queue.
    pub fn submit_blocking(&self, line: impl Into<String>) -> EngineResult<()> {
        self.sender()?
            .send(Job::Line(line.into()))
            .map_err(|_| disconnected())
    }

    /// Block until every line submitted before this call has been processed.
    pub fn flush(&self) -> EngineResult<()> {
        let (reply_tx, reply_rx) = bounded::<()>(1);
        self.sender()?
            .send(Job::Flush(reply_tx))
            .map_err(|_| disconnected())?;
        reply_rx.recv().map_err(|_| disconnected())
    }

    /// Drive `source` on the calling thread. Calls are serialized with the
    /// worker by the engine's own lock.
    pub fn run(&self, source: &mut dyn LineSource) -> EngineResult<RunSummary> {
        run_source(&self.engine, &self.hooks, source)
    }

    #[must_use]
    pub fn dropped_lines(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn processed_lines(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Close the queue, let the worker drain it, and join.
    pub fn shutdown(mut self) -> EngineResult<()> {
        self.stop()
    }

    fn stop(&mut self) -> EngineResult<()> {
        drop(self.tx.take());
        if let Some(handle) = self.worker.take() {
            handle
                .join()
                .map_err(|_| EngineError::internal("engine worker panicked"))?;
        }
        Ok(())
    }
}

impl Drop for EngineRuntime {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "engine runtime did not shut down cleanly");
        }
    }
}

impl std::fmt::Debug for EngineRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRuntime")
            .field("engine", &self.engine)
            .field("queue_capacity", &self.queue_capacity)
            .field("dropped", &self.dropped_lines())
            .field("processed", &self.processed_lines())
            .finish_non_exhaustive()
    }
}

fn disconnected() -> EngineError {
    EngineError::Execution(ExecutionError::Disconnected {
        path: "lines".to_string(),
    })
}

fn worker_loop(engine: &Engine, hooks: &RuntimeHooks, processed: &AtomicU64, rx: &Receiver<Job>) {
    for job in rx {
        match job {
            Job::Line(line) => {
                match process_line(engine, hooks, &line) {
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "line processing failed"),
                }
                processed.fetch_add(1, Ordering::Relaxed);
            }
            Job::Flush(reply) => {
                let _ = reply.send(());
            }
        }
    }
    debug!("engine worker exiting");
}
