//! Bounded worker pool that runs partition generators and readers.
//!
//! Tasks run on the blocking pool of a dedicated tokio runtime, capped at
//! `num_workers` OS threads. Every task goes through one wrapper that turns
//! an error or a panic into a [`StreamThreadException`] on the shared queue,
//! followed by the task's terminal item. Nothing crosses back to the
//! coordinator except through the queue.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;
use tributary_types::{ConnectorError, StreamName};

use crate::errors::ReadError;
use crate::queue::{QueueItem, QueueSender, StreamThreadException};

pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 10_000;

/// How long `check_for_errors_and_shutdown` waits for tasks that already
/// posted their terminal item to return.
const TASK_SETTLE_GRACE: Duration = Duration::from_secs(2);
const TASK_SETTLE_POLL: Duration = Duration::from_millis(5);

/// Unit of work executed on a worker thread.
pub trait PoolTask: Send {
    /// Stream the task works for; used to tag failures.
    fn stream_name(&self) -> &StreamName;

    /// Do the work, pushing results onto the shared queue.
    ///
    /// # Errors
    ///
    /// Any error is reported to the coordinator as a
    /// [`StreamThreadException`] before the terminal item.
    fn run(&mut self) -> Result<(), ConnectorError>;

    /// Item posted after `run` returns, whatever the outcome.
    fn into_terminal(self: Box<Self>, succeeded: bool) -> QueueItem;
}

/// Where the coordinator sends work.
pub trait TaskSubmitter: Send + Sync {
    fn submit(&self, task: Box<dyn PoolTask>);

    /// Stop accepting work and skip tasks that have not started yet.
    /// Never waits for running tasks.
    fn shutdown(&self);
}

/// Bookkeeping of in-flight tasks, shared with the partition enqueuer for
/// backpressure.
#[derive(Debug)]
pub struct TaskTracker {
    handles: Mutex<Vec<JoinHandle<()>>>,
    max_concurrent_tasks: usize,
    logging_threshold: usize,
    cancelled: AtomicBool,
}

impl TaskTracker {
    #[must_use]
    pub fn new(max_concurrent_tasks: usize) -> Self {
        Self {
            handles: Mutex::new(Vec::new()),
            max_concurrent_tasks,
            logging_threshold: max_concurrent_tasks.saturating_mul(2),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Drop finished handles once the limit is reached and report whether
    /// the number of in-flight tasks is still at or above the limit.
    pub fn prune_to_validate_has_reached_futures_limit(&self) -> bool {
        let mut handles = self.handles.lock();
        if handles.len() >= self.max_concurrent_tasks {
            handles.retain(|h| !h.is_finished());
        }
        if handles.len() > self.logging_threshold {
            tracing::warn!(
                pending = handles.len(),
                threshold = self.logging_threshold,
                "Pending task count exceeds logging threshold"
            );
        }
        handles.len() >= self.max_concurrent_tasks
    }

    /// Tasks that have not finished yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.handles.lock().iter().filter(|h| !h.is_finished()).count()
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.pending() == 0
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn track(&self, handle: JoinHandle<()>) {
        self.handles.lock().push(handle);
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        for handle in self.handles.lock().iter() {
            handle.abort();
        }
    }

    fn wait_until_done(&self, grace: Duration) -> usize {
        let deadline = Instant::now() + grace;
        loop {
            let pending = self.pending();
            if pending == 0 || Instant::now() >= deadline {
                return pending;
            }
            thread::sleep(TASK_SETTLE_POLL);
        }
    }
}

/// Fixed-size pool of worker threads.
pub struct ThreadPoolManager {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    tracker: Arc<TaskTracker>,
    queue: QueueSender,
}

impl ThreadPoolManager {
    /// Start a pool with `num_workers` threads.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::Runtime`] if the worker runtime cannot be built.
    pub fn new(
        num_workers: usize,
        max_concurrent_tasks: usize,
        queue: QueueSender,
    ) -> Result<Self, ReadError> {
        // Only the blocking pool is used; the runtime itself is never driven.
        let runtime = tokio::runtime::Builder::new_current_thread()
            .max_blocking_threads(num_workers.max(1))
            .thread_name("workerpool")
            .build()?;
        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            handle,
            tracker: Arc::new(TaskTracker::new(max_concurrent_tasks)),
            queue,
        })
    }

    #[must_use]
    pub fn tracker(&self) -> Arc<TaskTracker> {
        Arc::clone(&self.tracker)
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.tracker.is_done()
    }

    /// Shut the pool down, failing if tasks outlived the read.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::TasksNotDone`] when tasks are still running after
    /// a short grace period. The pool is shut down either way.
    pub fn check_for_errors_and_shutdown(&self) -> Result<(), ReadError> {
        let pending = self.tracker.wait_until_done(TASK_SETTLE_GRACE);
        self.shutdown();
        if pending > 0 {
            tracing::error!(pending, "Worker tasks still running at end of read");
            return Err(ReadError::TasksNotDone(pending));
        }
        Ok(())
    }
}

impl TaskSubmitter for ThreadPoolManager {
    fn submit(&self, task: Box<dyn PoolTask>) {
        if self.tracker.is_cancelled() {
            tracing::debug!(stream = %task.stream_name(), "Pool shut down; dropping task");
            return;
        }
        let queue = self.queue.clone();
        let tracker = Arc::clone(&self.tracker);
        let handle = self
            .handle
            .spawn_blocking(move || run_task(task, &queue, &tracker));
        self.tracker.track(handle);
    }

    fn shutdown(&self) {
        self.tracker.cancel();
        if let Some(runtime) = self.runtime.lock().take() {
            tracing::debug!("Shutting down worker pool");
            runtime.shutdown_background();
        }
    }
}

impl Drop for ThreadPoolManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Failure-capture wrapper around every pool task.
fn run_task(mut task: Box<dyn PoolTask>, queue: &QueueSender, tracker: &TaskTracker) {
    let stream_name = task.stream_name().clone();
    if tracker.is_cancelled() {
        tracing::debug!(stream = %stream_name, "Pool shut down before task started; skipping");
        return;
    }

    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
        Ok(result) => result,
        Err(payload) => Err(ConnectorError::internal(
            "WORKER_PANIC",
            panic_message(payload.as_ref()),
        )),
    };

    let succeeded = outcome.is_ok();
    if let Err(error) = outcome {
        let exception = StreamThreadException::new(stream_name.clone(), error);
        if queue.put(QueueItem::Exception(exception)).is_err() {
            tracing::debug!(stream = %stream_name, "Queue closed; dropping task exception");
            return;
        }
    }
    if queue.put(task.into_terminal(succeeded)).is_err() {
        tracing::debug!(stream = %stream_name, "Queue closed; dropping terminal item");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker task panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    use crate::partition::Record;
    use crate::queue::shared_queue;

    struct EchoTask {
        stream: StreamName,
        fail: Option<&'static str>,
        panic: bool,
        queue: QueueSender,
    }

    impl PoolTask for EchoTask {
        fn stream_name(&self) -> &StreamName {
            &self.stream
        }

        fn run(&mut self) -> Result<(), ConnectorError> {
            if self.panic {
                panic!("reader exploded");
            }
            self.queue.put(QueueItem::Record(Record::new(
                self.stream.clone(),
                serde_json::Map::new(),
            )))?;
            match self.fail {
                Some(msg) => Err(ConnectorError::data("BOOM", msg)),
                None => Ok(()),
            }
        }

        fn into_terminal(self: Box<Self>, succeeded: bool) -> QueueItem {
            let code = if succeeded { "ok" } else { "failed" };
            QueueItem::Exception(StreamThreadException::new(
                self.stream,
                ConnectorError::internal(code, "terminal"),
            ))
        }
    }

    fn task(queue: &QueueSender, fail: Option<&'static str>, panic: bool) -> Box<dyn PoolTask> {
        Box::new(EchoTask {
            stream: StreamName::new("users"),
            fail,
            panic,
            queue: queue.clone(),
        })
    }

    fn terminal_code(item: QueueItem) -> String {
        match item {
            QueueItem::Exception(exc) if exc.error.message == "terminal" => exc.error.code,
            other => panic!("expected terminal item, got {other:?}"),
        }
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn successful_task_posts_terminal_after_output() {
        let (tx, rx) = shared_queue(16);
        let pool = ThreadPoolManager::new(2, 10, tx.clone()).unwrap();
        pool.submit(task(&tx, None, false));

        assert!(matches!(rx.get(WAIT).unwrap(), QueueItem::Record(_)));
        assert_eq!(terminal_code(rx.get(WAIT).unwrap()), "ok");
        pool.check_for_errors_and_shutdown().unwrap();
    }

    #[test]
    fn failing_task_posts_exception_then_unsuccessful_terminal() {
        let (tx, rx) = shared_queue(16);
        let pool = ThreadPoolManager::new(2, 10, tx.clone()).unwrap();
        pool.submit(task(&tx, Some("bad row"), false));

        assert!(matches!(rx.get(WAIT).unwrap(), QueueItem::Record(_)));
        match rx.get(WAIT).unwrap() {
            QueueItem::Exception(exc) => {
                assert_eq!(exc.stream_name.as_str(), "users");
                assert_eq!(exc.error.code, "BOOM");
            }
            other => panic!("expected exception, got {other:?}"),
        }
        assert_eq!(terminal_code(rx.get(WAIT).unwrap()), "failed");
    }

    #[test]
    fn panicking_task_is_captured() {
        let (tx, rx) = shared_queue(16);
        let pool = ThreadPoolManager::new(1, 10, tx.clone()).unwrap();
        pool.submit(task(&tx, None, true));

        match rx.get(WAIT).unwrap() {
            QueueItem::Exception(exc) => {
                assert_eq!(exc.error.code, "WORKER_PANIC");
                assert!(exc.error.message.contains("reader exploded"));
            }
            other => panic!("expected exception, got {other:?}"),
        }
        assert_eq!(terminal_code(rx.get(WAIT).unwrap()), "failed");
    }

    /// Task that flags that it ran, optionally signalling its start and
    /// holding its worker until released.
    struct GateTask {
        stream: StreamName,
        started: Option<mpsc::Sender<()>>,
        release: Option<mpsc::Receiver<()>>,
        ran: Arc<AtomicBool>,
    }

    impl PoolTask for GateTask {
        fn stream_name(&self) -> &StreamName {
            &self.stream
        }

        fn run(&mut self) -> Result<(), ConnectorError> {
            self.ran.store(true, Ordering::SeqCst);
            if let Some(started) = self.started.take() {
                let _ = started.send(());
            }
            if let Some(release) = &self.release {
                let _ = release.recv();
            }
            Ok(())
        }

        fn into_terminal(self: Box<Self>, succeeded: bool) -> QueueItem {
            let code = if succeeded { "ok" } else { "failed" };
            QueueItem::Exception(StreamThreadException::new(
                self.stream,
                ConnectorError::internal(code, "terminal"),
            ))
        }
    }

    #[test]
    fn shutdown_skips_queued_tasks_without_waiting_for_running_one() {
        let (tx, rx) = shared_queue(16);
        let pool = ThreadPoolManager::new(1, 10, tx).unwrap();
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();

        pool.submit(Box::new(GateTask {
            stream: StreamName::new("users"),
            started: Some(started_tx),
            release: Some(release_rx),
            ran: Arc::new(AtomicBool::new(false)),
        }));
        let queued: Vec<Arc<AtomicBool>> =
            (0..3).map(|_| Arc::new(AtomicBool::new(false))).collect();
        for ran in &queued {
            pool.submit(Box::new(GateTask {
                stream: StreamName::new("orders"),
                started: None,
                release: None,
                ran: Arc::clone(ran),
            }));
        }
        started_rx.recv_timeout(WAIT).unwrap();

        let begin = Instant::now();
        pool.shutdown();
        assert!(begin.elapsed() < Duration::from_secs(1), "shutdown blocked");

        release_tx.send(()).unwrap();
        assert_eq!(terminal_code(rx.get(WAIT).unwrap()), "ok");
        let deadline = Instant::now() + WAIT;
        while !pool.is_done() {
            assert!(Instant::now() < deadline, "queued tasks never settled");
            thread::sleep(Duration::from_millis(5));
        }
        assert!(queued.iter().all(|ran| !ran.load(Ordering::SeqCst)));
        assert!(rx.try_get().is_none());
    }

    #[test]
    fn submit_after_shutdown_is_dropped() {
        let (tx, rx) = shared_queue(16);
        let pool = ThreadPoolManager::new(1, 10, tx.clone()).unwrap();
        pool.shutdown();
        pool.submit(task(&tx, None, false));
        assert!(rx.try_get().is_none());
        assert!(pool.is_done());
    }

    #[test]
    fn tracker_reports_limit_until_tasks_finish() {
        let (tx, rx) = shared_queue(16);
        let pool = ThreadPoolManager::new(2, 1, tx.clone()).unwrap();
        let tracker = pool.tracker();
        assert!(!tracker.prune_to_validate_has_reached_futures_limit());

        pool.submit(task(&tx, None, false));
        rx.get(WAIT).unwrap();
        rx.get(WAIT).unwrap();

        let deadline = Instant::now() + WAIT;
        while tracker.prune_to_validate_has_reached_futures_limit() {
            assert!(Instant::now() < deadline, "task never finished");
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(tracker.pending(), 0);
    }
}
