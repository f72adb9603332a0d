//! Bounded in-process task runner.
//!
//! A fixed worker pool drains one FIFO queue; each worker owns a single
//! task at a time and runs it to completion. `submit` never blocks: a
//! full queue and a closed runner are surfaced as typed errors for the
//! HTTP layer to translate.
//!
//! A cancellation root (watch channel) is shared with every pipeline
//! run; `close()` flips it, refuses new submissions and waits for the
//! workers to finish their current task.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::pipeline::{self, PipelineContext, StageParam};
use crate::task::store::TaskStore;
use crate::task::TaskStatus;

const DEFAULT_QUEUE_SIZE: usize = 128;
const DEFAULT_WORKERS: usize = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunnerError {
    #[error("task queue is full")]
    QueueFull,
    #[error("task runner stopped")]
    Stopped,
}

#[derive(Debug, Clone, Copy)]
pub struct RunnerConfig {
    pub queue_size: usize,
    pub workers: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            queue_size: DEFAULT_QUEUE_SIZE,
            workers: DEFAULT_WORKERS,
        }
    }
}

impl RunnerConfig {
    fn normalized(mut self) -> Self {
        if self.queue_size == 0 {
            self.queue_size = DEFAULT_QUEUE_SIZE;
        }
        if self.workers == 0 {
            self.workers = DEFAULT_WORKERS;
        }
        self
    }
}

pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Executor = dyn Fn(StageParam, watch::Receiver<bool>) -> JobFuture + Send + Sync;

pub struct Runner {
    queue_tx: mpsc::Sender<StageParam>,
    cancel_tx: watch::Sender<bool>,
    closed: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Runner {
    /// Start a runner that executes submissions through the pipeline
    /// controller.
    pub fn start(ctx: Arc<PipelineContext>, config: RunnerConfig) -> Arc<Self> {
        let store = ctx.store.clone();
        Self::start_with_executor(config, Some(store), move |param, cancel| {
            let ctx = Arc::clone(&ctx);
            Box::pin(async move { pipeline::run(&ctx, param, cancel).await })
        })
    }

    /// Start a runner with a custom executor; the scheduling behaviour
    /// (bounded queue, workers, cancellation) is identical.
    pub fn start_with_executor(
        config: RunnerConfig,
        store: Option<TaskStore>,
        executor: impl Fn(StageParam, watch::Receiver<bool>) -> JobFuture + Send + Sync + 'static,
    ) -> Arc<Self> {
        let config = config.normalized();
        let (queue_tx, queue_rx) = mpsc::channel::<StageParam>(config.queue_size);
        let (cancel_tx, _) = watch::channel(false);

        let executor: Arc<Executor> = Arc::new(executor);
        let queue_rx = Arc::new(Mutex::new(queue_rx));

        let mut handles = Vec::with_capacity(config.workers);
        for worker_id in 1..=config.workers {
            let queue_rx = Arc::clone(&queue_rx);
            let cancel_rx = cancel_tx.subscribe();
            let executor = Arc::clone(&executor);
            let store = store.clone();
            handles.push(tokio::spawn(worker_loop(
                worker_id, queue_rx, cancel_rx, executor, store,
            )));
        }

        Arc::new(Self {
            queue_tx,
            cancel_tx,
            closed: AtomicBool::new(false),
            workers: Mutex::new(handles),
        })
    }

    /// Non-blocking submission. `QueueFull` leaves the queue untouched.
    pub fn submit(&self, param: StageParam) -> Result<(), RunnerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RunnerError::Stopped);
        }
        match self.queue_tx.try_send(param) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(RunnerError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(RunnerError::Stopped),
        }
    }

    /// Number of queued tasks not yet picked up by a worker.
    pub fn pending(&self) -> usize {
        self.queue_tx.max_capacity() - self.queue_tx.capacity()
    }

    /// Stop accepting submissions, signal cancellation and wait for the
    /// workers to drain their current task.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.cancel_tx.send(true);

        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker join failed during close");
            }
        }
        info!("task runner closed");
    }
}

async fn worker_loop(
    worker_id: usize,
    queue_rx: Arc<Mutex<mpsc::Receiver<StageParam>>>,
    mut cancel_rx: watch::Receiver<bool>,
    executor: Arc<Executor>,
    store: Option<TaskStore>,
) {
    loop {
        let param = {
            let mut guard = queue_rx.lock().await;
            tokio::select! {
                _ = cancel_rx.changed() => {
                    if *cancel_rx.borrow() {
                        info!(worker_id, "worker stopping on cancellation");
                        return;
                    }
                    continue;
                }
                param = guard.recv() => match param {
                    Some(param) => param,
                    None => return,
                },
            }
        };

        let task_id = param.task.task_id.clone();
        info!(worker_id, task_id, "worker picked up task");

        // The job runs in its own tokio task so a panic unwinds there,
        // not through the worker; the record is then failed with the
        // recovered payload.
        let job = tokio::spawn((executor)(param, cancel_rx.clone()));
        match job.await {
            Ok(()) => info!(worker_id, task_id, "task finished"),
            Err(join_err) if join_err.is_panic() => {
                let payload = panic_message(join_err.into_panic());
                error!(worker_id, task_id, panic = %payload, "task panicked");
                if let Some(store) = &store {
                    mark_panicked(store, &task_id, &payload).await;
                }
            }
            Err(join_err) => {
                error!(worker_id, task_id, error = %join_err, "task join failed");
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

async fn mark_panicked(store: &TaskStore, task_id: &str, payload: &str) {
    match store.get(task_id).await {
        Ok(Some(mut task)) => {
            task.status = TaskStatus::Failed;
            task.fail_reason = format!("panic: {payload}");
            task.status_message = "任务失败 Failed".into();
            if let Err(e) = store.save(&task).await {
                error!(task_id, error = %e, "failed to persist panicked task");
            }
        }
        Ok(None) => warn!(task_id, "panicked task not found in store"),
        Err(e) => error!(task_id, error = %e, "failed to load panicked task"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing;
    use crate::task::Task;
    use std::time::Duration;

    async fn queue_world() -> testing::TestWorld {
        testing::world_with(Vec::new(), Vec::new()).await
    }

    fn sleeping_executor(
        hold: Duration,
    ) -> impl Fn(StageParam, watch::Receiver<bool>) -> JobFuture + Send + Sync + 'static {
        move |_, mut cancel| {
            Box::pin(async move {
                tokio::select! {
                    _ = tokio::time::sleep(hold) => {}
                    _ = cancel.changed() => {}
                }
            })
        }
    }

    #[tokio::test]
    async fn full_queue_yields_queue_full_synchronously() {
        let world = queue_world().await;
        // One worker held busy forever; capacity 2 fills up behind it.
        let runner = Runner::start_with_executor(
            RunnerConfig {
                queue_size: 2,
                workers: 1,
            },
            None,
            sleeping_executor(Duration::from_secs(60)),
        );

        runner.submit(testing::param_for(&world, "q1")).unwrap();
        // Give the worker time to take q1 off the queue.
        tokio::time::sleep(Duration::from_millis(50)).await;
        runner.submit(testing::param_for(&world, "q2")).unwrap();
        runner.submit(testing::param_for(&world, "q3")).unwrap();
        assert_eq!(runner.pending(), 2);

        let err = runner.submit(testing::param_for(&world, "q4")).unwrap_err();
        assert_eq!(err, RunnerError::QueueFull);
        // The failed submission did not alter the queue.
        assert_eq!(runner.pending(), 2);

        runner.close().await;
    }

    #[tokio::test]
    async fn closed_runner_rejects_submissions() {
        let world = queue_world().await;
        let runner = Runner::start_with_executor(
            RunnerConfig {
                queue_size: 4,
                workers: 1,
            },
            None,
            sleeping_executor(Duration::from_millis(1)),
        );

        runner.close().await;
        let err = runner.submit(testing::param_for(&world, "late")).unwrap_err();
        assert_eq!(err, RunnerError::Stopped);

        // close() is idempotent.
        runner.close().await;
    }

    #[tokio::test]
    async fn submissions_are_processed_fifo_by_one_worker() {
        let world = queue_world().await;
        let order = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
        let seen = Arc::clone(&order);

        let runner = Runner::start_with_executor(
            RunnerConfig {
                queue_size: 8,
                workers: 1,
            },
            None,
            move |param, _| {
                let seen = Arc::clone(&seen);
                Box::pin(async move {
                    seen.lock().unwrap().push(param.task.task_id.clone());
                })
            },
        );

        for id in ["a", "b", "c"] {
            runner.submit(testing::param_for(&world, id)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
        runner.close().await;
    }

    #[tokio::test]
    async fn panicking_task_is_recovered_and_marked_failed() {
        let world = queue_world().await;
        let store = world.ctx.store.clone();
        store.save(&Task::new("boom", "u")).await.unwrap();

        let runner = Runner::start_with_executor(
            RunnerConfig {
                queue_size: 4,
                workers: 1,
            },
            Some(store.clone()),
            |_, _| Box::pin(async { panic!("stage exploded") }),
        );

        runner.submit(testing::param_for(&world, "boom")).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let task = store.get("boom").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.fail_reason.contains("stage exploded"));

        // The worker survived the panic and keeps processing.
        store.save(&Task::new("after", "u")).await.unwrap();
        runner.submit(testing::param_for(&world, "after")).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runner.pending(), 0);
        runner.close().await;
    }

    #[tokio::test]
    async fn close_cancels_in_flight_work() {
        let world = queue_world().await;
        let runner = Runner::start_with_executor(
            RunnerConfig {
                queue_size: 2,
                workers: 1,
            },
            None,
            sleeping_executor(Duration::from_secs(60)),
        );
        runner.submit(testing::param_for(&world, "slow")).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // close() must return promptly because the executor observes
        // the cancellation root.
        tokio::time::timeout(Duration::from_secs(5), runner.close())
            .await
            .expect("close should not hang");
    }
}
