//! Staged concurrent pipeline.
//!
//! A pipeline is a chain of typed stages linked by bounded channels. Each
//! stage runs a fixed pool of workers pulling from a shared receiver, so a
//! slow stage backpressures the ones before it instead of buffering without
//! bound. Items are independent: one failing item is recorded and dropped,
//! the rest keep flowing.
//!
//! Shutdown is a cascade: dropping the input sender lets the first stage's
//! workers drain and exit, which drops their senders in turn, and so on down
//! the chain.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use chunkflow_shared::Result;

/// Capacity of the channel between adjacent stages.
const CHANNEL_CAPACITY: usize = 32;

/// One recorded per-item failure: which stage, and why.
#[derive(Debug, Clone)]
pub struct StageFailure {
    pub stage: &'static str,
    pub error: String,
}

/// Outcome of one pipeline run.
#[derive(Debug)]
pub struct PipelineReport {
    /// Items accepted past the admission cap.
    pub admitted: usize,
    /// Items that made it through the final stage.
    pub completed: usize,
    /// Per-item failures, in the order workers recorded them.
    pub failures: Vec<StageFailure>,
}

impl PipelineReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builds a pipeline stage by stage. `I` is the input type of the whole
/// chain, `T` the output type of the last stage added so far.
pub struct PipelineBuilder<I, T> {
    input: mpsc::Sender<I>,
    output: mpsc::Receiver<T>,
    handles: Vec<JoinHandle<()>>,
    failures: Arc<StdMutex<Vec<StageFailure>>>,
}

impl<I: Send + 'static> PipelineBuilder<I, I> {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let (input, output) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            input,
            output,
            handles: Vec::new(),
            failures: Arc::new(StdMutex::new(Vec::new())),
        }
    }
}

impl<I: Send + 'static, T: Send + 'static> PipelineBuilder<I, T> {
    /// Add a stage with its own worker pool. Workers share one receiver;
    /// whichever is free takes the next item.
    pub fn stage<U, F, Fut>(
        mut self,
        name: &'static str,
        concurrency: usize,
        handler: F,
    ) -> PipelineBuilder<I, U>
    where
        U: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<U>> + Send,
    {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let receiver = Arc::new(Mutex::new(self.output));
        let handler = Arc::new(handler);

        for worker in 0..concurrency.max(1) {
            let receiver = Arc::clone(&receiver);
            let handler = Arc::clone(&handler);
            let tx = tx.clone();
            let failures = Arc::clone(&self.failures);

            self.handles.push(tokio::spawn(async move {
                loop {
                    // Hold the lock only while receiving, not while working.
                    let item = { receiver.lock().await.recv().await };
                    let Some(item) = item else { break };

                    match handler(item).await {
                        Ok(out) => {
                            if tx.send(out).await.is_err() {
                                break;
                            }
                        }
                        Err(error) => {
                            warn!(stage = name, worker, %error, "item failed");
                            if let Ok(mut failures) = failures.lock() {
                                failures.push(StageFailure {
                                    stage: name,
                                    error: error.to_string(),
                                });
                            }
                        }
                    }
                }
                debug!(stage = name, worker, "worker exited");
            }));
        }

        PipelineBuilder {
            input: self.input,
            output: rx,
            handles: self.handles,
            failures: self.failures,
        }
    }

    /// Add the terminal stage and seal the pipeline. Items the handler
    /// accepts count as completed.
    pub fn finish<F, Fut>(mut self, name: &'static str, concurrency: usize, handler: F) -> Pipeline<I>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send,
    {
        let receiver = Arc::new(Mutex::new(self.output));
        let handler = Arc::new(handler);
        let completed = Arc::new(AtomicUsize::new(0));

        for worker in 0..concurrency.max(1) {
            let receiver = Arc::clone(&receiver);
            let handler = Arc::clone(&handler);
            let completed = Arc::clone(&completed);
            let failures = Arc::clone(&self.failures);

            self.handles.push(tokio::spawn(async move {
                loop {
                    let item = { receiver.lock().await.recv().await };
                    let Some(item) = item else { break };

                    match handler(item).await {
                        Ok(()) => {
                            completed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(error) => {
                            warn!(stage = name, worker, %error, "item failed");
                            if let Ok(mut failures) = failures.lock() {
                                failures.push(StageFailure {
                                    stage: name,
                                    error: error.to_string(),
                                });
                            }
                        }
                    }
                }
                debug!(stage = name, worker, "worker exited");
            }));
        }

        Pipeline {
            input: self.input,
            admitted: AtomicUsize::new(0),
            max_items: usize::MAX,
            completed,
            failures: self.failures,
            handles: self.handles,
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// A sealed pipeline accepting items of type `I`.
pub struct Pipeline<I> {
    input: mpsc::Sender<I>,
    admitted: AtomicUsize,
    max_items: usize,
    completed: Arc<AtomicUsize>,
    failures: Arc<StdMutex<Vec<StageFailure>>>,
    handles: Vec<JoinHandle<()>>,
}

impl<I: Send + 'static> Pipeline<I> {
    /// Cap the total number of items this pipeline will ever admit.
    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    /// Try to reserve an admission slot. The count only ever grows; once
    /// the cap is reached every later call returns `false`, even if
    /// admitted items subsequently fail.
    pub fn admit(&self) -> bool {
        self.admitted
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                (n < self.max_items).then_some(n + 1)
            })
            .is_ok()
    }

    /// Admit and enqueue one item. `false` means the cap rejected it.
    /// Blocks only on backpressure from the first stage.
    pub async fn push(&self, item: I) -> bool {
        if !self.admit() {
            return false;
        }
        self.input.send(item).await.is_ok()
    }

    /// Close the input, wait for every stage to drain, and report.
    pub async fn shutdown(self) -> PipelineReport {
        let Pipeline {
            input,
            admitted,
            completed,
            failures,
            handles,
            ..
        } = self;

        // Dropping the input sender starts the cascade.
        drop(input);
        for handle in handles {
            // A panicked worker is already accounted for by its lost items.
            let _ = handle.await;
        }

        let failures = failures
            .lock()
            .map(|f| f.clone())
            .unwrap_or_default();

        PipelineReport {
            admitted: admitted.load(Ordering::Relaxed),
            completed: completed.load(Ordering::Relaxed),
            failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkflow_shared::ChunkflowError;
    use std::collections::HashSet;

    fn collecting_pipeline(seen: Arc<StdMutex<Vec<u32>>>) -> Pipeline<u32> {
        PipelineBuilder::new()
            .stage("double", 4, |n: u32| async move { Ok(n * 2) })
            .finish("collect", 2, move |n: u32| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push(n);
                    Ok(())
                }
            })
    }

    #[tokio::test]
    async fn items_flow_through_all_stages() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let pipeline = collecting_pipeline(Arc::clone(&seen));

        for n in 0..50u32 {
            assert!(pipeline.push(n).await);
        }
        let report = pipeline.shutdown().await;

        assert_eq!(report.admitted, 50);
        assert_eq!(report.completed, 50);
        assert_eq!(report.failed(), 0);

        // Concurrency means arrival order is unspecified, only membership.
        let got: HashSet<u32> = seen.lock().unwrap().iter().copied().collect();
        let want: HashSet<u32> = (0..50).map(|n| n * 2).collect();
        assert_eq!(got, want);
    }

    #[tokio::test]
    async fn admission_cap_is_monotonic() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let pipeline = collecting_pipeline(Arc::clone(&seen)).with_max_items(3);

        let mut accepted = 0;
        for n in 0..10u32 {
            if pipeline.push(n).await {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 3);

        // The slot count never rolls back, even once the cap is hit.
        assert!(!pipeline.admit());

        let report = pipeline.shutdown().await;
        assert_eq!(report.admitted, 3);
        assert_eq!(report.completed, 3);
    }

    #[tokio::test]
    async fn one_failing_item_does_not_stop_the_rest() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let pipeline = {
            let seen = Arc::clone(&seen);
            PipelineBuilder::new()
                .stage("validate", 3, |n: u32| async move {
                    if n == 7 {
                        Err(ChunkflowError::validation("seven is unlucky"))
                    } else {
                        Ok(n)
                    }
                })
                .finish("collect", 1, move |n: u32| {
                    let seen = Arc::clone(&seen);
                    async move {
                        seen.lock().unwrap().push(n);
                        Ok(())
                    }
                })
        };

        for n in 0..10u32 {
            pipeline.push(n).await;
        }
        let report = pipeline.shutdown().await;

        assert_eq!(report.admitted, 10);
        assert_eq!(report.completed, 9);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures[0].stage, "validate");
        assert!(report.failures[0].error.contains("unlucky"));
        assert!(!seen.lock().unwrap().contains(&7));
    }

    #[tokio::test]
    async fn terminal_stage_failures_are_recorded() {
        let pipeline: Pipeline<u32> = PipelineBuilder::new()
            .stage("pass", 1, |n: u32| async move { Ok(n) })
            .finish("sink", 2, |n: u32| async move {
                if n % 2 == 0 {
                    Ok(())
                } else {
                    Err(ChunkflowError::store("odd one out"))
                }
            });

        for n in 0..6u32 {
            pipeline.push(n).await;
        }
        let report = pipeline.shutdown().await;

        assert_eq!(report.completed, 3);
        assert_eq!(report.failed(), 3);
        assert!(report.failures.iter().all(|f| f.stage == "sink"));
    }

    #[tokio::test]
    async fn shutdown_with_no_items_is_clean() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let pipeline = collecting_pipeline(seen);
        let report = pipeline.shutdown().await;
        assert_eq!(report.admitted, 0);
        assert_eq!(report.completed, 0);
    }
}
