//! Background metrics polling.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{MetricsProvider, MetricsSnapshot};
use crate::PanelError;

type Providers = Vec<Box<dyn MetricsProvider>>;

/// Polls metrics providers on a fixed interval and publishes snapshots.
///
/// Polling runs on the blocking pool so slow providers (subprocesses, sysfs) never
/// stall the runtime. Snapshots are published through a watch channel: readers clone
/// the latest `Arc` and never see a half-written mapping.
pub struct MetricsCollector {
    snapshots: watch::Receiver<Arc<MetricsSnapshot>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MetricsCollector {
    /// Spawn the polling task. Must be called from within a tokio runtime.
    pub fn spawn(providers: Providers, interval: Duration) -> Self {
        let (tx, rx) = watch::channel(Arc::new(MetricsSnapshot::new()));
        let cancel = CancellationToken::new();

        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            Self::poll_task(providers, interval, tx, task_cancel).await;
        });

        Self { snapshots: rx, cancel, task: Some(task) }
    }

    /// Latest published snapshot. Never waits on a poll in progress.
    pub fn snapshot(&self) -> Arc<MetricsSnapshot> {
        self.snapshots.borrow().clone()
    }

    /// Stream of snapshots: the current one first, then every new publication.
    pub fn updates(&self) -> impl Stream<Item = Arc<MetricsSnapshot>> + 'static {
        WatchStream::new(self.snapshots.clone())
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop polling and wait up to `timeout` for the task to finish.
    ///
    /// A poll already in flight runs to completion before the task ends. Returns `false`
    /// if the task was still running when the wait expired; shutdown should carry on
    /// regardless.
    pub async fn stop(&mut self, timeout: Duration) -> bool {
        self.cancel.cancel();
        let Some(task) = self.task.take() else {
            return true;
        };

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(())) => {
                debug!("Metrics collector stopped");
                true
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Metrics collector task failed");
                true
            }
            Err(_) => {
                warn!(?timeout, "Metrics collector did not stop in time, continuing shutdown");
                false
            }
        }
    }

    async fn poll_task(
        mut providers: Providers,
        interval: Duration,
        tx: watch::Sender<Arc<MetricsSnapshot>>,
        cancel: CancellationToken,
    ) {
        info!(providers = providers.len(), ?interval, "Metrics collector started");
        let mut generation = 0u64;
        let mut error_count = 0u32;

        loop {
            let previous = tx.borrow().clone();
            let poll = tokio::task::spawn_blocking(move || {
                let snapshot = Self::poll_once(&mut providers, &previous);
                (providers, snapshot)
            });

            let (returned, snapshot) = match poll.await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "Metrics poll panicked, stopping collector");
                    break;
                }
            };
            providers = returned;
            if cancel.is_cancelled() {
                debug!("Metrics collector cancelled during poll");
                break;
            }

            match snapshot {
                Some(mut snapshot) => {
                    error_count = 0;
                    generation += 1;
                    snapshot.set_generation(generation);
                    trace!(generation, values = snapshot.len(), "Publishing metrics snapshot");
                    if tx.send(Arc::new(snapshot)).is_err() {
                        debug!("All snapshot receivers dropped, stopping collector");
                        break;
                    }
                }
                None => {
                    error_count += 1;
                    debug!(error_count, "No provider succeeded, keeping previous snapshot");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!(snapshots = generation, "Metrics collector ended");
    }

    /// Poll every provider once. Returns `None` when all of them failed.
    fn poll_once(providers: &mut Providers, previous: &MetricsSnapshot) -> Option<MetricsSnapshot> {
        let mut snapshot = MetricsSnapshot::new();
        let mut succeeded = providers.is_empty();

        for provider in providers.iter_mut() {
            let source = provider.source();
            match provider.get_all_metrics() {
                Ok(metrics) => {
                    snapshot.apply(source, metrics);
                    succeeded = true;
                }
                Err(e) => {
                    let e = match e {
                        e @ PanelError::MetricsProvider { .. } => e,
                        other => PanelError::MetricsProvider {
                            provider: format!("{source:?}"),
                            details: other.to_string(),
                        },
                    };
                    warn!(error = %e, "Metrics provider failed");
                    snapshot.carry_over(source, previous);
                }
            }
        }

        succeeded.then_some(snapshot)
    }
}

impl Drop for MetricsCollector {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
