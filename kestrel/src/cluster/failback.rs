use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use kestrel_base::{
    constants::{
        DEFAULT_FAILBACK_TASKS, DEFAULT_FAILBACK_TIMES, DEFAULT_RETRY_PERIOD, FAILBACK_TASKS_KEY,
        RETRY_PERIOD_KEY,
    },
    Url,
};
use kestrel_logger::tracing::{error, warn};
use once_cell::sync::OnceCell;

use crate::{
    cluster::{loadbalance::LoadBalance, Cluster, ClusterBase},
    directory::{BoxDirectory, Directory},
    invocation::RpcInvocation,
    invoker::{BoxInvoker, Invoker},
    result::RpcResult,
    RpcError,
};

pub const NAME: &str = "failback";

pub struct FailbackCluster;

impl Cluster for FailbackCluster {
    fn join(&self, directory: BoxDirectory) -> Result<BoxInvoker, RpcError> {
        Ok(Arc::new(FailbackClusterInvoker::new(directory)))
    }
}

struct FailedInvocation {
    invocation: RpcInvocation,
    retried: usize,
}

struct FailbackState {
    directory: BoxDirectory,
    queue: Mutex<VecDeque<FailedInvocation>>,
    capacity: usize,
    retry_times: usize,
}

impl FailbackState {
    fn enqueue(&self, invocation: RpcInvocation, retried: usize) {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= self.capacity {
            error!(
                method = invocation.method_name(),
                capacity = self.capacity,
                "failback queue is full, dropping the call"
            );
            return;
        }
        queue.push_back(FailedInvocation {
            invocation,
            retried,
        });
    }

    async fn retry_tick(&self) {
        let tasks: Vec<FailedInvocation> = {
            let mut queue = self.queue.lock().unwrap();
            queue.drain(..).collect()
        };
        for mut task in tasks {
            match self.retry_once(&task.invocation).await {
                Ok(_) => {}
                Err(err) => {
                    task.retried += 1;
                    if task.retried >= self.retry_times {
                        error!(
                            method = task.invocation.method_name(),
                            attempts = task.retried,
                            "failback retries exhausted, dropping the call: {}",
                            err
                        );
                    } else {
                        self.enqueue(task.invocation, task.retried);
                    }
                }
            }
        }
    }

    async fn retry_once(&self, invocation: &RpcInvocation) -> Result<RpcResult, RpcError> {
        let invokers = self.directory.list(invocation)?;
        let invoker = invokers
            .iter()
            .find(|invoker| invoker.is_available())
            .or_else(|| invokers.first())
            .ok_or_else(|| RpcError::no_provider("no provider available for failback retry"))?;
        invoker.invoke(invocation).await
    }
}

/// Acknowledges immediately and retries failures in the background: a
/// bounded queue drained by one worker on a fixed period until each call
/// succeeds or runs out of attempts.
pub struct FailbackClusterInvoker {
    base: ClusterBase,
    state: Arc<FailbackState>,
    retry_period: u64,
    worker: OnceCell<tokio::task::JoinHandle<()>>,
}

impl FailbackClusterInvoker {
    pub fn new(directory: BoxDirectory) -> Self {
        let url = directory.url();
        let capacity = url.param_usize(FAILBACK_TASKS_KEY, DEFAULT_FAILBACK_TASKS);
        let retry_period = url.param_u64(RETRY_PERIOD_KEY, DEFAULT_RETRY_PERIOD);
        let state = Arc::new(FailbackState {
            directory: directory.clone(),
            queue: Mutex::new(VecDeque::new()),
            capacity,
            retry_times: DEFAULT_FAILBACK_TIMES,
        });
        FailbackClusterInvoker {
            base: ClusterBase::new(directory),
            state,
            retry_period,
            worker: OnceCell::new(),
        }
    }

    fn ensure_worker(&self) {
        self.worker.get_or_init(|| {
            let state = self.state.clone();
            let period = Duration::from_millis(self.retry_period);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(period).await;
                    state.retry_tick().await;
                }
            })
        });
    }

    async fn do_invoke(
        &self,
        invocation: &RpcInvocation,
        invokers: Vec<BoxInvoker>,
        balancer: Arc<dyn LoadBalance>,
    ) -> Result<RpcResult, RpcError> {
        self.base.check_invokers(&invokers, invocation)?;
        let attempt = async {
            let invoker = self.base.select(&balancer, invocation, &invokers, &[])?;
            invoker.invoke(invocation).await
        };
        match attempt.await {
            Ok(result) => Ok(result),
            Err(err) => {
                warn!(
                    method = invocation.method_name(),
                    service = %self.base.url().service_key(),
                    "failback will retry in the background: {}",
                    err
                );
                self.ensure_worker();
                self.state.enqueue(invocation.clone(), 0);
                Ok(RpcResult::empty())
            }
        }
    }

    #[cfg(test)]
    fn queued(&self) -> usize {
        self.state.queue.lock().unwrap().len()
    }
}

#[async_trait]
impl Invoker for FailbackClusterInvoker {
    fn url(&self) -> &Url {
        self.base.url()
    }

    fn is_available(&self) -> bool {
        self.base.is_available()
    }

    async fn invoke(&self, invocation: &RpcInvocation) -> Result<RpcResult, RpcError> {
        let mut invocation = invocation.clone();
        let (invokers, balancer) = self.base.prepare(&mut invocation)?;
        self.do_invoke(&invocation, invokers, balancer).await
    }

    fn destroy(&self) {
        if let Some(worker) = self.worker.get() {
            worker.abort();
        }
        self.state.queue.lock().unwrap().clear();
        self.base.destroy();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cluster::test_support::{directory_of, MockInvoker};

    fn invocation() -> RpcInvocation {
        RpcInvocation::default().with_method_name("report")
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_gets_empty_result_and_retry_succeeds() {
        let failing = MockInvoker::failing("tri://10.0.0.1:20880/report.Sink", |_| {
            RpcError::network("connection reset")
        });
        let recovering = MockInvoker::succeeding("tri://10.0.0.2:20880/report.Sink");
        recovering.set_available(false);
        let directory = directory_of(
            "tri://10.0.0.100:0/report.Sink",
            &[failing.clone(), recovering.clone()],
        );
        let cluster = FailbackClusterInvoker::new(directory);

        let result = cluster.invoke(&invocation()).await.unwrap();
        assert!(result.value().is_none());
        assert_eq!(failing.invoked(), 1);
        assert_eq!(cluster.queued(), 1);

        // by the next tick the healthy provider is back
        recovering.set_available(true);
        failing.set_available(false);
        tokio::time::sleep(Duration::from_millis(5200)).await;

        assert_eq!(recovering.invoked(), 1);
        assert_eq!(cluster.queued(), 0);
        cluster.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let failing = MockInvoker::failing("tri://10.0.0.1:20880/report.Sink", |_| {
            RpcError::network("connection reset")
        });
        let directory = directory_of("tri://10.0.0.100:0/report.Sink", &[failing.clone()]);
        let cluster = FailbackClusterInvoker::new(directory);

        assert!(cluster.invoke(&invocation()).await.is_ok());
        assert_eq!(cluster.queued(), 1);

        // three background attempts, then the call is dropped
        tokio::time::sleep(Duration::from_millis(5200 * 4)).await;
        assert_eq!(failing.invoked(), 1 + DEFAULT_FAILBACK_TIMES);
        assert_eq!(cluster.queued(), 0);
        cluster.destroy();
    }

    #[tokio::test]
    async fn test_empty_directory_raises_no_provider() {
        let directory = directory_of("tri://10.0.0.100:0/report.Sink", &[]);
        let cluster = FailbackClusterInvoker::new(directory);
        let err = cluster.invoke(&invocation()).await.unwrap_err();
        assert_eq!(err.kind(), crate::RpcErrorKind::NoProvider);
        // nothing was enqueued for the background worker
        assert_eq!(cluster.queued(), 0);
    }

    #[tokio::test]
    async fn test_queue_is_bounded() {
        let failing = MockInvoker::failing("tri://10.0.0.1:20880/report.Sink", |_| {
            RpcError::network("connection reset")
        });
        let directory = directory_of(
            "tri://10.0.0.100:0/report.Sink?failbacktasks=2",
            &[failing.clone()],
        );
        let cluster = FailbackClusterInvoker::new(directory);
        for _ in 0..5 {
            assert!(cluster.invoke(&invocation()).await.is_ok());
        }
        assert_eq!(cluster.queued(), 2);
        cluster.destroy();
    }
}
