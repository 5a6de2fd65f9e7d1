use std::sync::Arc;

use async_trait::async_trait;
use kestrel_base::Url;
use kestrel_logger::tracing::error;

use crate::{
    cluster::{loadbalance::LoadBalance, Cluster, ClusterBase},
    directory::BoxDirectory,
    invocation::RpcInvocation,
    invoker::{BoxInvoker, Invoker},
    result::RpcResult,
    RpcError,
};

pub const NAME: &str = "broadcast";

pub struct BroadcastCluster;

impl Cluster for BroadcastCluster {
    fn join(&self, directory: BoxDirectory) -> Result<BoxInvoker, RpcError> {
        Ok(Arc::new(BroadcastClusterInvoker::new(directory)))
    }
}

/// Calls every provider in turn, e.g. to invalidate caches everywhere. The
/// last result is returned; any failure along the way surfaces as an
/// aggregated error once the sweep completes.
pub struct BroadcastClusterInvoker {
    base: ClusterBase,
}

impl BroadcastClusterInvoker {
    pub fn new(directory: BoxDirectory) -> Self {
        BroadcastClusterInvoker {
            base: ClusterBase::new(directory),
        }
    }

    async fn do_invoke(
        &self,
        invocation: &RpcInvocation,
        invokers: Vec<BoxInvoker>,
        _balancer: Arc<dyn LoadBalance>,
    ) -> Result<RpcResult, RpcError> {
        self.base.check_invokers(&invokers, invocation)?;
        let mut result = RpcResult::empty();
        let mut last_error: Option<(String, RpcError)> = None;
        for invoker in &invokers {
            match invoker.invoke(invocation).await {
                Ok(ok) => result = ok,
                Err(err) => {
                    error!(
                        provider = %invoker.url().address(),
                        method = invocation.method_name(),
                        "broadcast leg failed: {}",
                        err
                    );
                    last_error = Some((invoker.url().address(), err));
                }
            }
        }
        match last_error {
            Some((address, err)) => Err(RpcError::new(
                err.kind(),
                format!(
                    "broadcast of method {} for service {} partially failed, last failure on {}: {}",
                    invocation.method_name(),
                    self.base.url().service_key(),
                    address,
                    err,
                ),
            )),
            None => Ok(result),
        }
    }
}

#[async_trait]
impl Invoker for BroadcastClusterInvoker {
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
        self.base.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cluster::test_support::{directory_of, MockInvoker},
        RpcErrorKind,
    };

    fn invocation() -> RpcInvocation {
        RpcInvocation::default().with_method_name("evict")
    }

    #[tokio::test]
    async fn test_every_provider_is_called() {
        let invokers = vec![
            MockInvoker::succeeding("tri://10.0.0.1:20880/cache.Evictor"),
            MockInvoker::succeeding("tri://10.0.0.2:20880/cache.Evictor"),
            MockInvoker::succeeding("tri://10.0.0.3:20880/cache.Evictor"),
        ];
        let directory = directory_of("tri://10.0.0.100:0/cache.Evictor", &invokers);
        let cluster = BroadcastClusterInvoker::new(directory);

        let result = cluster.invoke(&invocation()).await.unwrap();
        assert!(result.value().is_some());
        for invoker in &invokers {
            assert_eq!(invoker.invoked(), 1);
        }
    }

    #[tokio::test]
    async fn test_failure_recorded_but_sweep_continues() {
        let invokers = vec![
            MockInvoker::succeeding("tri://10.0.0.1:20880/cache.Evictor"),
            MockInvoker::failing("tri://10.0.0.2:20880/cache.Evictor", |address| {
                RpcError::timeout(format!("{} timed out", address))
            }),
            MockInvoker::succeeding("tri://10.0.0.3:20880/cache.Evictor"),
        ];
        let directory = directory_of("tri://10.0.0.100:0/cache.Evictor", &invokers);
        let cluster = BroadcastClusterInvoker::new(directory);

        let err = cluster.invoke(&invocation()).await.unwrap_err();
        assert_eq!(err.kind(), RpcErrorKind::Timeout);
        assert!(err.message().contains("10.0.0.2:20880"));
        for invoker in &invokers {
            assert_eq!(invoker.invoked(), 1);
        }
    }
}
