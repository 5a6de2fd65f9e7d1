use std::sync::Arc;

use async_trait::async_trait;
use kestrel_base::Url;
use kestrel_logger::tracing::warn;

use crate::{
    cluster::{loadbalance::LoadBalance, Cluster, ClusterBase},
    directory::BoxDirectory,
    invocation::RpcInvocation,
    invoker::{BoxInvoker, Invoker},
    result::RpcResult,
    RpcError,
};

pub const NAME: &str = "failsafe";

pub struct FailsafeCluster;

impl Cluster for FailsafeCluster {
    fn join(&self, directory: BoxDirectory) -> Result<BoxInvoker, RpcError> {
        Ok(Arc::new(FailsafeClusterInvoker::new(directory)))
    }
}

/// Swallows invoke-time failures into a (possibly empty) successful result.
/// For fire-and-forget concerns such as audit logging. An empty directory is
/// still an error: no endpoint was ever contacted.
pub struct FailsafeClusterInvoker {
    base: ClusterBase,
}

impl FailsafeClusterInvoker {
    pub fn new(directory: BoxDirectory) -> Self {
        FailsafeClusterInvoker {
            base: ClusterBase::new(directory),
        }
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
                    "failsafe ignored the failure: {}",
                    err
                );
                Ok(RpcResult::empty())
            }
        }
    }
}

#[async_trait]
impl Invoker for FailsafeClusterInvoker {
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
