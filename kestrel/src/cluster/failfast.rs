use std::sync::Arc;

use async_trait::async_trait;
use kestrel_base::Url;

use crate::{
    cluster::{loadbalance::LoadBalance, Cluster, ClusterBase},
    directory::BoxDirectory,
    invocation::RpcInvocation,
    invoker::{BoxInvoker, Invoker},
    result::RpcResult,
    RpcError,
};

pub const NAME: &str = "failfast";

pub struct FailfastCluster;

impl Cluster for FailfastCluster {
    fn join(&self, directory: BoxDirectory) -> Result<BoxInvoker, RpcError> {
        Ok(Arc::new(FailfastClusterInvoker::new(directory)))
    }
}

/// One attempt, any failure surfaces immediately. For non-idempotent
/// operations where a duplicate call is worse than a failed one.
pub struct FailfastClusterInvoker {
    base: ClusterBase,
}

impl FailfastClusterInvoker {
    pub fn new(directory: BoxDirectory) -> Self {
        FailfastClusterInvoker {
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
        let invoker = self.base.select(&balancer, invocation, &invokers, &[])?;
        invoker.invoke(invocation).await.map_err(|err| {
            if err.is_biz() {
                err
            } else {
                RpcError::new(
                    err.kind(),
                    format!(
                        "failfast invoke of method {} on provider {} for service {} failed: {}",
                        invocation.method_name(),
                        invoker.url().address(),
                        self.base.url().service_key(),
                        err,
                    ),
                )
            }
        })
    }
}

#[async_trait]
impl Invoker for FailfastClusterInvoker {
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
