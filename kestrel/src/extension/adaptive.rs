//! Hand-written dispatchers standing in for the original's generated
//! adaptive classes: each one is a tiny dispatch table `(key, default)` plus
//! a forward through the registry.

use kestrel_base::{
    constants::{CLUSTER_KEY, DEFAULT_CLUSTER, DEFAULT_LOADBALANCE, LOADBALANCE_KEY},
    Url,
};
use kestrel_logger::tracing::warn;

use crate::{
    cluster::{loadbalance::LoadBalance, Cluster},
    directory::{BoxDirectory, Directory},
    extension,
    invocation::RpcInvocation,
    invoker::BoxInvoker,
    RpcError,
};

pub const ADAPTIVE_NAME: &str = "adaptive";

/// Per-call load-balancer dispatch: reads `loadbalance` with method-scoped
/// lookup (an invocation is always present on this path) and forwards.
pub struct AdaptiveLoadBalance;

impl LoadBalance for AdaptiveLoadBalance {
    fn do_select(
        &self,
        invokers: &[BoxInvoker],
        url: &Url,
        invocation: &RpcInvocation,
    ) -> Option<BoxInvoker> {
        let name = url.method_param_or(
            invocation.method_name(),
            LOADBALANCE_KEY,
            DEFAULT_LOADBALANCE,
        );
        match extension::load_balances().get_or_default(&name) {
            Ok(balancer) => balancer.do_select(invokers, url, invocation),
            Err(err) => {
                warn!(loadbalance = %name, "failed to resolve load balancer: {}", err);
                None
            }
        }
    }
}

/// Cluster dispatch: no invocation is available when a directory is joined,
/// so the `cluster` key is read as a plain URL parameter.
pub struct AdaptiveCluster;

impl Cluster for AdaptiveCluster {
    fn join(&self, directory: BoxDirectory) -> Result<BoxInvoker, RpcError> {
        let name = directory.url().param_or(CLUSTER_KEY, DEFAULT_CLUSTER);
        let cluster = extension::clusters().get_or_default(&name)?;
        cluster.join(directory)
    }
}
