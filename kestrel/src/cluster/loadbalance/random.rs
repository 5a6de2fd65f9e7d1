use kestrel_base::Url;
use rand::Rng;

use crate::{
    cluster::loadbalance::{invoker_weight, LoadBalance},
    invocation::RpcInvocation,
    invoker::BoxInvoker,
};

pub const NAME: &str = "random";

/// Weighted random selection. When every candidate carries the same weight
/// the draw is uniform; otherwise the hit probability is proportional to the
/// effective (warm-up scaled) weight.
#[derive(Debug, Default)]
pub struct RandomLoadBalance;

impl LoadBalance for RandomLoadBalance {
    fn do_select(
        &self,
        invokers: &[BoxInvoker],
        _url: &Url,
        invocation: &RpcInvocation,
    ) -> Option<BoxInvoker> {
        let weights: Vec<i64> = invokers
            .iter()
            .map(|invoker| invoker_weight(invoker, invocation))
            .collect();
        let total: i64 = weights.iter().sum();
        let same_weight = weights.windows(2).all(|w| w[0] == w[1]);

        let mut rng = rand::thread_rng();
        if total > 0 && !same_weight {
            let mut offset = rng.gen_range(0..total);
            for (invoker, weight) in invokers.iter().zip(&weights) {
                offset -= weight;
                if offset < 0 {
                    return Some(invoker.clone());
                }
            }
        }
        Some(invokers[rng.gen_range(0..invokers.len())].clone())
    }
}
