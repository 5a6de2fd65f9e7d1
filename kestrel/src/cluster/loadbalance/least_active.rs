use kestrel_base::Url;
use rand::Rng;

use crate::{
    cluster::loadbalance::{invoker_weight, LoadBalance},
    invocation::RpcInvocation,
    invoker::{BoxInvoker, Invoker},
    status::RpcStatus,
};

pub const NAME: &str = "leastactive";

/// Prefers the endpoints with the fewest in-flight calls for this method,
/// read from [`RpcStatus`]; ties are broken by weighted random among the
/// least-active group.
#[derive(Debug, Default)]
pub struct LeastActiveLoadBalance;

impl LoadBalance for LeastActiveLoadBalance {
    fn do_select(
        &self,
        invokers: &[BoxInvoker],
        _url: &Url,
        invocation: &RpcInvocation,
    ) -> Option<BoxInvoker> {
        let mut least_active = usize::MAX;
        let mut least_indexes: Vec<usize> = Vec::new();
        let mut weights: Vec<i64> = Vec::with_capacity(invokers.len());
        let mut total_weight = 0i64;
        let mut same_weight = true;

        for (index, invoker) in invokers.iter().enumerate() {
            let active =
                RpcStatus::method_status(invoker.url(), invocation.method_name()).active();
            let weight = invoker_weight(invoker, invocation);
            weights.push(weight);
            if active < least_active {
                least_active = active;
                least_indexes.clear();
                least_indexes.push(index);
                total_weight = weight;
                same_weight = true;
            } else if active == least_active {
                same_weight = same_weight && weight == weights[least_indexes[0]];
                least_indexes.push(index);
                total_weight += weight;
            }
        }

        if least_indexes.len() == 1 {
            return Some(invokers[least_indexes[0]].clone());
        }
        let mut rng = rand::thread_rng();
        if !same_weight && total_weight > 0 {
            let mut offset = rng.gen_range(0..total_weight);
            for index in &least_indexes {
                offset -= weights[*index];
                if offset < 0 {
                    return Some(invokers[*index].clone());
                }
            }
        }
        let index = least_indexes[rng.gen_range(0..least_indexes.len())];
        Some(invokers[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::loadbalance::test_support::{consumer_url, StaticInvoker};

    // distinct service path per test: RpcStatus is process-global
    fn invokers(service: &str) -> Vec<BoxInvoker> {
        (1..=3)
            .map(|i| {
                StaticInvoker::with_url(
                    format!("tri://10.0.0.{}:20880/{}?weight=100", i, service)
                        .parse()
                        .unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_idle_invoker_wins() {
        let lb = LeastActiveLoadBalance;
        let invokers = invokers("la_idle.Greeter");
        let invocation = RpcInvocation::default().with_method_name("greet");

        // two of three are busy
        RpcStatus::begin_count(invokers[0].url(), "greet");
        RpcStatus::begin_count(invokers[2].url(), "greet");

        for _ in 0..50 {
            let picked = lb.select(&invokers, &consumer_url(), &invocation).unwrap();
            assert_eq!(picked.url().address(), invokers[1].url().address());
        }

        RpcStatus::end_count(invokers[0].url(), "greet", 1, true);
        RpcStatus::end_count(invokers[2].url(), "greet", 1, true);
    }

    #[test]
    fn test_ties_spread_over_least_active_group() {
        let lb = LeastActiveLoadBalance;
        let invokers = invokers("la_ties.Greeter");
        let invocation = RpcInvocation::default().with_method_name("greet");

        RpcStatus::begin_count(invokers[2].url(), "greet");

        let mut saw = std::collections::HashSet::new();
        for _ in 0..200 {
            let picked = lb.select(&invokers, &consumer_url(), &invocation).unwrap();
            let address = picked.url().address();
            assert_ne!(address, invokers[2].url().address());
            saw.insert(address);
        }
        assert_eq!(saw.len(), 2);

        RpcStatus::end_count(invokers[2].url(), "greet", 1, true);
    }
}
