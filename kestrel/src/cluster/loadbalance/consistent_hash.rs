use std::{collections::BTreeMap, sync::Arc};

use dashmap::DashMap;
use kestrel_base::{
    constants::{DEFAULT_HASH_ARGUMENTS, DEFAULT_HASH_NODES, HASH_ARGUMENTS_KEY, HASH_NODES_KEY},
    hash::hash_to_u64,
    Url,
};

use crate::{
    cluster::loadbalance::LoadBalance,
    invocation::RpcInvocation,
    invoker::{BoxInvoker, Invoker},
};

pub const NAME: &str = "consistenthash";

/// Maps calls with the same hashed arguments to the same endpoint. Each
/// `(service, method)` owns a ring of virtual nodes; the ring is rebuilt
/// whenever the invoker set changes.
#[derive(Default)]
pub struct ConsistentHashLoadBalance {
    selectors: DashMap<String, Arc<ConsistentHashSelector>>,
}

impl LoadBalance for ConsistentHashLoadBalance {
    fn do_select(
        &self,
        invokers: &[BoxInvoker],
        _url: &Url,
        invocation: &RpcInvocation,
    ) -> Option<BoxInvoker> {
        let key = format!(
            "{}.{}",
            invokers[0].url().service_key(),
            invocation.method_name()
        );
        let identity = invokers_identity(invokers);
        // the read guard must drop before a rebuild may insert
        let cached = self
            .selectors
            .get(&key)
            .and_then(|selector| (selector.identity == identity).then(|| selector.value().clone()));
        let selector = match cached {
            Some(selector) => selector,
            None => {
                let built = Arc::new(ConsistentHashSelector::new(invokers, invocation, identity));
                self.selectors.insert(key, built.clone());
                built
            }
        };
        selector.select(invocation)
    }
}

fn invokers_identity(invokers: &[BoxInvoker]) -> u64 {
    let identities: Vec<String> = invokers.iter().map(|i| i.url().identity()).collect();
    hash_to_u64(&identities)
}

struct ConsistentHashSelector {
    ring: BTreeMap<u64, BoxInvoker>,
    argument_indexes: Vec<usize>,
    identity: u64,
}

impl ConsistentHashSelector {
    fn new(invokers: &[BoxInvoker], invocation: &RpcInvocation, identity: u64) -> Self {
        let url = invokers[0].url();
        let method = invocation.method_name();
        let replicas = url.method_param_usize(method, HASH_NODES_KEY, DEFAULT_HASH_NODES);
        let argument_indexes = url
            .method_param_or(method, HASH_ARGUMENTS_KEY, DEFAULT_HASH_ARGUMENTS)
            .split(',')
            .filter_map(|index| index.trim().parse::<usize>().ok())
            .collect();

        let mut ring = BTreeMap::new();
        for invoker in invokers {
            let address = invoker.url().address();
            for replica in 0..replicas {
                let slot = hash_to_u64(&format!("{}-{}", address, replica));
                ring.insert(slot, invoker.clone());
            }
        }
        ConsistentHashSelector {
            ring,
            argument_indexes,
            identity,
        }
    }

    fn select(&self, invocation: &RpcInvocation) -> Option<BoxInvoker> {
        let mut key = String::new();
        for index in &self.argument_indexes {
            if let Some(argument) = invocation.arguments().get(*index) {
                key.push_str(argument);
            }
        }
        let hash = hash_to_u64(&key);
        self.ring
            .range(hash..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, invoker)| invoker.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::loadbalance::test_support::{consumer_url, weighted_invokers};

    fn invocation(argument: &str) -> RpcInvocation {
        RpcInvocation::default()
            .with_method_name("greet")
            .with_arguments(vec![argument.to_string()])
    }

    #[test]
    fn test_same_argument_sticks_to_one_invoker() {
        let lb = ConsistentHashLoadBalance::default();
        let invokers = weighted_invokers(&[100, 100, 100]);
        let url = consumer_url();
        let first = lb.select(&invokers, &url, &invocation("alpha")).unwrap();
        for _ in 0..20 {
            let again = lb.select(&invokers, &url, &invocation("alpha")).unwrap();
            assert_eq!(again.url().address(), first.url().address());
        }
    }

    #[test]
    fn test_arguments_spread_over_ring() {
        let lb = ConsistentHashLoadBalance::default();
        let invokers = weighted_invokers(&[100, 100, 100]);
        let url = consumer_url();
        let mut seen = std::collections::HashSet::new();
        for i in 0..200 {
            let picked = lb
                .select(&invokers, &url, &invocation(&format!("arg-{}", i)))
                .unwrap();
            seen.insert(picked.url().address());
        }
        assert!(seen.len() > 1, "all arguments landed on one node");
    }

    #[test]
    fn test_ring_rebuilt_on_membership_change() {
        let lb = ConsistentHashLoadBalance::default();
        let invokers = weighted_invokers(&[100, 100, 100]);
        let url = consumer_url();
        lb.select(&invokers, &url, &invocation("alpha")).unwrap();

        let shrunk = invokers[..2].to_vec();
        let picked = lb.select(&shrunk, &url, &invocation("alpha")).unwrap();
        // the stale ring would still contain the removed node
        assert_ne!(picked.url().address(), invokers[2].url().address());
    }

    #[test]
    fn test_stable_selection_survives_unrelated_removal() {
        let lb = ConsistentHashLoadBalance::default();
        let invokers = weighted_invokers(&[100, 100, 100]);
        let url = consumer_url();
        let first = lb.select(&invokers, &url, &invocation("alpha")).unwrap();
        let remaining: Vec<BoxInvoker> = invokers
            .iter()
            .filter(|i| i.url().address() != first.url().address())
            .cloned()
            .collect();
        let moved = lb.select(&remaining, &url, &invocation("alpha")).unwrap();
        assert_ne!(moved.url().address(), first.url().address());
    }
}
