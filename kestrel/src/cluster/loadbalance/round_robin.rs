use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Instant,
};

use dashmap::DashMap;
use kestrel_base::Url;
use once_cell::sync::Lazy;

use crate::{
    cluster::loadbalance::{invoker_weight, LoadBalance},
    invocation::RpcInvocation,
    invoker::{BoxInvoker, Invoker},
};

pub const NAME: &str = "roundrobin";

/// Nodes untouched for this long are dropped from the per-method state, so
/// that endpoints leaving the directory do not skew future rounds.
const RECYCLE_PERIOD: u64 = 60_000;

static START: Lazy<Instant> = Lazy::new(Instant::now);

fn monotonic_millis() -> u64 {
    START.elapsed().as_millis() as u64
}

#[derive(Debug)]
struct WeightedRoundRobin {
    weight: AtomicI64,
    current: AtomicI64,
    last_update: AtomicU64,
}

impl WeightedRoundRobin {
    fn new(weight: i64) -> Self {
        WeightedRoundRobin {
            weight: AtomicI64::new(weight),
            current: AtomicI64::new(0),
            last_update: AtomicU64::new(0),
        }
    }

    fn weight(&self) -> i64 {
        self.weight.load(Ordering::SeqCst)
    }

    fn set_weight(&self, weight: i64) {
        self.weight.store(weight, Ordering::SeqCst);
        self.current.store(0, Ordering::SeqCst);
    }

    fn increase(&self, amount: i64) -> i64 {
        self.current.fetch_add(amount, Ordering::SeqCst) + amount
    }

    fn decrease(&self, amount: i64) {
        self.current.fetch_sub(amount, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct MethodRoundRobin {
    // structural changes (insert/remove/recycle) run under this lock;
    // the per-node counters above stay atomic
    nodes: Mutex<HashMap<String, Arc<WeightedRoundRobin>>>,
}

/// Smooth weighted round robin. Per `(service, method)` each endpoint keeps a
/// running `current` weight; every selection adds the effective weight to all
/// of them, picks the largest and subtracts the round total from the winner.
/// Over N selections with stable membership each endpoint is chosen
/// `N * w_i / W` times, off by at most one per round.
pub struct RoundRobinLoadBalance {
    method_weight_map: DashMap<String, Arc<MethodRoundRobin>>,
    recycle_period: u64,
}

impl Default for RoundRobinLoadBalance {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundRobinLoadBalance {
    pub fn new() -> Self {
        RoundRobinLoadBalance {
            method_weight_map: DashMap::new(),
            recycle_period: RECYCLE_PERIOD,
        }
    }

    pub fn with_recycle_period(recycle_period: u64) -> Self {
        RoundRobinLoadBalance {
            method_weight_map: DashMap::new(),
            recycle_period,
        }
    }

    fn method_key(invokers: &[BoxInvoker], invocation: &RpcInvocation) -> String {
        format!(
            "{}.{}",
            invokers[0].url().service_key(),
            invocation.method_name()
        )
    }

    #[cfg(test)]
    fn node_count(&self, invokers: &[BoxInvoker], invocation: &RpcInvocation) -> usize {
        self.method_weight_map
            .get(&Self::method_key(invokers, invocation))
            .map(|group| group.nodes.lock().unwrap().len())
            .unwrap_or(0)
    }
}

impl LoadBalance for RoundRobinLoadBalance {
    fn do_select(
        &self,
        invokers: &[BoxInvoker],
        _url: &Url,
        invocation: &RpcInvocation,
    ) -> Option<BoxInvoker> {
        let key = Self::method_key(invokers, invocation);
        let group = self
            .method_weight_map
            .entry(key)
            .or_default()
            .value()
            .clone();
        let mut nodes = group.nodes.lock().unwrap();

        let now = monotonic_millis();
        let mut total_weight = 0i64;
        let mut max_current = i64::MIN;
        let mut selected: Option<(BoxInvoker, Arc<WeightedRoundRobin>)> = None;

        for invoker in invokers {
            let weight = invoker_weight(invoker, invocation);
            let node = nodes
                .entry(invoker.url().identity())
                .or_insert_with(|| Arc::new(WeightedRoundRobin::new(weight)))
                .clone();
            if node.weight() != weight {
                // configured or warm-up weight moved; restart this node
                node.set_weight(weight);
            }
            let current = node.increase(weight);
            node.last_update.store(now, Ordering::SeqCst);
            if current > max_current {
                max_current = current;
                selected = Some((invoker.clone(), node));
            }
            total_weight += weight;
        }

        if invokers.len() != nodes.len() {
            nodes.retain(|_, node| {
                now.saturating_sub(node.last_update.load(Ordering::SeqCst)) <= self.recycle_period
            });
        }

        selected.map(|(invoker, node)| {
            node.decrease(total_weight);
            invoker
        })
    }
}
