/*
 * Licensed to the Apache Software Foundation (ASF) under one or more
 * contributor license agreements.  See the NOTICE file distributed with
 * this work for additional information regarding copyright ownership.
 * The ASF licenses this file to You under the Apache License, Version 2.0
 * (the "License"); you may not use this file except in compliance with
 * the License.  You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

pub mod broadcast;
pub mod failback;
pub mod failfast;
pub mod failover;
pub mod failsafe;
pub mod forking;
pub mod loadbalance;
pub mod router;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, RwLock,
};

use kestrel_base::{
    constants::{
        CLUSTER_AVAILABLE_CHECK_KEY, CLUSTER_STICKY_KEY, DEFAULT_CLUSTER_AVAILABLE_CHECK,
        DEFAULT_CLUSTER_STICKY, DEFAULT_LOADBALANCE, LOADBALANCE_KEY,
    },
    Url,
};
use kestrel_logger::tracing::warn;

use crate::{
    cluster::loadbalance::{random::RandomLoadBalance, LoadBalance},
    context::RpcContext,
    directory::{BoxDirectory, Directory},
    extension,
    invocation::RpcInvocation,
    invoker::{contains_invoker, invoker_position, BoxInvoker, Invoker},
    RpcError,
};

/// Turns a directory into a single fault-tolerant invoker. Strategy
/// implementations are registered in the extension registry under their
/// names (`failover`, `forking`, ...).
pub trait Cluster: Send + Sync {
    fn join(&self, directory: BoxDirectory) -> Result<BoxInvoker, RpcError>;
}

pub type BoxCluster = Arc<dyn Cluster>;

/// Joins through the adaptive dispatcher: the strategy is named by the
/// directory URL's `cluster` parameter.
pub fn join(directory: BoxDirectory) -> Result<BoxInvoker, RpcError> {
    let cluster = extension::clusters().get_adaptive()?;
    cluster.join(directory)
}

/// State and selection logic shared by every cluster strategy: the invoke
/// template (bind attachments, list, resolve the balancer), availability
/// checking and the sticky-aware select/reselect dance.
pub(crate) struct ClusterBase {
    directory: BoxDirectory,
    availablecheck: bool,
    destroyed: AtomicBool,
    // last-writer-wins is fine here; a transient split of traffic between
    // two stickies is tolerable
    sticky_invoker: RwLock<Option<BoxInvoker>>,
}

impl ClusterBase {
    pub(crate) fn new(directory: BoxDirectory) -> Self {
        let availablecheck = directory
            .url()
            .param_bool(CLUSTER_AVAILABLE_CHECK_KEY, DEFAULT_CLUSTER_AVAILABLE_CHECK);
        ClusterBase {
            directory,
            availablecheck,
            destroyed: AtomicBool::new(false),
            sticky_invoker: RwLock::new(None),
        }
    }

    pub(crate) fn url(&self) -> &Url {
        self.directory.url()
    }

    pub(crate) fn is_available(&self) -> bool {
        if let Some(sticky) = self.sticky_invoker.read().unwrap().as_ref() {
            return sticky.is_available();
        }
        self.directory.is_available()
    }

    pub(crate) fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.directory.destroy();
        }
    }

    pub(crate) fn check_destroyed(&self) -> Result<(), RpcError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(RpcError::unknown(format!(
                "cluster invoker for {} is destroyed, can not invoke any more",
                self.url().service_key()
            )));
        }
        Ok(())
    }

    pub(crate) fn list(&self, invocation: &RpcInvocation) -> Result<Vec<BoxInvoker>, RpcError> {
        self.directory.list(invocation)
    }

    /// The invoke template every strategy starts from: refuse when
    /// destroyed, bind ambient attachments, list the directory and resolve
    /// the per-method load balancer.
    pub(crate) fn prepare(
        &self,
        invocation: &mut RpcInvocation,
    ) -> Result<(Vec<BoxInvoker>, Arc<dyn LoadBalance>), RpcError> {
        self.check_destroyed()?;
        let ambient = RpcContext::attachments();
        if !ambient.is_empty() {
            invocation.merge_attachments(ambient);
        }
        let invokers = self.list(invocation)?;
        let balancer = self.init_load_balance(&invokers, invocation);
        Ok((invokers, balancer))
    }

    pub(crate) fn check_invokers(
        &self,
        invokers: &[BoxInvoker],
        invocation: &RpcInvocation,
    ) -> Result<(), RpcError> {
        if invokers.is_empty() {
            return Err(RpcError::no_provider(format!(
                "failed to invoke the method {} in the service {}: no provider available from directory {} on consumer {}, please check whether the providers have been started and registered",
                invocation.method_name(),
                self.url().service_key(),
                self.url(),
                self.url().address(),
            )));
        }
        Ok(())
    }

    pub(crate) fn init_load_balance(
        &self,
        invokers: &[BoxInvoker],
        invocation: &RpcInvocation,
    ) -> Arc<dyn LoadBalance> {
        let name = invokers
            .first()
            .map(|invoker| {
                invoker.url().method_param_or(
                    invocation.method_name(),
                    LOADBALANCE_KEY,
                    DEFAULT_LOADBALANCE,
                )
            })
            .unwrap_or_else(|| DEFAULT_LOADBALANCE.to_string());
        match extension::load_balances().get_or_default(&name) {
            Ok(balancer) => balancer,
            Err(err) => {
                warn!(loadbalance = %name, "falling back to random: {}", err);
                Arc::new(RandomLoadBalance)
            }
        }
    }

    /// Sticky-aware selection. `selected` holds the invokers already tried
    /// in this dispatch; they are avoided for as long as alternatives exist.
    pub(crate) fn select(
        &self,
        balancer: &Arc<dyn LoadBalance>,
        invocation: &RpcInvocation,
        invokers: &[BoxInvoker],
        selected: &[BoxInvoker],
    ) -> Result<BoxInvoker, RpcError> {
        self.check_invokers(invokers, invocation)?;
        let sticky = invokers[0].url().method_param_bool(
            invocation.method_name(),
            CLUSTER_STICKY_KEY,
            DEFAULT_CLUSTER_STICKY,
        );

        {
            let mut slot = self.sticky_invoker.write().unwrap();
            if let Some(cached) = slot.as_ref() {
                // an invoker that left the directory is dead to us
                if !contains_invoker(invokers, cached) {
                    *slot = None;
                }
            }
            if sticky {
                if let Some(cached) = slot.as_ref() {
                    if !contains_invoker(selected, cached)
                        && (!self.availablecheck || cached.is_available())
                    {
                        return Ok(cached.clone());
                    }
                }
            }
        }

        let invoker = self.do_select(balancer, invocation, invokers, selected)?;
        if sticky {
            *self.sticky_invoker.write().unwrap() = Some(invoker.clone());
        }
        Ok(invoker)
    }

    fn do_select(
        &self,
        balancer: &Arc<dyn LoadBalance>,
        invocation: &RpcInvocation,
        invokers: &[BoxInvoker],
        selected: &[BoxInvoker],
    ) -> Result<BoxInvoker, RpcError> {
        if invokers.len() == 1 {
            return Ok(invokers[0].clone());
        }
        let mut invoker = balancer
            .select(invokers, self.url(), invocation)
            .ok_or_else(|| {
                RpcError::no_provider(format!(
                    "load balancer selected nothing out of {} providers for {}",
                    invokers.len(),
                    self.url().service_key()
                ))
            })?;

        if contains_invoker(selected, &invoker)
            || (!invoker.is_available() && self.availablecheck)
        {
            match self.reselect(balancer, invocation, invokers, selected) {
                Some(reselected) => invoker = reselected,
                None => {
                    // walk one past the rejected invoker to avoid colliding
                    // with it again
                    let index = invoker_position(invokers, &invoker).unwrap_or(0);
                    invoker = invokers[(index + 1) % invokers.len()].clone();
                }
            }
        }
        Ok(invoker)
    }

    /// Prefers invokers not yet tried and passing the availability check;
    /// when every candidate was tried already, falls back to the tried ones
    /// that came back available.
    fn reselect(
        &self,
        balancer: &Arc<dyn LoadBalance>,
        invocation: &RpcInvocation,
        invokers: &[BoxInvoker],
        selected: &[BoxInvoker],
    ) -> Option<BoxInvoker> {
        let fresh: Vec<BoxInvoker> = invokers
            .iter()
            .filter(|invoker| {
                (!self.availablecheck || invoker.is_available())
                    && !contains_invoker(selected, invoker)
            })
            .cloned()
            .collect();
        if !fresh.is_empty() {
            return balancer.select(&fresh, self.url(), invocation);
        }
        let tried_but_alive: Vec<BoxInvoker> = selected
            .iter()
            .filter(|invoker| invoker.is_available())
            .cloned()
            .collect();
        if !tried_but_alive.is_empty() {
            return balancer.select(&tried_but_alive, self.url(), invocation);
        }
        None
    }

    #[cfg(test)]
    pub(crate) fn sticky_invoker(&self) -> Option<BoxInvoker> {
        self.sticky_invoker.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cluster::test_support::{MockInvoker, TestDirectory},
        invoker::Invoker,
    };

    fn balancer() -> Arc<dyn LoadBalance> {
        Arc::new(RandomLoadBalance)
    }

    fn invocation() -> RpcInvocation {
        RpcInvocation::default().with_method_name("greet")
    }

    #[test]
    fn test_select_on_empty_list_is_no_provider() {
        let directory = TestDirectory::with_invokers("tri://10.0.0.1:0/greet.Greeter", vec![]);
        let base = ClusterBase::new(directory);
        let err = base
            .select(&balancer(), &invocation(), &[], &[])
            .unwrap_err();
        assert_eq!(err.kind(), crate::RpcErrorKind::NoProvider);
    }

    #[test]
    fn test_availability_discipline() {
        let dead = MockInvoker::succeeding("tri://10.0.0.1:20880/greet.Greeter");
        dead.set_available(false);
        let alive = MockInvoker::succeeding("tri://10.0.0.2:20880/greet.Greeter");
        let invokers: Vec<BoxInvoker> = vec![dead, alive.clone()];
        let directory = TestDirectory::with_invokers(
            "tri://10.0.0.1:0/greet.Greeter",
            invokers.clone(),
        );
        let base = ClusterBase::new(directory);
        for _ in 0..20 {
            let picked = base
                .select(&balancer(), &invocation(), &invokers, &[])
                .unwrap();
            assert!(picked.is_available());
        }
    }

    #[test]
    fn test_tried_invokers_avoided_while_alternatives_exist() {
        let first = MockInvoker::succeeding("tri://10.0.0.1:20880/greet.Greeter");
        let second = MockInvoker::succeeding("tri://10.0.0.2:20880/greet.Greeter");
        let invokers: Vec<BoxInvoker> = vec![first.clone(), second.clone()];
        let directory = TestDirectory::with_invokers(
            "tri://10.0.0.1:0/greet.Greeter",
            invokers.clone(),
        );
        let base = ClusterBase::new(directory);
        for _ in 0..20 {
            let picked = base
                .select(&balancer(), &invocation(), &invokers, &[first.clone()])
                .unwrap();
            assert_eq!(picked.url().address(), second.url().address());
        }
    }

    #[test]
    fn test_single_candidate_bypasses_balancer() {
        let only = MockInvoker::succeeding("tri://10.0.0.1:20880/greet.Greeter");
        only.set_available(false);
        let invokers: Vec<BoxInvoker> = vec![only.clone()];
        let directory = TestDirectory::with_invokers(
            "tri://10.0.0.1:0/greet.Greeter",
            invokers.clone(),
        );
        let base = ClusterBase::new(directory);
        // the only candidate is returned even when unavailable
        let picked = base
            .select(&balancer(), &invocation(), &invokers, &[])
            .unwrap();
        assert!(Arc::ptr_eq(&picked, &invokers[0]));
    }

    #[test]
    fn test_sticky_cache_cleared_when_invoker_leaves() {
        let first = MockInvoker::succeeding("tri://10.0.0.1:20880/greet.Greeter?sticky=true");
        let second = MockInvoker::succeeding("tri://10.0.0.2:20880/greet.Greeter?sticky=true");
        let invokers: Vec<BoxInvoker> = vec![first.clone(), second.clone()];
        let directory = TestDirectory::with_invokers(
            "tri://10.0.0.1:0/greet.Greeter",
            invokers.clone(),
        );
        let base = ClusterBase::new(directory);

        let picked = base
            .select(&balancer(), &invocation(), &invokers, &[])
            .unwrap();
        assert!(base.sticky_invoker().is_some());

        // membership loses the sticky invoker
        let remaining: Vec<BoxInvoker> = invokers
            .iter()
            .filter(|invoker| !Arc::ptr_eq(invoker, &picked))
            .cloned()
            .collect();
        let repicked = base
            .select(&balancer(), &invocation(), &remaining, &[])
            .unwrap();
        assert!(!Arc::ptr_eq(&repicked, &picked));
        assert!(Arc::ptr_eq(
            &base.sticky_invoker().unwrap(),
            &repicked
        ));
    }
}
