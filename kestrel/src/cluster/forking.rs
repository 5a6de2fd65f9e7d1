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

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use kestrel_base::{
    constants::{DEFAULT_FORKS, DEFAULT_TIMEOUT, FORKS_KEY, TIMEOUT_KEY},
    Url,
};
use tokio::sync::mpsc;

use crate::{
    cluster::{loadbalance::LoadBalance, Cluster, ClusterBase},
    context::RpcContext,
    directory::BoxDirectory,
    invocation::RpcInvocation,
    invoker::{contains_invoker, BoxInvoker, Invoker},
    result::RpcResult,
    RpcError,
};

pub const NAME: &str = "forking";

pub struct ForkingCluster;

impl Cluster for ForkingCluster {
    fn join(&self, directory: BoxDirectory) -> Result<BoxInvoker, RpcError> {
        Ok(Arc::new(ForkingClusterInvoker::new(directory)))
    }
}

/// Invokes `forks` providers in parallel and returns the first reply. Only
/// reads should go through this: parallel writes are on the caller.
///
/// A failing leg only forwards its error when it is the last one standing,
/// which guarantees any success reaches the channel ahead of any error. The
/// deadline applies to the channel read alone; legs that outlive it deliver
/// into channel capacity and are dropped with it.
pub struct ForkingClusterInvoker {
    base: ClusterBase,
}

impl ForkingClusterInvoker {
    pub fn new(directory: BoxDirectory) -> Self {
        ForkingClusterInvoker {
            base: ClusterBase::new(directory),
        }
    }

    fn fork_selection(
        &self,
        invocation: &RpcInvocation,
        invokers: &[BoxInvoker],
        balancer: &Arc<dyn LoadBalance>,
    ) -> Result<Vec<BoxInvoker>, RpcError> {
        let forks = self.base.url().param_i64(FORKS_KEY, DEFAULT_FORKS);
        if forks <= 0 || forks as usize >= invokers.len() {
            return Ok(invokers.to_vec());
        }
        let mut selected = Vec::with_capacity(forks as usize);
        for _ in 0..forks {
            let invoker = self
                .base
                .select(balancer, invocation, invokers, &selected)?;
            if !contains_invoker(&selected, &invoker) {
                selected.push(invoker);
            }
        }
        Ok(selected)
    }

    async fn do_invoke(
        &self,
        invocation: &RpcInvocation,
        invokers: Vec<BoxInvoker>,
        balancer: Arc<dyn LoadBalance>,
    ) -> Result<RpcResult, RpcError> {
        self.base.check_invokers(&invokers, invocation)?;
        let timeout = self.base.url().param_u64(TIMEOUT_KEY, DEFAULT_TIMEOUT);
        let selected = self.fork_selection(invocation, &invokers, &balancer)?;

        let failures = Arc::new(AtomicUsize::new(0));
        // capacity equals the leg count: a late leg can always hand off its
        // outcome without blocking, even after the reader has left
        let (tx, mut rx) = mpsc::channel::<Result<RpcResult, RpcError>>(selected.len());
        for invoker in &selected {
            let invoker = invoker.clone();
            let invocation = invocation.clone();
            let tx = tx.clone();
            let failures = failures.clone();
            let legs = selected.len();
            tokio::spawn(async move {
                match invoker.invoke(&invocation).await {
                    Ok(result) => {
                        let _ = tx.try_send(Ok(result));
                    }
                    Err(err) => {
                        // only the last failing leg reports, so a success can
                        // never queue behind an error
                        if failures.fetch_add(1, Ordering::SeqCst) + 1 >= legs {
                            let _ = tx.try_send(Err(err));
                        }
                    }
                }
            });
        }
        drop(tx);

        let outcome = tokio::time::timeout(Duration::from_millis(timeout), rx.recv()).await;
        RpcContext::clear_attachments();

        let addresses = selected
            .iter()
            .map(|invoker| invoker.url().address())
            .collect::<Vec<_>>()
            .join(", ");
        match outcome {
            Ok(Some(Ok(result))) => Ok(result),
            Ok(Some(Err(err))) => Err(RpcError::new(
                err.kind(),
                format!(
                    "failed to forking invoke providers [{}] for method {}, last error: {}",
                    addresses,
                    invocation.method_name(),
                    err,
                ),
            )),
            Ok(None) | Err(_) => Err(RpcError::timeout(format!(
                "failed to forking invoke providers [{}] for method {} within {} ms",
                addresses,
                invocation.method_name(),
                timeout,
            ))),
        }
    }
}

#[async_trait]
impl Invoker for ForkingClusterInvoker {
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
