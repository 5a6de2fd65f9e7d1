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

use std::sync::Arc;

use async_trait::async_trait;
use kestrel_base::{
    constants::{DEFAULT_RETRIES, RETRIES_KEY},
    Url,
};
use kestrel_logger::tracing::warn;

use crate::{
    cluster::{loadbalance::LoadBalance, Cluster, ClusterBase},
    directory::BoxDirectory,
    invocation::RpcInvocation,
    invoker::{BoxInvoker, Invoker},
    result::RpcResult,
    RpcError,
};

pub const NAME: &str = "failover";

pub struct FailoverCluster;

impl Cluster for FailoverCluster {
    fn join(&self, directory: BoxDirectory) -> Result<BoxInvoker, RpcError> {
        Ok(Arc::new(FailoverClusterInvoker::new(directory)))
    }
}

/// Retries failed calls on other providers, up to `retries` extra attempts.
/// Business failures are final: the remote application executed, retrying
/// could duplicate its effects.
pub struct FailoverClusterInvoker {
    base: ClusterBase,
}

impl FailoverClusterInvoker {
    pub fn new(directory: BoxDirectory) -> Self {
        FailoverClusterInvoker {
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
        let method = invocation.method_name();
        let retries = self
            .base
            .url()
            .method_param_usize(method, RETRIES_KEY, DEFAULT_RETRIES);
        let attempts = retries + 1;

        let mut candidates = invokers;
        let mut tried: Vec<BoxInvoker> = Vec::with_capacity(attempts.min(candidates.len()));
        let mut last_error: Option<RpcError> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                self.base.check_destroyed()?;
                // the membership may have churned while we were failing;
                // re-list so a recovered or new provider can take the retry
                candidates = self.base.list(invocation)?;
                self.base.check_invokers(&candidates, invocation)?;
            }
            let invoker = self
                .base
                .select(&balancer, invocation, &candidates, &tried)?;
            tried.push(invoker.clone());
            match invoker.invoke(invocation).await {
                Ok(result) => {
                    if let Some(err) = &last_error {
                        warn!(
                            method,
                            service = %self.base.url().service_key(),
                            attempt,
                            "succeeded after retry, last error was: {}",
                            err
                        );
                    }
                    return Ok(result);
                }
                Err(err) if err.is_biz() => return Err(err),
                Err(err) => {
                    warn!(
                        method,
                        provider = %invoker.url().address(),
                        attempt,
                        "invocation failed, will retry: {}",
                        err
                    );
                    last_error = Some(err);
                }
            }
        }

        let addresses: Vec<String> = tried.iter().map(|i| i.url().address()).collect();
        let last_error =
            last_error.unwrap_or_else(|| RpcError::unknown("no attempt was performed"));
        Err(RpcError::new(
            last_error.kind(),
            format!(
                "failed to invoke the method {} in the service {}: tried {} times on providers [{}] from directory {} on consumer {}, last error: {}",
                method,
                self.base.url().service_key(),
                attempts,
                addresses.join(", "),
                self.base.url(),
                self.base.url().address(),
                last_error,
            ),
        ))
    }
}

#[async_trait]
impl Invoker for FailoverClusterInvoker {
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
