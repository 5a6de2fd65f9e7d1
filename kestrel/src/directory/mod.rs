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

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, RwLock,
};

use kestrel_base::{constants::ROUTER_KEY, Url};
use kestrel_logger::tracing::warn;

use crate::{
    cluster::router::{mock_selector::MockInvokersSelector, sort_routers, BoxRouter, Router},
    extension,
    invocation::RpcInvocation,
    invoker::{BoxInvoker, Invoker},
    RpcError,
};

/// The live membership for one service interface. `list` returns a snapshot:
/// later membership mutations are never observed by a call already in
/// flight.
pub trait Directory: Send + Sync {
    fn list(&self, invocation: &RpcInvocation) -> Result<Vec<BoxInvoker>, RpcError>;

    /// The consumer URL this directory was built for.
    fn url(&self) -> &Url;

    fn is_available(&self) -> bool;

    fn destroy(&self);
}

pub type BoxDirectory = Arc<dyn Directory>;

/// Directory over an explicit invoker list, with the full router pipeline.
/// Discovery churn is emulated by [`StaticDirectory::refresh`].
///
/// Routers with `runtime == false` run once per membership change and feed a
/// cached snapshot; `runtime == true` routers and the terminal mock selector
/// run on every `list`.
pub struct StaticDirectory {
    url: Url,
    routers: RwLock<Vec<BoxRouter>>,
    invokers: RwLock<Vec<BoxInvoker>>,
    routed: RwLock<Vec<BoxInvoker>>,
    mock_selector: MockInvokersSelector,
    destroyed: AtomicBool,
}

impl StaticDirectory {
    pub fn new(url: Url, invokers: Vec<BoxInvoker>) -> Self {
        Self::with_routers(url, invokers, Vec::new())
    }

    pub fn with_routers(url: Url, invokers: Vec<BoxInvoker>, mut routers: Vec<BoxRouter>) -> Self {
        if let Some(name) = url.param(ROUTER_KEY) {
            match extension::router_factories()
                .get(name)
                .map_err(RpcError::from)
                .and_then(|factory| factory.router(&url))
            {
                Ok(router) => routers.push(router),
                Err(err) => warn!(router = name, "failed to append url router: {}", err),
            }
        }
        sort_routers(&mut routers);
        let directory = StaticDirectory {
            url,
            routers: RwLock::new(routers),
            invokers: RwLock::new(invokers),
            routed: RwLock::new(Vec::new()),
            mock_selector: MockInvokersSelector,
            destroyed: AtomicBool::new(false),
        };
        directory.reroute();
        directory
    }

    /// Replaces the membership, as a discovery notification would.
    pub fn refresh(&self, invokers: Vec<BoxInvoker>) {
        *self.invokers.write().unwrap() = invokers;
        self.reroute();
    }

    /// Runs the non-runtime routers over the raw membership into the cached
    /// snapshot that `list` starts from.
    fn reroute(&self) {
        let snapshot = self.invokers.read().unwrap().clone();
        let routers = self.routers.read().unwrap();
        let construction_call = RpcInvocation::default();
        let routed = routers
            .iter()
            .filter(|router| !router.runtime())
            .fold(snapshot, |acc, router| {
                router.route(acc, &self.url, &construction_call)
            });
        *self.routed.write().unwrap() = routed;
    }
}

impl Directory for StaticDirectory {
    fn list(&self, invocation: &RpcInvocation) -> Result<Vec<BoxInvoker>, RpcError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(RpcError::unknown(format!(
                "directory of {} already destroyed",
                self.url
            )));
        }
        let mut snapshot = self.routed.read().unwrap().clone();
        {
            let routers = self.routers.read().unwrap();
            for router in routers.iter().filter(|router| router.runtime()) {
                snapshot = router.route(snapshot, &self.url, invocation);
            }
        }
        Ok(self.mock_selector.route(snapshot, &self.url, invocation))
    }

    fn url(&self) -> &Url {
        &self.url
    }

    fn is_available(&self) -> bool {
        !self.destroyed.load(Ordering::SeqCst)
            && self
                .invokers
                .read()
                .unwrap()
                .iter()
                .any(|invoker| invoker.is_available())
    }

    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            for invoker in self.invokers.write().unwrap().drain(..) {
                invoker.destroy();
            }
            self.routed.write().unwrap().clear();
        }
    }
}
