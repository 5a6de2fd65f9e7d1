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
use kestrel_base::Url;

use crate::{invocation::RpcInvocation, result::RpcResult, RpcError};

/// A callable handle for one remote service instance.
///
/// Within one dispatch the reference is stable; `is_available` may flip at
/// any time and `destroy` must be idempotent. Cluster strategies are
/// themselves `Invoker`s, which is what lets them nest.
#[async_trait]
pub trait Invoker: Send + Sync {
    fn url(&self) -> &Url;

    fn is_available(&self) -> bool {
        true
    }

    async fn invoke(&self, invocation: &RpcInvocation) -> Result<RpcResult, RpcError>;

    fn destroy(&self) {}
}

pub type BoxInvoker = Arc<dyn Invoker>;

impl std::fmt::Debug for dyn Invoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invoker").field("url", self.url()).finish()
    }
}

/// Tried-set membership is by instance identity, not by URL equality: two
/// distinct invokers may expose the same URL during membership churn.
pub fn contains_invoker(list: &[BoxInvoker], target: &BoxInvoker) -> bool {
    list.iter().any(|invoker| Arc::ptr_eq(invoker, target))
}

pub fn invoker_position(list: &[BoxInvoker], target: &BoxInvoker) -> Option<usize> {
    list.iter().position(|invoker| Arc::ptr_eq(invoker, target))
}
