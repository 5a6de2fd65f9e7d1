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

pub mod consistent_hash;
pub mod least_active;
pub mod random;
pub mod round_robin;

use std::time::{SystemTime, UNIX_EPOCH};

use kestrel_base::{
    constants::{DEFAULT_WARMUP, DEFAULT_WEIGHT, TIMESTAMP_KEY, WARMUP_KEY, WEIGHT_KEY},
    Url,
};

use crate::{
    invocation::RpcInvocation,
    invoker::{BoxInvoker, Invoker},
};

/// Picks one invoker out of a non-empty candidate list. Implementations may
/// hold per-service state and must be safe under concurrent callers.
pub trait LoadBalance: Send + Sync {
    fn select(
        &self,
        invokers: &[BoxInvoker],
        url: &Url,
        invocation: &RpcInvocation,
    ) -> Option<BoxInvoker> {
        match invokers.len() {
            0 => None,
            1 => Some(invokers[0].clone()),
            _ => self.do_select(invokers, url, invocation),
        }
    }

    fn do_select(
        &self,
        invokers: &[BoxInvoker],
        url: &Url,
        invocation: &RpcInvocation,
    ) -> Option<BoxInvoker>;
}

/// Effective weight of an invoker for this call: the configured `weight`
/// scaled by the warm-up factor while the endpoint's uptime (from its
/// `timestamp` parameter) is still below `warmup`.
pub fn invoker_weight(invoker: &BoxInvoker, invocation: &RpcInvocation) -> i64 {
    let url = invoker.url();
    let mut weight = url.method_param_i64(invocation.method_name(), WEIGHT_KEY, DEFAULT_WEIGHT);
    if weight > 0 {
        let timestamp = url.param_i64(TIMESTAMP_KEY, 0);
        if timestamp > 0 {
            let uptime = epoch_millis() - timestamp;
            if uptime < 0 {
                return 1;
            }
            let warmup = url.param_i64(WARMUP_KEY, DEFAULT_WARMUP);
            if uptime > 0 && uptime < warmup {
                weight = calculate_warmup_weight(uptime, warmup, weight);
            }
        }
    }
    weight.max(0)
}

/// Scales linearly from 1 to `weight` over the warm-up interval,
/// never returning less than 1.
fn calculate_warmup_weight(uptime: i64, warmup: i64, weight: i64) -> i64 {
    let ww = (uptime as f64 / (warmup as f64 / weight as f64)) as i64;
    if ww < 1 {
        1
    } else {
        ww.min(weight)
    }
}

pub(crate) fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use async_trait::async_trait;
    use kestrel_base::Url;

    use crate::{
        invocation::RpcInvocation, invoker::BoxInvoker, invoker::Invoker, result::RpcResult,
        RpcError,
    };

    pub(crate) struct StaticInvoker {
        url: Url,
    }

    impl StaticInvoker {
        pub(crate) fn with_url(url: Url) -> BoxInvoker {
            Arc::new(StaticInvoker { url })
        }
    }

    #[async_trait]
    impl Invoker for StaticInvoker {
        fn url(&self) -> &Url {
            &self.url
        }

        async fn invoke(&self, _invocation: &RpcInvocation) -> Result<RpcResult, RpcError> {
            Ok(RpcResult::empty())
        }
    }

    pub(crate) fn weighted_invokers(weights: &[i64]) -> Vec<BoxInvoker> {
        weights
            .iter()
            .enumerate()
            .map(|(i, w)| {
                StaticInvoker::with_url(
                    format!("tri://10.0.0.{}:20880/greet.Greeter?weight={}", i + 1, w)
                        .parse()
                        .unwrap(),
                )
            })
            .collect()
    }

    pub(crate) fn consumer_url() -> Url {
        "tri://10.0.0.100:0/greet.Greeter".parse().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::{test_support::*, *};

    #[test]
    fn test_warmup_weight_scales_linearly() {
        assert_eq!(calculate_warmup_weight(60_000, 600_000, 100), 10);
        assert_eq!(calculate_warmup_weight(300_000, 600_000, 100), 50);
        assert_eq!(calculate_warmup_weight(1, 600_000, 100), 1);
        assert_eq!(calculate_warmup_weight(599_999, 600_000, 100), 99);
    }

    #[test]
    fn test_invoker_weight_without_timestamp_is_configured() {
        let invokers = weighted_invokers(&[200]);
        let invocation = RpcInvocation::default().with_method_name("greet");
        assert_eq!(invoker_weight(&invokers[0], &invocation), 200);
    }

    #[test]
    fn test_invoker_weight_during_warmup_is_reduced() {
        let started = epoch_millis() - 60_000;
        let invoker = StaticInvoker::with_url(
            format!(
                "tri://10.0.0.1:20880/greet.Greeter?weight=100&timestamp={}",
                started
            )
            .parse()
            .unwrap(),
        );
        let invocation = RpcInvocation::default().with_method_name("greet");
        let weight = invoker_weight(&invoker, &invocation);
        assert!(weight >= 1 && weight < 100, "warming weight {}", weight);
    }

    #[test]
    fn test_invoker_weight_after_warmup_is_full() {
        let started = epoch_millis() - 2 * DEFAULT_WARMUP;
        let invoker = StaticInvoker::with_url(
            format!(
                "tri://10.0.0.1:20880/greet.Greeter?weight=100&timestamp={}",
                started
            )
            .parse()
            .unwrap(),
        );
        let invocation = RpcInvocation::default().with_method_name("greet");
        assert_eq!(invoker_weight(&invoker, &invocation), 100);
    }
}
