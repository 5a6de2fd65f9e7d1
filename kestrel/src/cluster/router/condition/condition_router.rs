use std::collections::HashMap;

use kestrel_base::{
    constants::{
        DEFAULT_KEY_PREFIX, FORCE_KEY, METHODS_KEY, METHOD_KEY, PRIORITY_KEY, RULE_KEY,
        RUNTIME_KEY,
    },
    Url,
};
use kestrel_logger::tracing::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    cluster::router::{condition::matcher::MatchPair, BoxRouter, Router, RouterFactory},
    invocation::RpcInvocation,
    invoker::{BoxInvoker, Invoker},
    RpcError,
};

static ROUTE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([&!=,]*)\s*([^&!=,\s]+)").unwrap());

/// Routes by a declarative rule `whenExpr => thenExpr`. The when side is
/// matched against the consumer URL; when it holds, candidates are filtered
/// by the then side against each provider URL.
///
/// An empty when side matches every consumer; an empty then side denies the
/// matched consumers outright.
#[derive(Debug, Clone)]
pub struct ConditionRouter {
    url: Url,
    priority: i32,
    force: bool,
    runtime: bool,
    when_condition: HashMap<String, MatchPair>,
    then_condition: Option<HashMap<String, MatchPair>>,
}

impl ConditionRouter {
    /// Builds from a configuration URL whose `rule` parameter carries the
    /// percent-encoded rule text.
    pub fn new(url: Url) -> Result<Self, RpcError> {
        let rule = url
            .decoded_param(RULE_KEY)
            .ok_or_else(|| RpcError::config(format!("missing route rule on {}", url)))?;
        Self::with_rule(url, &rule)
    }

    pub fn with_rule(url: Url, rule: &str) -> Result<Self, RpcError> {
        if rule.trim().is_empty() {
            return Err(RpcError::config("illegal route rule: empty rule"));
        }
        let rule = rule.replace("consumer.", "").replace("provider.", "");
        let (when_rule, then_rule) = match rule.find("=>") {
            Some(i) => (rule[..i].trim(), rule[i + 2..].trim()),
            None => ("", rule.trim()),
        };
        let when = if when_rule.is_empty() || when_rule == "true" {
            HashMap::new()
        } else {
            parse_rule(when_rule)?
        };
        let then = if then_rule.is_empty() || then_rule == "false" {
            None
        } else {
            Some(parse_rule(then_rule)?)
        };
        Ok(ConditionRouter {
            priority: url.param_i64(PRIORITY_KEY, 0) as i32,
            force: url.param_bool(FORCE_KEY, false),
            runtime: url.param_bool(RUNTIME_KEY, false),
            url,
            when_condition: when,
            then_condition: then,
        })
    }

    pub fn match_when(&self, url: &Url, invocation: &RpcInvocation) -> bool {
        self.when_condition.is_empty()
            || match_condition(&self.when_condition, url, None, Some(invocation))
    }

    pub fn match_then(&self, provider_url: &Url, consumer_url: &Url) -> bool {
        match &self.then_condition {
            Some(condition) if !condition.is_empty() => {
                match_condition(condition, provider_url, Some(consumer_url), None)
            }
            _ => false,
        }
    }
}

impl Router for ConditionRouter {
    fn route(
        &self,
        invokers: Vec<BoxInvoker>,
        url: &Url,
        invocation: &RpcInvocation,
    ) -> Vec<BoxInvoker> {
        if invokers.is_empty() {
            return invokers;
        }
        if !self.match_when(url, invocation) {
            return invokers;
        }
        let Some(_) = &self.then_condition else {
            warn!(
                consumer = %url.address(),
                service = %url.service_key(),
                "consumer is in the route blacklist"
            );
            return Vec::new();
        };
        let result: Vec<BoxInvoker> = invokers
            .iter()
            .filter(|invoker| self.match_then(invoker.url(), url))
            .cloned()
            .collect();
        if !result.is_empty() {
            result
        } else if self.force {
            warn!(
                consumer = %url.address(),
                service = %url.service_key(),
                rule = ?self.url.decoded_param(RULE_KEY),
                "route result is empty, force execute"
            );
            result
        } else {
            invokers
        }
    }

    fn url(&self) -> Option<&Url> {
        Some(&self.url)
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn runtime(&self) -> bool {
        self.runtime
    }
}

/// Which value set of the current pair `,`-continuations append to.
enum Side {
    Matches,
    Mismatches,
}

fn parse_rule(rule: &str) -> Result<HashMap<String, MatchPair>, RpcError> {
    let mut condition: HashMap<String, MatchPair> = HashMap::new();
    if rule.trim().is_empty() {
        return Ok(condition);
    }
    let mut current_key: Option<String> = None;
    let mut current_side: Option<Side> = None;
    for cap in ROUTE_PATTERN.captures_iter(rule) {
        let separator = cap.get(1).map(|m| m.as_str()).unwrap_or("");
        let content = cap.get(2).map(|m| m.as_str()).unwrap_or("");
        match separator {
            // start of the expression
            "" => {
                condition.insert(content.to_string(), MatchPair::default());
                current_key = Some(content.to_string());
                current_side = None;
            }
            // a new clause
            "&" => {
                condition.entry(content.to_string()).or_default();
                current_key = Some(content.to_string());
                current_side = None;
            }
            "=" => {
                let pair = pair_for(&mut condition, &current_key, rule, separator, content)?;
                pair.matches.insert(content.to_string());
                current_side = Some(Side::Matches);
            }
            "!=" => {
                let pair = pair_for(&mut condition, &current_key, rule, separator, content)?;
                pair.mismatches.insert(content.to_string());
                current_side = Some(Side::Mismatches);
            }
            "," => {
                let pair = pair_for(&mut condition, &current_key, rule, separator, content)?;
                match current_side {
                    Some(Side::Matches) => {
                        pair.matches.insert(content.to_string());
                    }
                    Some(Side::Mismatches) => {
                        pair.mismatches.insert(content.to_string());
                    }
                    None => {
                        return Err(illegal_rule(rule, separator, content));
                    }
                }
            }
            _ => return Err(illegal_rule(rule, separator, content)),
        }
    }
    Ok(condition)
}

fn pair_for<'a>(
    condition: &'a mut HashMap<String, MatchPair>,
    current_key: &Option<String>,
    rule: &str,
    separator: &str,
    content: &str,
) -> Result<&'a mut MatchPair, RpcError> {
    let key = current_key
        .as_ref()
        .ok_or_else(|| illegal_rule(rule, separator, content))?;
    condition
        .get_mut(key)
        .ok_or_else(|| illegal_rule(rule, separator, content))
}

fn illegal_rule(rule: &str, separator: &str, content: &str) -> RpcError {
    RpcError::config(format!(
        "illegal route rule {:?}: unexpected {:?} before {:?}",
        rule, separator, content
    ))
}

fn match_condition(
    condition: &HashMap<String, MatchPair>,
    url: &Url,
    param: Option<&Url>,
    invocation: Option<&RpcInvocation>,
) -> bool {
    let sample = url.to_param_map();
    condition.iter().all(|(key, pair)| {
        let value = match invocation {
            Some(invocation) if key == METHOD_KEY || key == METHODS_KEY => {
                Some(invocation.method_name().to_string())
            }
            _ => sample
                .get(key)
                .cloned()
                .or_else(|| sample.get(&format!("{}{}", DEFAULT_KEY_PREFIX, key)).cloned()),
        };
        match value {
            Some(value) => pair.is_match(&value, param),
            // a required value that the url does not carry can never match
            None => pair.matches.is_empty(),
        }
    })
}

pub struct ConditionRouterFactory;

impl RouterFactory for ConditionRouterFactory {
    fn router(&self, url: &Url) -> Result<BoxRouter, RpcError> {
        let router = ConditionRouter::new(url.clone())?;
        info!(url = %url, "built condition router");
        Ok(std::sync::Arc::new(router))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::{invoker::Invoker, result::RpcResult};

    struct UrlInvoker {
        url: Url,
    }

    #[async_trait]
    impl Invoker for UrlInvoker {
        fn url(&self) -> &Url {
            &self.url
        }

        async fn invoke(&self, _invocation: &RpcInvocation) -> Result<RpcResult, RpcError> {
            Ok(RpcResult::empty())
        }
    }

    fn invoker(host: &str) -> BoxInvoker {
        Arc::new(UrlInvoker {
            url: format!("tri://{}:20880/greet.Greeter", host).parse().unwrap(),
        })
    }

    fn consumer(host: &str) -> Url {
        format!("tri://{}:0/greet.Greeter", host).parse().unwrap()
    }

    fn router(rule: &str) -> ConditionRouter {
        let url: Url = "condition://0.0.0.0:0/greet.Greeter".parse().unwrap();
        ConditionRouter::with_rule(url, rule).unwrap()
    }

    fn hosts(invokers: &[BoxInvoker]) -> Vec<String> {
        invokers.iter().map(|i| i.url().host().to_string()).collect()
    }

    #[test]
    fn test_parse_rule_structure() {
        let parsed = parse_rule("host = 2.2.2.2 & host != 1.1.1.1 & method = hello").unwrap();
        let host = parsed.get("host").unwrap();
        assert!(host.matches.contains("2.2.2.2"));
        assert!(host.mismatches.contains("1.1.1.1"));
        let method = parsed.get("method").unwrap();
        assert!(method.matches.contains("hello"));
        assert!(method.mismatches.is_empty());
    }

    #[test]
    fn test_parse_rule_value_list() {
        let parsed = parse_rule("host = a.com,b.com,c.com & host != d.com,e.com").unwrap();
        let host = parsed.get("host").unwrap();
        assert_eq!(host.matches.len(), 3);
        assert_eq!(host.mismatches.len(), 2);
    }

    #[test]
    fn test_parse_rule_rejects_dangling_separator() {
        assert!(ConditionRouter::with_rule(
            "condition://0.0.0.0:0/s".parse().unwrap(),
            "=> = 1.1.1.1"
        )
        .is_err());
        assert!(
            ConditionRouter::with_rule("condition://0.0.0.0:0/s".parse().unwrap(), " ").is_err()
        );
    }

    #[test]
    fn test_route_filters_matched_consumer() {
        let router = router("host = 10.0.0.1 => host != 10.0.0.2");
        let invokers = vec![invoker("10.0.0.1"), invoker("10.0.0.2"), invoker("10.0.0.3")];
        let invocation = RpcInvocation::default().with_method_name("greet");

        let routed = router.route(invokers.clone(), &consumer("10.0.0.1"), &invocation);
        assert_eq!(hosts(&routed), ["10.0.0.1", "10.0.0.3"]);

        // consumer outside the when side is untouched
        let routed = router.route(invokers, &consumer("10.0.0.9"), &invocation);
        assert_eq!(hosts(&routed), ["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }

    #[test]
    fn test_empty_when_applies_then_to_everyone() {
        let router = router("=> host != 10.0.0.2");
        let invokers = vec![invoker("10.0.0.1"), invoker("10.0.0.2")];
        let invocation = RpcInvocation::default().with_method_name("greet");
        let routed = router.route(invokers, &consumer("10.0.0.7"), &invocation);
        assert_eq!(hosts(&routed), ["10.0.0.1"]);
    }

    #[test]
    fn test_empty_then_blacklists_consumer() {
        let router = router("host = 10.0.0.1 =>");
        let invokers = vec![invoker("10.0.0.1"), invoker("10.0.0.2")];
        let invocation = RpcInvocation::default().with_method_name("greet");
        assert!(router
            .route(invokers.clone(), &consumer("10.0.0.1"), &invocation)
            .is_empty());
        assert_eq!(
            router
                .route(invokers, &consumer("10.0.0.5"), &invocation)
                .len(),
            2
        );
    }

    #[test]
    fn test_empty_result_bypassed_unless_forced() {
        let invokers = vec![invoker("10.0.0.1"), invoker("10.0.0.2")];
        let invocation = RpcInvocation::default().with_method_name("greet");

        let lax = router("host = 10.0.0.1 => host = 9.9.9.9");
        assert_eq!(
            lax.route(invokers.clone(), &consumer("10.0.0.1"), &invocation)
                .len(),
            2
        );

        let url: Url = "condition://0.0.0.0:0/greet.Greeter?force=true".parse().unwrap();
        let forced = ConditionRouter::with_rule(url, "host = 10.0.0.1 => host = 9.9.9.9").unwrap();
        assert!(forced
            .route(invokers, &consumer("10.0.0.1"), &invocation)
            .is_empty());
    }

    #[test]
    fn test_method_clause_matches_invocation() {
        let router = router("method = greet => host = 10.0.0.1");
        let invokers = vec![invoker("10.0.0.1"), invoker("10.0.0.2")];
        let greet = RpcInvocation::default().with_method_name("greet");
        let other = RpcInvocation::default().with_method_name("other");
        assert_eq!(
            hosts(&router.route(invokers.clone(), &consumer("10.0.0.9"), &greet)),
            ["10.0.0.1"]
        );
        assert_eq!(
            router.route(invokers, &consumer("10.0.0.9"), &other).len(),
            2
        );
    }

    #[test]
    fn test_absent_key_with_matches_fails_clause() {
        // the consumer url has no `application` parameter
        let router = router("application = shop => host = 10.0.0.1");
        let invokers = vec![invoker("10.0.0.1"), invoker("10.0.0.2")];
        let invocation = RpcInvocation::default().with_method_name("greet");
        assert_eq!(
            router
                .route(invokers, &consumer("10.0.0.1"), &invocation)
                .len(),
            2
        );
    }

    #[test]
    fn test_priority_and_runtime_from_url() {
        let url: Url = "condition://0.0.0.0:0/greet.Greeter?priority=7&runtime=true"
            .parse()
            .unwrap();
        let router = ConditionRouter::with_rule(url, "=> host != 1.1.1.1").unwrap();
        assert_eq!(router.priority(), 7);
        assert!(router.runtime());
    }
}
