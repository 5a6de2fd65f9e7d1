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
    collections::HashMap,
    fmt::{Display, Formatter},
    str::FromStr,
};

use http::Uri;
use thiserror::Error;

use crate::{
    constants::{DEFAULT_GROUP, DEFAULT_VERSION, GROUP_KEY, VERSION_KEY},
    hash::hash_to_u64,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid url {url:?}: {reason}")]
pub struct UrlParseError {
    url: String,
    reason: String,
}

impl UrlParseError {
    fn new(url: &str, reason: impl Into<String>) -> Self {
        UrlParseError {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

/// Immutable description of one endpoint or consumer, e.g.
/// `tri://10.0.0.1:8888/greet.Greeter?weight=200&loadbalance=roundrobin`.
///
/// The parameter map is the only channel by which configuration reaches the
/// cluster engine: every strategy reads its knobs from here, either globally
/// or per method via [`Url::method_param`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Url {
    raw: String,
    protocol: String,
    host: String,
    port: u16,
    path: String,
    params: HashMap<String, String>,
}

impl FromStr for Url {
    type Err = UrlParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uri = s
            .parse::<Uri>()
            .map_err(|err| UrlParseError::new(s, err.to_string()))?;
        let protocol = uri
            .scheme_str()
            .ok_or_else(|| UrlParseError::new(s, "missing protocol"))?
            .to_string();
        let authority = uri
            .authority()
            .ok_or_else(|| UrlParseError::new(s, "missing authority"))?;
        let host = authority.host().to_string();
        let port = authority.port_u16().unwrap_or(0);
        let path = uri.path().trim_start_matches('/').to_string();
        let params = match uri.path_and_query().and_then(|pq| pq.query()) {
            Some(query) => decode_query(query),
            None => HashMap::new(),
        };
        let mut url = Url {
            raw: String::new(),
            protocol,
            host,
            port,
            path,
            params,
        };
        url.renew_raw();
        Ok(url)
    }
}

impl Url {
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// `{group}/{path}:{version}`, the key under which per-service state
    /// (load-balancer nodes, statistics) is stored.
    pub fn service_key(&self) -> String {
        format!(
            "{}/{}:{}",
            self.param(GROUP_KEY).unwrap_or(DEFAULT_GROUP),
            self.path,
            self.param(VERSION_KEY).unwrap_or(DEFAULT_VERSION),
        )
    }

    /// Node identity used by stateful load balancers: the address plus a hash
    /// of the full URL string, so that two endpoints on the same address but
    /// with different parameters do not share state.
    pub fn identity(&self) -> String {
        format!("{}#{}", self.address(), hash_to_u64(&self.raw))
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(|v| v.as_str())
    }

    pub fn param_or(&self, key: &str, default: &str) -> String {
        self.param(key).unwrap_or(default).to_string()
    }

    pub fn param_bool(&self, key: &str, default: bool) -> bool {
        self.param(key)
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(default)
    }

    pub fn param_i64(&self, key: &str, default: i64) -> i64 {
        self.param(key)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(default)
    }

    pub fn param_u64(&self, key: &str, default: u64) -> u64 {
        self.param(key)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(default)
    }

    pub fn param_usize(&self, key: &str, default: usize) -> usize {
        self.param(key)
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(default)
    }

    /// Router rules travel percent-encoded inside a parameter.
    pub fn decoded_param(&self, key: &str) -> Option<String> {
        self.param(key).map(|v| {
            urlencoding::decode(v)
                .map(|d| d.into_owned())
                .unwrap_or_else(|_| v.to_string())
        })
    }

    /// Method-scoped parameter: `{method}.{key}` wins over the plain `{key}`.
    pub fn method_param(&self, method: &str, key: &str) -> Option<&str> {
        if !method.is_empty() {
            if let Some(v) = self.param(&format!("{}.{}", method, key)) {
                return Some(v);
            }
        }
        self.param(key)
    }

    pub fn method_param_or(&self, method: &str, key: &str, default: &str) -> String {
        self.method_param(method, key).unwrap_or(default).to_string()
    }

    pub fn method_param_bool(&self, method: &str, key: &str, default: bool) -> bool {
        self.method_param(method, key)
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(default)
    }

    pub fn method_param_i64(&self, method: &str, key: &str, default: i64) -> i64 {
        self.method_param(method, key)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(default)
    }

    pub fn method_param_usize(&self, method: &str, key: &str, default: usize) -> usize {
        self.method_param(method, key)
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(default)
    }

    pub fn set_param(&mut self, key: &str, value: &str) {
        self.params.insert(key.to_string(), value.to_string());
        self.renew_raw();
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.set_param(key, value);
        self
    }

    /// Flattens the URL into the string map the condition router matches
    /// against: every parameter plus the structural fields.
    pub fn to_param_map(&self) -> HashMap<String, String> {
        let mut map = self.params.clone();
        map.insert("protocol".to_string(), self.protocol.clone());
        map.insert("host".to_string(), self.host.clone());
        map.insert("port".to_string(), self.port.to_string());
        map.insert("address".to_string(), self.address());
        map.insert("path".to_string(), self.path.clone());
        map
    }

    fn renew_raw(&mut self) {
        let mut params_vec: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        params_vec.sort();
        let query = if params_vec.is_empty() {
            String::new()
        } else {
            format!("?{}", params_vec.join("&"))
        };
        self.raw = format!(
            "{}://{}:{}/{}{}",
            self.protocol, self.host, self.port, self.path, query
        );
    }
}

impl Display for Url {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

fn decode_query(raw_query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for pair in raw_query.split('&') {
        let mut it = pair.splitn(2, '=');
        let key = it.next().unwrap_or("").trim();
        let value = it.next().unwrap_or("").trim();
        if key.is_empty() || value.is_empty() {
            continue;
        }
        params.insert(key.to_string(), value.to_string());
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Url {
        "tri://10.0.0.1:8888/greet.Greeter?weight=200&greet.retries=5&retries=2"
            .parse()
            .unwrap()
    }

    #[test]
    fn test_parse_basic_fields() {
        let url = sample();
        assert_eq!(url.protocol(), "tri");
        assert_eq!(url.host(), "10.0.0.1");
        assert_eq!(url.port(), 8888);
        assert_eq!(url.path(), "greet.Greeter");
        assert_eq!(url.address(), "10.0.0.1:8888");
        assert_eq!(url.param("weight"), Some("200"));
    }

    #[test]
    fn test_parse_rejects_bare_host() {
        assert!("10.0.0.1:8888".parse::<Url>().is_err());
    }

    #[test]
    fn test_method_param_falls_back_to_global() {
        let url = sample();
        assert_eq!(url.method_param_usize("greet", "retries", 0), 5);
        assert_eq!(url.method_param_usize("other", "retries", 0), 2);
        assert_eq!(url.method_param_usize("other", "missing", 7), 7);
    }

    #[test]
    fn test_service_key_defaults() {
        let url = sample();
        assert_eq!(url.service_key(), "default/greet.Greeter:0.0.0");
        let grouped = sample()
            .with_param("group", "blue")
            .with_param("version", "1.2.0");
        assert_eq!(grouped.service_key(), "blue/greet.Greeter:1.2.0");
    }

    #[test]
    fn test_identity_distinguishes_params() {
        let a = sample();
        let b = sample().with_param("weight", "300");
        assert_ne!(a.identity(), b.identity());
        assert_eq!(a.identity(), sample().identity());
    }

    #[test]
    fn test_set_param_renews_raw_string() {
        let mut url = sample();
        url.set_param("loadbalance", "roundrobin");
        assert!(url.to_string().contains("loadbalance=roundrobin"));
        let reparsed: Url = url.to_string().parse().unwrap();
        assert_eq!(reparsed.param("loadbalance"), Some("roundrobin"));
    }

    #[test]
    fn test_decoded_param() {
        let url: Url =
            "condition://0.0.0.0:0/greet.Greeter?rule=host%20%3D%2010.0.0.1%20%3D%3E%20host%20!%3D%2010.0.0.2"
                .parse()
                .unwrap();
        assert_eq!(
            url.decoded_param("rule").unwrap(),
            "host = 10.0.0.1 => host != 10.0.0.2"
        );
    }
}
