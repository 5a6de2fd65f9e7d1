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

use std::collections::HashMap;

/// One remote call as seen by the cluster engine. Carries no transport state;
/// the attachments map is the per-call metadata channel.
#[derive(Debug, Clone, Default)]
pub struct RpcInvocation {
    method_name: String,
    parameter_types: Vec<String>,
    arguments: Vec<String>,
    attachments: HashMap<String, String>,
}

impl RpcInvocation {
    pub fn with_method_name(mut self, method_name: impl Into<String>) -> Self {
        self.method_name = method_name.into();
        self
    }

    pub fn with_parameter_types(mut self, parameter_types: Vec<String>) -> Self {
        self.parameter_types = parameter_types;
        self
    }

    pub fn with_arguments(mut self, arguments: Vec<String>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_attachment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attachments.insert(key.into(), value.into());
        self
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn parameter_types(&self) -> &[String] {
        &self.parameter_types
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    pub fn attachments(&self) -> &HashMap<String, String> {
        &self.attachments
    }

    pub fn attachment(&self, key: &str) -> Option<&str> {
        self.attachments.get(key).map(|v| v.as_str())
    }

    pub fn set_attachment(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attachments.insert(key.into(), value.into());
    }

    /// Binds ambient context attachments into this invocation. Existing keys
    /// are kept; the explicit per-call value wins over the ambient one.
    pub fn merge_attachments(&mut self, attachments: HashMap<String, String>) {
        for (key, value) in attachments {
            self.attachments.entry(key).or_insert(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let invocation = RpcInvocation::default()
            .with_method_name("greet")
            .with_arguments(vec!["world".to_string()])
            .with_attachment("token", "t1");
        assert_eq!(invocation.method_name(), "greet");
        assert_eq!(invocation.arguments(), ["world".to_string()]);
        assert_eq!(invocation.attachment("token"), Some("t1"));
    }

    #[test]
    fn test_merge_keeps_explicit_value() {
        let mut invocation = RpcInvocation::default().with_attachment("token", "explicit");
        let mut ambient = HashMap::new();
        ambient.insert("token".to_string(), "ambient".to_string());
        ambient.insert("trace".to_string(), "abc".to_string());
        invocation.merge_attachments(ambient);
        assert_eq!(invocation.attachment("token"), Some("explicit"));
        assert_eq!(invocation.attachment("trace"), Some("abc"));
    }
}
