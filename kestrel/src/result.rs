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

use bytes::Bytes;

/// A successful reply: an opaque payload plus reply attachments. Failures
/// travel as [`crate::RpcError`] on the `Err` side of an invocation.
#[derive(Debug, Clone, Default)]
pub struct RpcResult {
    value: Option<Bytes>,
    attachments: HashMap<String, String>,
}

impl RpcResult {
    pub fn new(value: Bytes) -> Self {
        RpcResult {
            value: Some(value),
            attachments: HashMap::new(),
        }
    }

    /// The reply fail-safe style strategies acknowledge with when they
    /// swallow a failure.
    pub fn empty() -> Self {
        RpcResult::default()
    }

    pub fn value(&self) -> Option<&Bytes> {
        self.value.as_ref()
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
}
