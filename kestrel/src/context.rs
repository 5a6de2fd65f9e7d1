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

use std::{cell::RefCell, collections::HashMap};

thread_local! {
    static ATTACHMENTS: RefCell<HashMap<String, String>> = RefCell::new(HashMap::new());
}

/// Ambient per-caller metadata. Cluster strategies bind the current
/// attachments into every invocation they dispatch; the forking strategy
/// clears them when it returns.
///
/// The recorder is thread-scoped: whatever the caller stashed here before
/// entering the engine is visible at the dispatch entry point, which runs on
/// the caller's thread.
pub struct RpcContext;

impl RpcContext {
    pub fn set_attachment(key: impl Into<String>, value: impl Into<String>) {
        ATTACHMENTS.with(|attachments| {
            attachments.borrow_mut().insert(key.into(), value.into());
        });
    }

    pub fn attachment(key: &str) -> Option<String> {
        ATTACHMENTS.with(|attachments| attachments.borrow().get(key).cloned())
    }

    pub fn attachments() -> HashMap<String, String> {
        ATTACHMENTS.with(|attachments| attachments.borrow().clone())
    }

    pub fn clear_attachments() {
        ATTACHMENTS.with(|attachments| attachments.borrow_mut().clear());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_clear() {
        RpcContext::set_attachment("trace", "t-1");
        assert_eq!(RpcContext::attachment("trace").as_deref(), Some("t-1"));
        assert_eq!(RpcContext::attachments().len(), 1);
        RpcContext::clear_attachments();
        assert!(RpcContext::attachments().is_empty());
    }

    #[test]
    fn test_isolated_per_thread() {
        RpcContext::set_attachment("who", "outer");
        std::thread::spawn(|| {
            assert!(RpcContext::attachment("who").is_none());
        })
        .join()
        .unwrap();
        RpcContext::clear_attachments();
    }
}
