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

use std::fmt;

use thiserror::Error;

/// Classification of an invocation failure. Strategies branch on this:
/// `Biz` is never retried, `Network` and `Timeout` are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcErrorKind {
    Unknown,
    Network,
    Timeout,
    /// Raised by the remote application itself, not by the transport.
    Biz,
    Forbidden,
    NoProvider,
    Config,
}

impl RpcErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcErrorKind::Unknown => "unknown",
            RpcErrorKind::Network => "network",
            RpcErrorKind::Timeout => "timeout",
            RpcErrorKind::Biz => "biz",
            RpcErrorKind::Forbidden => "forbidden",
            RpcErrorKind::NoProvider => "no-provider",
            RpcErrorKind::Config => "config",
        }
    }
}

impl fmt::Display for RpcErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct RpcError {
    kind: RpcErrorKind,
    message: String,
}

impl RpcError {
    pub fn new(kind: RpcErrorKind, message: impl Into<String>) -> Self {
        RpcError {
            kind,
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Unknown, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Timeout, message)
    }

    pub fn biz(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Biz, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Forbidden, message)
    }

    pub fn no_provider(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::NoProvider, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Config, message)
    }

    pub fn kind(&self) -> RpcErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_biz(&self) -> bool {
        self.kind == RpcErrorKind::Biz
    }
}
