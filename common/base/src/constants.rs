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

pub const GROUP_KEY: &str = "group";

pub const VERSION_KEY: &str = "version";

pub const DEFAULT_VERSION: &str = "0.0.0";

pub const DEFAULT_GROUP: &str = "default";

pub const METHOD_KEY: &str = "method";

pub const METHODS_KEY: &str = "methods";

pub const TIMESTAMP_KEY: &str = "timestamp";

pub const PROTOCOL_KEY: &str = "protocol";

pub const HOST_KEY: &str = "host";

pub const PORT_KEY: &str = "port";

pub const ADDRESS_KEY: &str = "address";

pub const DEFAULT_KEY_PREFIX: &str = "default.";

pub const DEFAULT_KEY: &str = "default";

pub const REMOVE_VALUE_PREFIX: &str = "-";

pub const COMMA_SEPARATOR: &str = ",";

pub const CLUSTER_KEY: &str = "cluster";

pub const DEFAULT_CLUSTER: &str = "failover";

pub const LOADBALANCE_KEY: &str = "loadbalance";

pub const DEFAULT_LOADBALANCE: &str = "random";

pub const RETRIES_KEY: &str = "retries";

pub const DEFAULT_RETRIES: usize = 2;

pub const FORKS_KEY: &str = "forks";

pub const DEFAULT_FORKS: i64 = 2;

pub const TIMEOUT_KEY: &str = "timeout";

pub const DEFAULT_TIMEOUT: u64 = 1000;

/**
 * To decide whether to enable sticky strategy for cluster
 */
pub const CLUSTER_STICKY_KEY: &str = "sticky";

pub const DEFAULT_CLUSTER_STICKY: bool = false;

/**
 * To decide whether to exclude unavailable invoker from the cluster
 */
pub const CLUSTER_AVAILABLE_CHECK_KEY: &str = "cluster.availablecheck";

pub const DEFAULT_CLUSTER_AVAILABLE_CHECK: bool = true;

pub const WEIGHT_KEY: &str = "weight";

pub const DEFAULT_WEIGHT: i64 = 100;

pub const WARMUP_KEY: &str = "warmup";

pub const DEFAULT_WARMUP: i64 = 10 * 60 * 1000;

pub const RULE_KEY: &str = "rule";

pub const FORCE_KEY: &str = "force";

pub const PRIORITY_KEY: &str = "priority";

pub const RUNTIME_KEY: &str = "runtime";

/**
 * key for the name of a default router plugin appended by the directory
 */
pub const ROUTER_KEY: &str = "router";

pub const MOCK_PROTOCOL: &str = "mock";

/**
 * When this attribute appears in invocation's attachments, mock invokers will be selected
 */
pub const INVOCATION_NEED_MOCK: &str = "invocation.need.mock";

pub const FAILBACK_TASKS_KEY: &str = "failbacktasks";

pub const DEFAULT_FAILBACK_TASKS: usize = 100;

pub const DEFAULT_FAILBACK_TIMES: usize = 3;

pub const RETRY_PERIOD_KEY: &str = "retry.period";

pub const DEFAULT_RETRY_PERIOD: u64 = 5000;

pub const HASH_NODES_KEY: &str = "hash.nodes";

pub const DEFAULT_HASH_NODES: usize = 160;

pub const HASH_ARGUMENTS_KEY: &str = "hash.arguments";

pub const DEFAULT_HASH_ARGUMENTS: &str = "0";
