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

use crate::Level;

const LEVEL_ENV_KEY: &str = "KESTREL_LOG_LEVEL";

pub(crate) fn default() {
    let level = std::env::var(LEVEL_ENV_KEY)
        .map(|raw| level_from(&raw))
        .unwrap_or(Level::INFO);
    // try_init: the embedding application may already own a subscriber
    let _ = tracing_subscriber::fmt()
        .compact()
        .with_max_level(level)
        .with_thread_names(false)
        .with_line_number(true)
        .try_init();
}

// unknown values degrade to INFO rather than failing startup
fn level_from(raw: &str) -> Level {
    match raw.trim().to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}
