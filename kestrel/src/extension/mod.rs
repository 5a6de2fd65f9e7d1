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

pub mod activate;
pub mod adaptive;
pub mod manifest;

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::{atomic::AtomicI64, atomic::Ordering as AtomicOrdering, Arc, RwLock},
};

use kestrel_base::{constants::DEFAULT_KEY, Url};
use kestrel_logger::tracing::warn;
use once_cell::sync::Lazy;
use thiserror::Error;

use crate::{
    cluster::{
        loadbalance::{
            consistent_hash::ConsistentHashLoadBalance, least_active::LeastActiveLoadBalance,
            random::RandomLoadBalance, round_robin::RoundRobinLoadBalance, LoadBalance,
        },
        router::{condition::ConditionRouterFactory, RouterFactory},
        broadcast::BroadcastCluster,
        failback::FailbackCluster,
        failfast::FailfastCluster,
        failover::FailoverCluster,
        failsafe::FailsafeCluster,
        forking::ForkingCluster,
        Cluster,
    },
    extension::activate::{activate_compare, is_active, is_match_group, ActivateSpec},
    RpcError,
};

pub const LOAD_BALANCE_CAPABILITY: &str = "kestrel.LoadBalance";
pub const CLUSTER_CAPABILITY: &str = "kestrel.Cluster";
pub const ROUTER_FACTORY_CAPABILITY: &str = "kestrel.RouterFactory";

/// Misses fall back to the capability default with a warning at most this
/// often.
const FALLBACK_WARN_INTERVAL_MS: i64 = 30_000;

#[derive(Error, Debug)]
pub enum ExtensionError {
    #[error("no such extension {name:?} for {capability}{causes}")]
    NoSuchExtension {
        capability: &'static str,
        name: String,
        causes: String,
    },
    #[error("duplicate extension name {name:?} for {capability}")]
    DuplicateName {
        capability: &'static str,
        name: String,
    },
    #[error("extension {name:?} for {capability} cannot be both default and adaptive")]
    CyclicDefault {
        capability: &'static str,
        name: String,
    },
    #[error("adaptive instance already registered for {capability}")]
    MultipleAdaptive { capability: &'static str },
    #[error("no adaptive instance registered for {capability}")]
    NoAdaptive { capability: &'static str },
    #[error("failed to create extension {name:?} for {capability}: {cause}")]
    CreateFailed {
        capability: &'static str,
        name: String,
        cause: String,
    },
}

impl From<ExtensionError> for RpcError {
    fn from(err: ExtensionError) -> Self {
        RpcError::config(err.to_string())
    }
}

/// Provenance of a registration, mirroring the three manifest search paths.
/// Plain names must be unique across tiers; wrapper re-registration at a
/// later tier overrides the earlier binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Internal,
    Public,
    Compat,
}

pub type PlainFactory<T> = Arc<dyn Fn() -> Result<Arc<T>, RpcError> + Send + Sync>;
pub type WrapperFactory<T> = Arc<dyn Fn(Arc<T>) -> Arc<T> + Send + Sync>;

struct PlainRecord<T: ?Sized> {
    factory: PlainFactory<T>,
    tier: Tier,
}

struct WrapperRecord<T: ?Sized> {
    name: String,
    factory: WrapperFactory<T>,
}

/// Per-capability registry of named implementations. Plain instances are
/// singletons, wrapped by every registered wrapper in registration order.
pub struct ExtensionLoader<T: ?Sized + Send + Sync + 'static> {
    capability: &'static str,
    default_name: RwLock<Option<String>>,
    adaptive_name: RwLock<Option<String>>,
    plains: RwLock<HashMap<String, PlainRecord<T>>>,
    wrappers: RwLock<Vec<WrapperRecord<T>>>,
    adaptive: RwLock<Option<PlainFactory<T>>>,
    adaptive_instance: RwLock<Option<Arc<T>>>,
    instances: RwLock<HashMap<String, Arc<T>>>,
    activates: RwLock<HashMap<String, ActivateSpec>>,
    load_errors: RwLock<HashMap<String, String>>,
    last_fallback_warn: AtomicI64,
}

impl<T: ?Sized + Send + Sync + 'static> ExtensionLoader<T> {
    fn new(capability: &'static str) -> Self {
        ExtensionLoader {
            capability,
            default_name: RwLock::new(None),
            adaptive_name: RwLock::new(None),
            plains: RwLock::new(HashMap::new()),
            wrappers: RwLock::new(Vec::new()),
            adaptive: RwLock::new(None),
            adaptive_instance: RwLock::new(None),
            instances: RwLock::new(HashMap::new()),
            activates: RwLock::new(HashMap::new()),
            load_errors: RwLock::new(HashMap::new()),
            last_fallback_warn: AtomicI64::new(i64::MIN / 2),
        }
    }

    pub fn capability(&self) -> &'static str {
        self.capability
    }

    pub fn register(
        &self,
        name: &str,
        tier: Tier,
        factory: PlainFactory<T>,
    ) -> Result<(), ExtensionError> {
        let mut plains = self.plains.write().unwrap();
        if plains.contains_key(name) {
            return Err(ExtensionError::DuplicateName {
                capability: self.capability,
                name: name.to_string(),
            });
        }
        plains.insert(name.to_string(), PlainRecord { factory, tier });
        Ok(())
    }

    pub fn register_wrapper(&self, name: &str, factory: WrapperFactory<T>) {
        let mut wrappers = self.wrappers.write().unwrap();
        match wrappers.iter_mut().find(|record| record.name == name) {
            // later registration overrides the binding, keeping its slot
            Some(record) => record.factory = factory,
            None => wrappers.push(WrapperRecord {
                name: name.to_string(),
                factory,
            }),
        }
    }

    pub fn register_activate(&self, name: &str, spec: ActivateSpec) {
        self.activates
            .write()
            .unwrap()
            .insert(name.to_string(), spec);
    }

    pub fn register_adaptive(
        &self,
        name: &str,
        factory: PlainFactory<T>,
    ) -> Result<(), ExtensionError> {
        if self.default_name.read().unwrap().as_deref() == Some(name) {
            return Err(ExtensionError::CyclicDefault {
                capability: self.capability,
                name: name.to_string(),
            });
        }
        let mut adaptive = self.adaptive.write().unwrap();
        if adaptive.is_some() {
            return Err(ExtensionError::MultipleAdaptive {
                capability: self.capability,
            });
        }
        *adaptive = Some(factory);
        *self.adaptive_name.write().unwrap() = Some(name.to_string());
        Ok(())
    }

    pub fn set_default(&self, name: &str) -> Result<(), ExtensionError> {
        if self.adaptive_name.read().unwrap().as_deref() == Some(name) {
            return Err(ExtensionError::CyclicDefault {
                capability: self.capability,
                name: name.to_string(),
            });
        }
        *self.default_name.write().unwrap() = Some(name.to_string());
        Ok(())
    }

    /// Records a registration failure; the cause resurfaces when someone
    /// actually asks for that name.
    pub fn record_load_error(&self, name: &str, cause: impl Into<String>) {
        self.load_errors
            .write()
            .unwrap()
            .insert(name.to_string(), cause.into());
    }

    /// The fully wired singleton registered under `name`.
    pub fn get(&self, name: &str) -> Result<Arc<T>, ExtensionError> {
        if let Some(instance) = self.instances.read().unwrap().get(name) {
            return Ok(instance.clone());
        }
        let factory = self
            .plains
            .read()
            .unwrap()
            .get(name)
            .map(|record| record.factory.clone());
        let Some(factory) = factory else {
            return Err(self.no_such_extension(name));
        };
        let plain = factory().map_err(|err| {
            self.record_load_error(name, err.to_string());
            self.no_such_extension(name)
        })?;
        let wrapped = {
            let wrappers = self.wrappers.read().unwrap();
            wrappers
                .iter()
                .fold(plain, |inner, wrapper| (wrapper.factory)(inner))
        };
        let mut instances = self.instances.write().unwrap();
        Ok(instances
            .entry(name.to_string())
            .or_insert(wrapped)
            .clone())
    }

    pub fn get_default(&self) -> Option<Arc<T>> {
        let name = self.default_name.read().unwrap().clone()?;
        self.get(&name).ok()
    }

    pub fn default_name(&self) -> Option<String> {
        self.default_name.read().unwrap().clone()
    }

    /// Like [`ExtensionLoader::get`], falling back to the declared default on
    /// a miss with a throttled warning.
    pub fn get_or_default(&self, name: &str) -> Result<Arc<T>, ExtensionError> {
        match self.get(name) {
            Ok(instance) => Ok(instance),
            Err(err) => {
                let default_name = self.default_name.read().unwrap().clone();
                match default_name {
                    Some(default_name) if default_name != name => {
                        self.warn_fallback(name, &default_name);
                        self.get(&default_name)
                    }
                    _ => Err(err),
                }
            }
        }
    }

    /// The single dispatching instance: each of its calls reads the
    /// designated URL parameter and forwards to the named implementation.
    pub fn get_adaptive(&self) -> Result<Arc<T>, ExtensionError> {
        if let Some(instance) = self.adaptive_instance.read().unwrap().as_ref() {
            return Ok(instance.clone());
        }
        let factory =
            self.adaptive
                .read()
                .unwrap()
                .clone()
                .ok_or(ExtensionError::NoAdaptive {
                    capability: self.capability,
                })?;
        let instance = factory().map_err(|err| ExtensionError::CreateFailed {
            capability: self.capability,
            name: self
                .adaptive_name
                .read()
                .unwrap()
                .clone()
                .unwrap_or_default(),
            cause: err.to_string(),
        })?;
        let mut cached = self.adaptive_instance.write().unwrap();
        Ok(cached.get_or_insert(instance).clone())
    }

    /// Ordered activate-for-condition instances: auto-activated entries
    /// (group-matched, URL-triggered, `before`/`after`/`order` sorted)
    /// interleaved with the names listed under `key` on the URL.
    pub fn get_active(
        &self,
        url: &Url,
        key: &str,
        group: Option<&str>,
    ) -> Result<Vec<Arc<T>>, ExtensionError> {
        let values: Vec<String> = url
            .param(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let mut exts: Vec<Arc<T>> = Vec::new();
        let remove_default = values.iter().any(|v| v == "-default");
        if !remove_default {
            let mut candidates: Vec<(String, ActivateSpec)> = {
                let activates = self.activates.read().unwrap();
                activates
                    .iter()
                    .map(|(name, spec)| (name.clone(), spec.clone()))
                    .collect()
            };
            // registration iteration order is arbitrary; pin it before the
            // activate comparator decides the final order
            candidates.sort_by(|a, b| a.0.cmp(&b.0));
            candidates.retain(|(name, spec)| {
                is_match_group(group, &spec.group)
                    && !values.iter().any(|v| v == name)
                    && !values.iter().any(|v| v == &format!("-{}", name))
                    && is_active(spec, url)
            });
            candidates.sort_by(activate_compare);
            for (name, _) in &candidates {
                exts.push(self.get(name)?);
            }
        }

        let mut usrs: Vec<Arc<T>> = Vec::new();
        for name in &values {
            if name.starts_with('-') || values.iter().any(|v| v == &format!("-{}", name)) {
                continue;
            }
            if name == DEFAULT_KEY {
                // the `default` marker splices the named entries in front of
                // the auto-activated ones
                if !usrs.is_empty() {
                    let mut merged = std::mem::take(&mut usrs);
                    merged.extend(exts.drain(..));
                    exts = merged;
                }
            } else {
                usrs.push(self.get(name)?);
            }
        }
        if !usrs.is_empty() {
            exts.extend(usrs);
        }
        Ok(exts)
    }

    /// Registers every `name=constructor` line of a manifest against the
    /// given constructor table. Unknown constructors and malformed lines are
    /// deferred: they error only when their name is requested.
    pub fn load_manifest(
        &self,
        tier: Tier,
        text: &str,
        constructors: &HashMap<String, PlainFactory<T>>,
    ) -> Result<(), ExtensionError> {
        let (entries, issues) = manifest::parse(text);
        for issue in issues {
            self.record_load_error(&issue.text, format!("line {}: {}", issue.line, issue.cause));
        }
        for entry in entries {
            match constructors.get(&entry.constructor) {
                Some(factory) => self.register(&entry.name, tier, factory.clone())?,
                None => self.record_load_error(
                    &entry.name,
                    format!("unknown constructor {:?}", entry.constructor),
                ),
            }
        }
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plains.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn tier_of(&self, name: &str) -> Option<Tier> {
        self.plains.read().unwrap().get(name).map(|r| r.tier)
    }

    fn no_such_extension(&self, name: &str) -> ExtensionError {
        let errors = self.load_errors.read().unwrap();
        let causes = if errors.is_empty() {
            String::new()
        } else {
            let mut lines: Vec<String> = errors
                .iter()
                .map(|(name, cause)| format!("{}: {}", name, cause))
                .collect();
            lines.sort();
            format!(" (recorded load errors: {})", lines.join("; "))
        };
        ExtensionError::NoSuchExtension {
            capability: self.capability,
            name: name.to_string(),
            causes,
        }
    }

    fn warn_fallback(&self, name: &str, default_name: &str) {
        let now = crate::cluster::loadbalance::epoch_millis();
        let last = self.last_fallback_warn.load(AtomicOrdering::SeqCst);
        if now.saturating_sub(last) >= FALLBACK_WARN_INTERVAL_MS
            && self
                .last_fallback_warn
                .compare_exchange(last, now, AtomicOrdering::SeqCst, AtomicOrdering::SeqCst)
                .is_ok()
        {
            warn!(
                capability = self.capability,
                requested = name,
                fallback = default_name,
                "extension not found, using default"
            );
        }
    }
}

/// Process-global registry of per-capability loaders. Reads after the
/// one-time registration hold no locks beyond the loader's own.
pub struct ExtensionRegistry {
    loaders: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        ExtensionRegistry {
            loaders: RwLock::new(HashMap::new()),
        }
    }

    pub fn global() -> &'static ExtensionRegistry {
        static GLOBAL: Lazy<ExtensionRegistry> = Lazy::new(|| {
            let registry = ExtensionRegistry::new();
            register_builtins(&registry);
            registry
        });
        &GLOBAL
    }

    /// The loader scoped to capability interface `T`, created on first use.
    pub fn load<T: ?Sized + Send + Sync + 'static>(
        &self,
        capability: &'static str,
    ) -> Arc<ExtensionLoader<T>> {
        let type_id = TypeId::of::<ExtensionLoader<T>>();
        if let Some(existing) = self.loaders.read().unwrap().get(&type_id) {
            return existing
                .clone()
                .downcast::<ExtensionLoader<T>>()
                .expect("extension loader type");
        }
        let mut loaders = self.loaders.write().unwrap();
        loaders
            .entry(type_id)
            .or_insert_with(|| Arc::new(ExtensionLoader::<T>::new(capability)))
            .clone()
            .downcast::<ExtensionLoader<T>>()
            .expect("extension loader type")
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn load_balances() -> Arc<ExtensionLoader<dyn LoadBalance>> {
    ExtensionRegistry::global().load(LOAD_BALANCE_CAPABILITY)
}

pub fn clusters() -> Arc<ExtensionLoader<dyn Cluster>> {
    ExtensionRegistry::global().load(CLUSTER_CAPABILITY)
}

pub fn router_factories() -> Arc<ExtensionLoader<dyn RouterFactory>> {
    ExtensionRegistry::global().load(ROUTER_FACTORY_CAPABILITY)
}

fn plain<T: ?Sized + Send + Sync + 'static>(
    build: impl Fn() -> Arc<T> + Send + Sync + 'static,
) -> PlainFactory<T> {
    Arc::new(move || Ok(build()))
}

fn register_builtins(registry: &ExtensionRegistry) {
    use crate::cluster::{broadcast, failback, failfast, failover, failsafe, forking, loadbalance};

    let lb = registry.load::<dyn LoadBalance>(LOAD_BALANCE_CAPABILITY);
    let _ = lb.register(
        loadbalance::random::NAME,
        Tier::Internal,
        plain(|| Arc::new(RandomLoadBalance) as Arc<dyn LoadBalance>),
    );
    let _ = lb.register(
        loadbalance::round_robin::NAME,
        Tier::Internal,
        plain(|| Arc::new(RoundRobinLoadBalance::new()) as Arc<dyn LoadBalance>),
    );
    let _ = lb.register(
        loadbalance::least_active::NAME,
        Tier::Internal,
        plain(|| Arc::new(LeastActiveLoadBalance) as Arc<dyn LoadBalance>),
    );
    let _ = lb.register(
        loadbalance::consistent_hash::NAME,
        Tier::Internal,
        plain(|| Arc::new(ConsistentHashLoadBalance::default()) as Arc<dyn LoadBalance>),
    );
    let _ = lb.set_default(loadbalance::random::NAME);
    let _ = lb.register_adaptive(
        adaptive::ADAPTIVE_NAME,
        plain(|| Arc::new(adaptive::AdaptiveLoadBalance) as Arc<dyn LoadBalance>),
    );

    let cluster = registry.load::<dyn Cluster>(CLUSTER_CAPABILITY);
    let _ = cluster.register(
        failover::NAME,
        Tier::Internal,
        plain(|| Arc::new(FailoverCluster) as Arc<dyn Cluster>),
    );
    let _ = cluster.register(
        failfast::NAME,
        Tier::Internal,
        plain(|| Arc::new(FailfastCluster) as Arc<dyn Cluster>),
    );
    let _ = cluster.register(
        failsafe::NAME,
        Tier::Internal,
        plain(|| Arc::new(FailsafeCluster) as Arc<dyn Cluster>),
    );
    let _ = cluster.register(
        failback::NAME,
        Tier::Internal,
        plain(|| Arc::new(FailbackCluster) as Arc<dyn Cluster>),
    );
    let _ = cluster.register(
        forking::NAME,
        Tier::Internal,
        plain(|| Arc::new(ForkingCluster) as Arc<dyn Cluster>),
    );
    let _ = cluster.register(
        broadcast::NAME,
        Tier::Internal,
        plain(|| Arc::new(BroadcastCluster) as Arc<dyn Cluster>),
    );
    let _ = cluster.set_default(failover::NAME);
    let _ = cluster.register_adaptive(
        adaptive::ADAPTIVE_NAME,
        plain(|| Arc::new(adaptive::AdaptiveCluster) as Arc<dyn Cluster>),
    );

    let routers = registry.load::<dyn RouterFactory>(ROUTER_FACTORY_CAPABILITY);
    let _ = routers.register(
        "condition",
        Tier::Internal,
        plain(|| Arc::new(ConditionRouterFactory) as Arc<dyn RouterFactory>),
    );
    let _ = routers.set_default("condition");
}
