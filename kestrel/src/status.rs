use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use dashmap::DashMap;
use kestrel_base::Url;
use once_cell::sync::Lazy;

static SERVICE_STATISTICS: Lazy<DashMap<String, Arc<RpcStatus>>> = Lazy::new(DashMap::new);

static METHOD_STATISTICS: Lazy<DashMap<String, Arc<RpcStatus>>> = Lazy::new(DashMap::new);

/// Per-endpoint (and per-endpoint-method) call statistics. The least-active
/// load balancer reads `active`; the transport layer is expected to drive
/// `begin_count`/`end_count` around each remote call.
#[derive(Debug, Default)]
pub struct RpcStatus {
    active: AtomicUsize,
    total: AtomicUsize,
    failed: AtomicUsize,
    total_elapsed: AtomicU64,
    failed_elapsed: AtomicU64,
    max_elapsed: AtomicU64,
}

impl RpcStatus {
    pub fn status(url: &Url) -> Arc<RpcStatus> {
        SERVICE_STATISTICS
            .entry(url.identity())
            .or_default()
            .clone()
    }

    pub fn method_status(url: &Url, method: &str) -> Arc<RpcStatus> {
        METHOD_STATISTICS
            .entry(format!("{}.{}", url.identity(), method))
            .or_default()
            .clone()
    }

    pub fn remove_status(url: &Url) {
        SERVICE_STATISTICS.remove(&url.identity());
    }

    pub fn remove_method_status(url: &Url, method: &str) {
        METHOD_STATISTICS.remove(&format!("{}.{}", url.identity(), method));
    }

    pub fn begin_count(url: &Url, method: &str) {
        Self::status(url).active.fetch_add(1, Ordering::SeqCst);
        Self::method_status(url, method)
            .active
            .fetch_add(1, Ordering::SeqCst);
    }

    pub fn end_count(url: &Url, method: &str, elapsed_ms: u64, succeeded: bool) {
        for status in [Self::status(url), Self::method_status(url, method)] {
            status.active.fetch_sub(1, Ordering::SeqCst);
            status.total.fetch_add(1, Ordering::SeqCst);
            status.total_elapsed.fetch_add(elapsed_ms, Ordering::SeqCst);
            status.max_elapsed.fetch_max(elapsed_ms, Ordering::SeqCst);
            if !succeeded {
                status.failed.fetch_add(1, Ordering::SeqCst);
                status
                    .failed_elapsed
                    .fetch_add(elapsed_ms, Ordering::SeqCst);
            }
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn total_elapsed(&self) -> u64 {
        self.total_elapsed.load(Ordering::SeqCst)
    }

    pub fn max_elapsed(&self) -> u64 {
        self.max_elapsed.load(Ordering::SeqCst)
    }
}
