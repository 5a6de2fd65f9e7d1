pub mod condition;
pub mod mock_selector;

use std::sync::Arc;

use kestrel_base::Url;

use crate::{invocation::RpcInvocation, invoker::BoxInvoker, RpcError};

/// Declarative filter over the candidate invoker list. Routers are pure with
/// respect to one call: `(invokers, consumer url, invocation) -> invokers`.
pub trait Router: Send + Sync {
    fn route(
        &self,
        invokers: Vec<BoxInvoker>,
        url: &Url,
        invocation: &RpcInvocation,
    ) -> Vec<BoxInvoker>;

    /// The URL the router was built from, used for stable tie-breaking when
    /// two routers share a priority.
    fn url(&self) -> Option<&Url> {
        None
    }

    fn priority(&self) -> i32 {
        0
    }

    /// Whether the router must be re-evaluated on every call, as opposed to
    /// once per membership change.
    fn runtime(&self) -> bool {
        false
    }
}

pub type BoxRouter = Arc<dyn Router>;

/// Builds routers from configuration URLs; named implementations are
/// resolved through the extension registry.
pub trait RouterFactory: Send + Sync {
    fn router(&self, url: &Url) -> Result<BoxRouter, RpcError>;
}

/// Pipeline order: `(priority, url string)`; the sort is stable so routers
/// without a URL keep their insertion order.
pub fn sort_routers(routers: &mut [BoxRouter]) {
    routers.sort_by(|a, b| {
        a.priority().cmp(&b.priority()).then_with(|| {
            let a_url = a.url().map(|u| u.to_string()).unwrap_or_default();
            let b_url = b.url().map(|u| u.to_string()).unwrap_or_default();
            a_url.cmp(&b_url)
        })
    });
}
