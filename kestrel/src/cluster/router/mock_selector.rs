use kestrel_base::{
    constants::{INVOCATION_NEED_MOCK, MOCK_PROTOCOL},
    Url,
};

use crate::{
    cluster::router::Router,
    invocation::RpcInvocation,
    invoker::{BoxInvoker, Invoker},
};

/// Terminal router of every directory pipeline: mock invokers are only
/// eligible when the call explicitly asks for them through the
/// `invocation.need.mock` attachment, and are invisible otherwise.
#[derive(Debug, Default)]
pub struct MockInvokersSelector;

impl Router for MockInvokersSelector {
    fn route(
        &self,
        invokers: Vec<BoxInvoker>,
        _url: &Url,
        invocation: &RpcInvocation,
    ) -> Vec<BoxInvoker> {
        let need_mock = invocation
            .attachment(INVOCATION_NEED_MOCK)
            .map(|v| v == "true")
            .unwrap_or(false);
        invokers
            .into_iter()
            .filter(|invoker| (invoker.url().protocol() == MOCK_PROTOCOL) == need_mock)
            .collect()
    }

    fn runtime(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::{invoker::Invoker, result::RpcResult, RpcError};

    struct UrlInvoker {
        url: Url,
    }

    #[async_trait]
    impl Invoker for UrlInvoker {
        fn url(&self) -> &Url {
            &self.url
        }

        async fn invoke(&self, _invocation: &RpcInvocation) -> Result<RpcResult, RpcError> {
            Ok(RpcResult::empty())
        }
    }

    fn invoker(url: &str) -> BoxInvoker {
        Arc::new(UrlInvoker {
            url: url.parse().unwrap(),
        })
    }

    fn candidates() -> Vec<BoxInvoker> {
        vec![
            invoker("tri://10.0.0.1:20880/greet.Greeter"),
            invoker("mock://10.0.0.2:20880/greet.Greeter"),
        ]
    }

    #[test]
    fn test_mock_invokers_hidden_by_default() {
        let consumer: Url = "tri://10.0.0.9:0/greet.Greeter".parse().unwrap();
        let routed = MockInvokersSelector.route(
            candidates(),
            &consumer,
            &RpcInvocation::default().with_method_name("greet"),
        );
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].url().protocol(), "tri");
    }

    #[test]
    fn test_mock_invokers_selected_on_demand() {
        let consumer: Url = "tri://10.0.0.9:0/greet.Greeter".parse().unwrap();
        let invocation = RpcInvocation::default()
            .with_method_name("greet")
            .with_attachment(INVOCATION_NEED_MOCK, "true");
        let routed = MockInvokersSelector.route(candidates(), &consumer, &invocation);
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].url().protocol(), "mock");
    }
}
