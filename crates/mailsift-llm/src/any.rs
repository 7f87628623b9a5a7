use crate::compatible::CompatibleProvider;
use crate::error::LlmError;
#[cfg(any(test, feature = "mock"))]
use crate::mock::MockProvider;
use crate::provider::ChatProvider;

/// Generates a match over all `AnyProvider` variants, binding the inner
/// provider and evaluating the given closure for each arm.
macro_rules! delegate_provider {
    ($self:expr, |$p:ident| $expr:expr) => {
        match $self {
            AnyProvider::Compatible($p) => $expr,
            #[cfg(any(test, feature = "mock"))]
            AnyProvider::Mock($p) => $expr,
        }
    };
}

#[derive(Debug, Clone)]
pub enum AnyProvider {
    Compatible(CompatibleProvider),
    #[cfg(any(test, feature = "mock"))]
    Mock(MockProvider),
}

impl ChatProvider for AnyProvider {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        delegate_provider!(self, |p| p.complete(system, user).await)
    }

    fn name(&self) -> &str {
        delegate_provider!(self, |p| p.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delegates_name_to_inner_provider() {
        let p = AnyProvider::Mock(MockProvider::default().named("inner"));
        assert_eq!(p.name(), "inner");
    }

    #[tokio::test]
    async fn delegates_complete_to_inner_provider() {
        let p = AnyProvider::Mock(MockProvider::default());
        assert_eq!(p.complete("s", "u").await.unwrap(), r#"{"contacts": []}"#);
    }
}
