//! Test-only mock chat provider.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::LlmError;
use crate::provider::ChatProvider;

/// Scripted reply for one mock call.
#[derive(Clone, Debug)]
pub enum MockReply {
    Text(String),
    RateLimited,
    Timeout,
    Failure,
}

#[derive(Debug, Clone)]
pub struct MockProvider {
    replies: Arc<Mutex<Vec<MockReply>>>,
    calls: Arc<AtomicUsize>,
    pub default_response: String,
    pub fail_all: bool,
    name: String,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            replies: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicUsize::new(0)),
            default_response: r#"{"contacts": []}"#.into(),
            fail_all: false,
            name: "mock".into(),
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_replies(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies)),
            ..Self::default()
        }
    }

    /// A provider that fails every call.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ChatProvider for MockProvider {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all {
            return Err(LlmError::Other("mock failure".into()));
        }
        let reply = {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                None
            } else {
                Some(replies.remove(0))
            }
        };
        match reply {
            None => Ok(self.default_response.clone()),
            Some(MockReply::Text(text)) => Ok(text),
            Some(MockReply::RateLimited) => Err(LlmError::RateLimited),
            Some(MockReply::Timeout) => Err(LlmError::Timeout),
            Some(MockReply::Failure) => Err(LlmError::Other("mock failure".into())),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
