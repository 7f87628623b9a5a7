use crate::error::LlmError;

/// A chat-completion backend capable of answering one system + user exchange.
pub trait ChatProvider: Send + Sync {
    /// Send the prompt pair and return the assistant response body.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails to communicate, signals a rate
    /// limit, times out, or produces an empty response.
    fn complete(
        &self,
        system: &str,
        user: &str,
    ) -> impl Future<Output = Result<String, LlmError>> + Send;

    fn name(&self) -> &str;
}
