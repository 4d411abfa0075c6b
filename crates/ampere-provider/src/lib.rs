// The provider boundary: one prompt in, one response out. No streaming and
// no structured tools; structured output is obtained by prompting for JSON
// and parsing at the call site.

use std::collections::VecDeque;
use std::future::Future;

use async_trait::async_trait;
use tokio::sync::Mutex;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Always returns the same reply. Test double.
pub struct StaticProvider {
    reply: String,
}

impl StaticProvider {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for StaticProvider {
    async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
        Ok(self.reply.clone())
    }
}

/// Replays a queue of canned replies in order, then errors. Test double for
/// multi-call flows.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedProvider {
    pub fn new<I>(replies: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
        self.replies
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("scripted provider exhausted"))
    }
}

/// Adapts an async closure into a provider.
pub struct FnProvider<F> {
    f: F,
}

impl<F, Fut> FnProvider<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<String>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> LlmProvider for FnProvider<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<String>> + Send,
{
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        (self.f)(prompt.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_provider_repeats_reply() {
        let provider = StaticProvider::new("ok");
        assert_eq!(provider.complete("a").await.unwrap(), "ok");
        assert_eq!(provider.complete("b").await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn scripted_provider_drains_then_errors() {
        let provider = ScriptedProvider::new(["one", "two"]);
        assert_eq!(provider.complete("x").await.unwrap(), "one");
        assert_eq!(provider.complete("x").await.unwrap(), "two");
        assert!(provider.complete("x").await.is_err());
    }

    #[tokio::test]
    async fn fn_provider_sees_the_prompt() {
        let provider = FnProvider::new(|prompt: String| async move {
            Ok(format!("echo: {prompt}"))
        });
        assert_eq!(provider.complete("hi").await.unwrap(), "echo: hi");
    }
}
