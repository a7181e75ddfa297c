use crate::config::OpenAiConfig;
use crate::error::ServiceError;
use crate::http::ensure_success;
use crate::models::{ChatCompletion, ChatMessage, TokenUsage};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

const BACKEND: &str = "openai-chat";

#[async_trait]
pub trait ChatService: Send + Sync {
    /// One completion for the full message list, with the usage the service reported.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<ChatCompletion, ServiceError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// `POST {base}/v1/chat/completions`, non-streaming.
pub struct OpenAiChat {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiChat {
    pub fn new(client: Client, config: &OpenAiConfig, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: config.chat_model.clone(),
        }
    }
}

#[async_trait]
impl ChatService for OpenAiChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<ChatCompletion, ServiceError> {
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages,
            })
            .send()
            .await
            .map_err(|error| ServiceError::from_transport(BACKEND, error))?;
        let response = ensure_success(BACKEND, response).await?;

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|error| ServiceError::from_transport(BACKEND, error))?;
        let answer = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ServiceError::BackendResponse {
                backend: BACKEND.to_string(),
                details: "completion has no message content".to_string(),
            })?;

        Ok(ChatCompletion {
            answer,
            usage: body.usage.unwrap_or_default(),
        })
    }
}

/// Wraps a chat service, logging each call's token usage and keeping a
/// running total. Completions pass through untouched.
pub struct UsageLedger<C> {
    inner: C,
    total: Mutex<TokenUsage>,
    calls: Mutex<u64>,
}

impl<C> UsageLedger<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            total: Mutex::new(TokenUsage::default()),
            calls: Mutex::new(0),
        }
    }

    pub fn total(&self) -> TokenUsage {
        self.total.lock().map(|total| *total).unwrap_or_default()
    }

    pub fn calls(&self) -> u64 {
        self.calls.lock().map(|calls| *calls).unwrap_or_default()
    }

    fn record(&self, usage: TokenUsage) {
        if let Ok(mut total) = self.total.lock() {
            total.add(usage);
        }
        if let Ok(mut calls) = self.calls.lock() {
            *calls += 1;
        }
        tracing::info!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            total_tokens = usage.total_tokens,
            session_total_tokens = self.total().total_tokens,
            "chat token usage"
        );
    }
}

#[async_trait]
impl<C: ChatService> ChatService for UsageLedger<C> {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<ChatCompletion, ServiceError> {
        let completion = self.inner.complete(messages).await?;
        self.record(completion.usage);
        Ok(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    struct ScriptedChat;

    #[async_trait]
    impl ChatService for ScriptedChat {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<ChatCompletion, ServiceError> {
            Ok(ChatCompletion {
                answer: format!("{} messages", messages.len()),
                usage: TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                },
            })
        }
    }

    fn config(base_url: String) -> OpenAiConfig {
        OpenAiConfig {
            base_url,
            api_key: Some("sk-test".to_string()),
            embedding_model: "text-embedding-3-large".to_string(),
            embedding_dimension: 3_072,
            chat_model: "gpt-4".to_string(),
        }
    }

    #[tokio::test]
    async fn ledger_accumulates_usage_without_changing_answer() -> Result<(), ServiceError> {
        let ledger = UsageLedger::new(ScriptedChat);

        let first = ledger.complete(&[ChatMessage::user("a")]).await?;
        ledger.complete(&[ChatMessage::user("b")]).await?;

        assert_eq!(first.answer, "1 messages");
        assert_eq!(ledger.calls(), 2);
        assert_eq!(ledger.total().total_tokens, 30);
        assert_eq!(ledger.total().prompt_tokens, 20);
        Ok(())
    }

    #[tokio::test]
    async fn openai_chat_returns_answer_and_usage() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer sk-test")
                    .body_contains("\"model\":\"gpt-4\"")
                    .body_contains("\"role\":\"system\"");
                then.status(200).json_body(json!({
                    "choices": [{"index": 0, "message": {"role": "assistant", "content": "Turn the TEMPO knob."}}],
                    "usage": {"prompt_tokens": 120, "completion_tokens": 8, "total_tokens": 128}
                }));
            })
            .await;

        let chat = OpenAiChat::new(Client::new(), &config(server.base_url()), "sk-test");
        let completion = chat
            .complete(&[ChatMessage::system("context"), ChatMessage::user("How do I change tempo?")])
            .await
            .expect("completion");

        mock.assert_async().await;
        assert_eq!(completion.answer, "Turn the TEMPO knob.");
        assert_eq!(completion.usage.total_tokens, 128);
    }

    #[tokio::test]
    async fn empty_choices_are_a_backend_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(json!({"choices": []}));
            })
            .await;

        let chat = OpenAiChat::new(Client::new(), &config(server.base_url()), "sk-test");
        let error = chat.complete(&[ChatMessage::user("hi")]).await.expect_err("no choices");

        assert!(matches!(error, ServiceError::BackendResponse { .. }));
    }
}
