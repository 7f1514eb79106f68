//! Generation backend client
//!
//! A trait over chat-completion backends plus the production HTTP
//! implementation against an OpenAI-compatible `/v1/chat/completions`
//! endpoint. Streaming responses are consumed as SSE frames and returned
//! to the caller as one finalized string.

use crate::config::GenerationConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// One conversation message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Sampling parameters for one generation call
#[derive(Debug, Clone, Copy)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 600,
            temperature: 0.2,
            top_p: 0.9,
        }
    }
}

/// Trait for generation providers
#[async_trait]
pub trait Generator: Send + Sync {
    /// One-shot completion returning the whole assistant text
    async fn complete(&self, messages: &[ChatMessage], params: GenerationParams)
        -> Result<String>;

    /// Streaming completion; the token stream is accumulated and joined
    async fn stream(&self, messages: &[ChatMessage], params: GenerationParams) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// Outcome of one SSE line
enum SseLine {
    Delta(String),
    Done,
    Skip,
}

/// Parse one SSE line: `data: [DONE]`, a `data: {json}` delta, or noise
/// (blank keep-alives and `event:` pings) which is skipped.
fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim();
    if line.is_empty() || !line.starts_with("data:") {
        return SseLine::Skip;
    }
    let payload = line["data:".len()..].trim();
    if payload == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<StreamResponse>(payload) {
        Ok(parsed) => {
            if let Some(choice) = parsed.choices.into_iter().next() {
                if let Some(content) = choice.delta.content {
                    return SseLine::Delta(content);
                }
            }
            SseLine::Skip
        }
        Err(_) => SseLine::Skip,
    }
}

/// HTTP generator against an OpenAI-compatible backend
pub struct HttpGenerator {
    client: Client,
    base_url: Url,
    model: String,
    timeout: Duration,
}

impl HttpGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let base_url = Url::parse(&config.url)?;
        let timeout = Duration::from_secs(config.timeout_secs);
        // The overall deadline is enforced per request; the client itself
        // only bounds the connect phase so streams are not cut mid-read.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url,
            model: config.model.clone(),
            timeout,
        })
    }

    fn endpoint(&self) -> Result<Url> {
        self.base_url
            .join("/v1/chat/completions")
            .map_err(|e| Error::Config(format!("Invalid generation backend URL: {}", e)))
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        params: GenerationParams,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
            stream,
        };

        let response = self
            .client
            .post(self.endpoint()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Generation {
                status: 0,
                body: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Generation { status, body });
        }
        Ok(response)
    }

    async fn complete_inner(
        &self,
        messages: &[ChatMessage],
        params: GenerationParams,
    ) -> Result<String> {
        let response = self.send(messages, params, false).await?;
        let parsed: ChatResponse = response.json().await.map_err(|e| Error::Generation {
            status: 0,
            body: format!("unparsable response: {}", e),
        })?;
        let answer = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        Ok(answer)
    }

    async fn stream_inner(
        &self,
        messages: &[ChatMessage],
        params: GenerationParams,
    ) -> Result<String> {
        let response = self.send(messages, params, true).await?;

        let mut answer = String::new();
        let mut buffer = String::new();
        let mut bytes = Box::pin(response.bytes_stream());

        'outer: while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| Error::Generation {
                status: 0,
                body: format!("stream interrupted: {}", e),
            })?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = buffer.find('\n') {
                let line: String = buffer.drain(..=line_end).collect();
                match parse_sse_line(&line) {
                    SseLine::Delta(content) => answer.push_str(&content),
                    SseLine::Done => break 'outer,
                    SseLine::Skip => {}
                }
            }
        }

        Ok(answer)
    }

    async fn with_deadline<F, T>(&self, tag: &str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Generation {
                status: 0,
                body: format!("{} timed out after {:?}", tag, self.timeout),
            }),
        }
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: GenerationParams,
    ) -> Result<String> {
        self.with_deadline("completion", self.complete_inner(messages, params))
            .await
    }

    async fn stream(&self, messages: &[ChatMessage], params: GenerationParams) -> Result<String> {
        self.with_deadline("stream", self.stream_inner(messages, params))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sse_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"안녕"}}]}"#;
        match parse_sse_line(line) {
            SseLine::Delta(s) => assert_eq!(s, "안녕"),
            _ => panic!("expected delta"),
        }
    }

    #[test]
    fn test_parse_sse_done() {
        assert!(matches!(parse_sse_line("data: [DONE]"), SseLine::Done));
        assert!(matches!(parse_sse_line("data:[DONE]"), SseLine::Done));
    }

    #[test]
    fn test_parse_sse_skips_noise() {
        assert!(matches!(parse_sse_line(""), SseLine::Skip));
        assert!(matches!(parse_sse_line("event: ping"), SseLine::Skip));
        assert!(matches!(parse_sse_line("data: not-json"), SseLine::Skip));
        assert!(matches!(
            parse_sse_line(r#"data: {"choices":[{"delta":{}}]}"#),
            SseLine::Skip
        ));
    }

    #[test]
    fn test_chat_message_constructors() {
        let msg = ChatMessage::system("policy");
        assert_eq!(msg.role, "system");
        assert_eq!(ChatMessage::user("q").role, "user");
        assert_eq!(ChatMessage::assistant("a").role, "assistant");
    }

    #[test]
    fn test_default_params() {
        let p = GenerationParams::default();
        assert_eq!(p.max_tokens, 600);
        assert!((p.temperature - 0.2).abs() < f32::EPSILON);
        assert!((p.top_p - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"ok"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("ok")
        );
    }
}
