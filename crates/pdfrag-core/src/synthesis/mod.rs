use crate::config::SynthesizerConfig;
use crate::error::{CoreError, CoreResult};
use crate::util::backoff::{classify_http_status, retry_transient, BackoffPolicy};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisOutput {
    pub answer: String,
    pub model: String,
    pub usage: Usage,
}

/// Grounded answer generation boundary: (system prompt, context, question)
/// -> answer text + token accounting.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(
        &self,
        system_prompt: &str,
        context: &str,
        question: &str,
        model_override: Option<String>,
    ) -> CoreResult<SynthesisOutput>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: usize,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

/// OpenAI-style `/v1/chat/completions` client, non-streaming.
pub struct HttpSynthesizer {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: usize,
    backoff: BackoffPolicy,
}

impl HttpSynthesizer {
    pub fn new(config: &SynthesizerConfig) -> CoreResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| CoreError::Config(format!("synthesizer client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            backoff: BackoffPolicy::default(),
        })
    }

    async fn request_completion(
        &self,
        system_prompt: &str,
        context: &str,
        question: &str,
        model: &str,
    ) -> CoreResult<SynthesisOutput> {
        let system = format!("{}\n\n{}", system_prompt, context);
        let request = ChatCompletionRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: question,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        };

        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| CoreError::TransientUpstream(format!("chat request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_status(status, &body));
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| CoreError::TransientUpstream(format!("chat response: {}", e)))?;

        let answer = body
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| {
                CoreError::TransientUpstream("chat response contained no message".to_string())
            })?;

        debug!("Synthesized {} chars with model {}", answer.len(), body.model);

        Ok(SynthesisOutput {
            answer,
            model: body.model,
            usage: body.usage.unwrap_or_default(),
        })
    }
}

#[async_trait::async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(
        &self,
        system_prompt: &str,
        context: &str,
        question: &str,
        model_override: Option<String>,
    ) -> CoreResult<SynthesisOutput> {
        let model = model_override.unwrap_or_else(|| self.model.clone());
        retry_transient(&self.backoff, "synthesize", || {
            self.request_completion(system_prompt, context, question, &model)
        })
        .await
    }
}
