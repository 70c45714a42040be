//! NLQ Client for LLM interactions

use crate::config::{LLMProvider, LlmConfig};
use crate::nlq::{NLQError, NLQResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a graph query expert. Answer only with the JSON object you are asked for.";

/// Text completion backend used by the reasoning and synthesis stages
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> NLQResult<String>;
}

pub struct NLQClient {
    client: Client,
    config: LlmConfig,
    api_base_url: String,
}

impl NLQClient {
    pub fn new(config: &LlmConfig) -> NLQResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| NLQError::ConfigError(e.to_string()))?;

        let api_base_url = config.api_base_url.clone().unwrap_or_else(|| {
            match config.provider {
                LLMProvider::OpenAI => "https://api.openai.com/v1".to_string(),
                LLMProvider::Ollama => "http://localhost:11434".to_string(),
                LLMProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta".to_string(),
                LLMProvider::Anthropic => "https://api.anthropic.com/v1".to_string(),
                LLMProvider::Mock => String::new(),
            }
        });

        Ok(Self {
            client,
            config: config.clone(),
            api_base_url,
        })
    }

    pub fn provider(&self) -> LLMProvider {
        self.config.provider
    }

    fn system_prompt(&self) -> String {
        self.config
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
    }

    async fn openai_chat(&self, prompt: &str) -> NLQResult<String> {
        #[derive(Serialize)]
        struct Message {
            role: String,
            content: String,
        }

        #[derive(Serialize)]
        struct Request<'a> {
            model: &'a str,
            messages: Vec<Message>,
            temperature: f32,
        }

        #[derive(Deserialize)]
        struct Response {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: MessageContent,
        }

        #[derive(Deserialize)]
        struct MessageContent {
            content: String,
        }

        let api_key = self.config.api_key.as_ref().ok_or_else(|| NLQError::ConfigError("OpenAI requires API key".to_string()))?;

        let url = format!("{}/chat/completions", self.api_base_url);
        let resp = self.client.post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&Request {
                model: &self.config.model,
                messages: vec![
                    Message { role: "system".to_string(), content: self.system_prompt() },
                    Message { role: "user".to_string(), content: prompt.to_string() },
                ],
                temperature: 0.0,
            })
            .send()
            .await
            .map_err(|e| NLQError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(NLQError::ApiError(format!("OpenAI error: {}", resp.status())));
        }

        let result: Response = resp.json().await.map_err(|e| NLQError::SerializationError(e.to_string()))?;
        Ok(result.choices.first().map(|c| c.message.content.clone()).unwrap_or_default())
    }

    async fn ollama_chat(&self, prompt: &str) -> NLQResult<String> {
        #[derive(Serialize)]
        struct Request<'a> {
            model: &'a str,
            prompt: String,
            system: String,
            stream: bool,
            format: &'a str,
        }

        #[derive(Deserialize)]
        struct Response {
            response: String,
        }

        let url = format!("{}/api/generate", self.api_base_url);
        let resp = self.client.post(&url)
            .json(&Request {
                model: &self.config.model,
                prompt: prompt.to_string(),
                system: self.system_prompt(),
                stream: false,
                format: "json",
            })
            .send()
            .await
            .map_err(|e| NLQError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(NLQError::ApiError(format!("Ollama error: {}", resp.status())));
        }

        let result: Response = resp.json().await.map_err(|e| NLQError::SerializationError(e.to_string()))?;
        Ok(result.response)
    }

    async fn gemini_chat(&self, prompt: &str) -> NLQResult<String> {
        #[derive(Serialize)]
        struct Request {
            contents: Vec<Content>,
            #[serde(rename = "generationConfig")]
            generation_config: GenerationConfig,
        }

        #[derive(Serialize, Deserialize)]
        struct Content {
            role: Option<String>,
            parts: Vec<Part>,
        }

        #[derive(Serialize, Deserialize)]
        struct Part {
            text: String,
        }

        #[derive(Serialize)]
        struct GenerationConfig {
            temperature: f32,
        }

        #[derive(Deserialize)]
        struct Response {
            candidates: Option<Vec<Candidate>>,
        }

        #[derive(Deserialize)]
        struct Candidate {
            content: Content,
        }

        let api_key = self.config.api_key.as_ref().ok_or_else(|| NLQError::ConfigError("Gemini requires API key".to_string()))?;

        // v1beta has no system role on every endpoint; prepend the instruction
        let full_prompt = format!("{}\n\n{}", self.system_prompt(), prompt);

        let url = format!("{}/models/{}:generateContent?key={}", self.api_base_url, self.config.model, api_key);

        let resp = self.client.post(&url)
            .json(&Request {
                contents: vec![
                    Content {
                        role: Some("user".to_string()),
                        parts: vec![Part { text: full_prompt }],
                    }
                ],
                generation_config: GenerationConfig { temperature: 0.0 },
            })
            .send()
            .await
            .map_err(|e| NLQError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(NLQError::ApiError(format!("Gemini error: {}", text)));
        }

        let result: Response = resp.json().await.map_err(|e| NLQError::SerializationError(e.to_string()))?;

        Ok(result
            .candidates
            .as_ref()
            .and_then(|c| c.first())
            .and_then(|first| first.content.parts.first())
            .map(|part| part.text.clone())
            .unwrap_or_default())
    }

    async fn anthropic_chat(&self, prompt: &str) -> NLQResult<String> {
        #[derive(Serialize)]
        struct Message<'a> {
            role: &'a str,
            content: &'a str,
        }

        #[derive(Serialize)]
        struct Request<'a> {
            model: &'a str,
            max_tokens: u32,
            system: String,
            messages: Vec<Message<'a>>,
            temperature: f32,
        }

        #[derive(Deserialize)]
        struct Response {
            content: Vec<Block>,
        }

        #[derive(Deserialize)]
        struct Block {
            #[serde(default)]
            text: Option<String>,
        }

        let api_key = self.config.api_key.as_ref().ok_or_else(|| NLQError::ConfigError("Anthropic requires API key".to_string()))?;

        let url = format!("{}/messages", self.api_base_url);
        let resp = self.client.post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&Request {
                model: &self.config.model,
                max_tokens: 2048,
                system: self.system_prompt(),
                messages: vec![Message { role: "user", content: prompt }],
                temperature: 0.0,
            })
            .send()
            .await
            .map_err(|e| NLQError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(NLQError::ApiError(format!("Anthropic error: {}", resp.status())));
        }

        let result: Response = resp.json().await.map_err(|e| NLQError::SerializationError(e.to_string()))?;
        Ok(result
            .content
            .into_iter()
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join(""))
    }
}

#[async_trait]
impl LanguageModel for NLQClient {
    async fn complete(&self, prompt: &str) -> NLQResult<String> {
        match self.config.provider {
            LLMProvider::OpenAI => self.openai_chat(prompt).await,
            LLMProvider::Ollama => self.ollama_chat(prompt).await,
            LLMProvider::Gemini => self.gemini_chat(prompt).await,
            LLMProvider::Anthropic => self.anthropic_chat(prompt).await,
            LLMProvider::Mock => Ok(String::new()),
        }
    }
}

/// Replays canned completions in order and records every prompt.
///
/// Once the script is exhausted each call fails with an API error, which
/// the stages treat like any other unusable completion.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Sleep before answering, to exercise stage timeouts
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Prompts received so far, oldest first
    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str) -> NLQResult<String> {
        self.prompts.lock().await.push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| NLQError::ApiError("script exhausted".to_string()))
    }
}
