//! Language generation collaborator producing the AI side of a live debate.
//!
//! The engine treats the collaborator as opaque: it supplies the AI message,
//! optional feedback on the user's argument and an optional 0 to 100 rating.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::session::{LiveMessage, Speaker};

/// Shared reference to a generator
pub type SharedGenerator = Arc<dyn AiTurnGenerator>;

/// Everything the collaborator needs to produce one AI turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub topic_id: String,
    pub topic_title: String,
    /// Stance the user argues, as text ("for"/"against").
    pub user_stance: String,
    pub opponent_persona: String,
    pub transcript: Vec<LiveMessage>,
    pub round: u32,
    pub max_rounds: u32,
}

impl GenerationRequest {
    /// Opening turn: nothing has been said yet.
    pub fn is_opening(&self) -> bool {
        !self.transcript.iter().any(|m| m.speaker == Speaker::User)
    }

    pub fn is_final_round(&self) -> bool {
        self.round >= self.max_rounds
    }
}

/// One AI reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiTurn {
    pub message: String,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
}

/// External generation service. May fail or hang; callers bound it with a
/// timeout.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AiTurnGenerator: Send + Sync {
    async fn generate_ai_turn(&self, request: &GenerationRequest) -> EngineResult<AiTurn>;
}

/// Endpoint settings for [`HttpAiTurnGenerator`].
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("DEBATE_LLM_URL")
                .unwrap_or_else(|_| "http://localhost:8080/v1".into()),
            model: std::env::var("DEBATE_LLM_MODEL").unwrap_or_else(|_| "debate-coach".into()),
            api_key: std::env::var("DEBATE_LLM_API_KEY").ok(),
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}

/// Generator backed by an OpenAI-compatible chat-completions endpoint.
pub struct HttpAiTurnGenerator {
    config: GeneratorConfig,
    client: reqwest::Client,
}

impl HttpAiTurnGenerator {
    pub fn new(config: GeneratorConfig, timeout: Duration) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn shared(self) -> SharedGenerator {
        Arc::new(self)
    }

    fn system_prompt(request: &GenerationRequest) -> String {
        format!(
            "You are {persona}, debating the topic \"{title}\". The student argues {stance}; \
             you argue the opposite side. This is round {round} of {max}.\n\
             Reply with a single JSON object: {{\"message\": string, \"feedback\": string, \
             \"score\": number}}. \"message\" is your counter-argument in at most 120 words. \
             \"feedback\" coaches the student on their latest argument. \"score\" rates that \
             argument from 0 to 100. For the opening turn, omit feedback and score.",
            persona = request.opponent_persona,
            title = request.topic_title,
            stance = request.user_stance,
            round = request.round,
            max = request.max_rounds,
        )
    }

    fn chat_messages(request: &GenerationRequest) -> Vec<serde_json::Value> {
        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": Self::system_prompt(request),
        })];
        for msg in &request.transcript {
            let role = match msg.speaker {
                Speaker::Ai => "assistant",
                Speaker::User => "user",
                Speaker::System => continue,
            };
            messages.push(serde_json::json!({ "role": role, "content": msg.content }));
        }
        if request.is_opening() {
            messages.push(serde_json::json!({
                "role": "user",
                "content": "Open the debate with your first argument.",
            }));
        }
        messages
    }
}

#[async_trait]
impl AiTurnGenerator for HttpAiTurnGenerator {
    async fn generate_ai_turn(&self, request: &GenerationRequest) -> EngineResult<AiTurn> {
        let start = Instant::now();
        let request_body = serde_json::json!({
            "model": self.config.model,
            "messages": Self::chat_messages(request),
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        });

        let mut builder = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.config.base_url.trim_end_matches('/')
            ))
            .json(&request_body);
        if let Some(key) = &self.config.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| EngineError::generation(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::generation(format!(
                "generation API error ({}): {}",
                status, body
            )));
        }

        let resp_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::generation(e.to_string()))?;

        let content = resp_json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("");

        let turn = parse_ai_turn(content)?;
        debug!(
            round = request.round,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "AI turn generated"
        );
        Ok(turn)
    }
}

/// Parse the model's reply, accepting bare JSON, fenced JSON, or plain text
/// (taken as the message with no feedback or score).
pub fn parse_ai_turn(content: &str) -> EngineResult<AiTurn> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(EngineError::generation("empty reply from generator"));
    }

    let candidate = extract_json_object(trimmed);
    if let Some(json) = candidate {
        if let Ok(turn) = serde_json::from_str::<AiTurn>(json) {
            if turn.message.trim().is_empty() {
                return Err(EngineError::generation("reply has an empty message"));
            }
            return Ok(turn);
        }
    }

    Ok(AiTurn {
        message: trimmed.to_string(),
        feedback: None,
        score: None,
    })
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
