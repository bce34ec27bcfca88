use crate::cli::Args;
use crate::config::prompt::{ load_prompts, PromptConfig };
use crate::llm::{ parse_llm_type, LlmConfig };
use crate::llm::chat::{ new_client as new_chat_client, ChatClient, LlmError, PromptMessage };
use crate::models::chat::{ ChatMessage, ChatRole };

use log::info;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("message must not be empty")]
    EmptyMessage,

    #[error("model invocation failed: {0}")]
    ModelInvocation(#[source] LlmError),

    #[error("model call timed out after {0} seconds")]
    ModelTimeout(u64),
}

/// Conversation turn executor. Stateless across requests: every turn carries
/// its own history and results in exactly one provider call.
pub struct ConsultantAgent {
    chat_client: Arc<dyn ChatClient>,
    prompts: Arc<PromptConfig>,
    model_timeout: Duration,
}

impl ConsultantAgent {
    pub fn new(args: &Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let chat_llm_type = parse_llm_type(&args.chat_llm_type)?;
        let chat_api_key = if !args.chat_api_key.is_empty() {
            Some(args.chat_api_key.clone())
        } else {
            None
        };
        let chat_config = LlmConfig {
            llm_type: chat_llm_type,
            base_url: args.chat_base_url.clone(),
            api_key: chat_api_key,
            completion_model: args.chat_model.clone(),
            temperature: Some(args.chat_temperature),
            max_tokens: args.chat_max_tokens,
        };
        let chat_client = new_chat_client(&chat_config)?;
        info!(
            "Chat client configured: Type={}, Model={}, BaseURL={:?}",
            args.chat_llm_type,
            chat_client.model(),
            chat_config.base_url.as_deref().unwrap_or("adapter default")
        );

        let prompts = match &args.prompts_path {
            Some(path) => load_prompts(path)?,
            None => Arc::new(PromptConfig::default()),
        };

        Ok(Self::with_client(
            chat_client,
            prompts,
            Duration::from_secs(args.model_timeout_secs),
        ))
    }

    /// Construction seam for substituting the provider with a test double.
    pub fn with_client(
        chat_client: Arc<dyn ChatClient>,
        prompts: Arc<PromptConfig>,
        model_timeout: Duration
    ) -> Self {
        Self { chat_client, prompts, model_timeout }
    }

    /// For history length N the provider receives exactly N + 2 messages:
    /// framing, then the history in order, then the new user turn.
    fn build_turn_input(&self, history: &[ChatMessage], new_message: &str) -> Vec<PromptMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(PromptMessage::system(self.prompts.consultant_system.clone()));
        for msg in history {
            match msg.role {
                ChatRole::User => messages.push(PromptMessage::user(msg.content.clone())),
                ChatRole::Assistant => messages.push(PromptMessage::assistant(msg.content.clone())),
            }
        }
        messages.push(PromptMessage::user(new_message));
        messages
    }

    /// One turn: build the framed sequence, call the model once, return its
    /// reply verbatim. No retries.
    pub async fn run_turn(
        &self,
        history: &[ChatMessage],
        new_message: &str
    ) -> Result<String, AgentError> {
        if new_message.trim().is_empty() {
            return Err(AgentError::EmptyMessage);
        }

        let input = self.build_turn_input(history, new_message);
        let completion = timeout(self.model_timeout, self.chat_client.complete(&input))
            .await
            .map_err(|_| AgentError::ModelTimeout(self.model_timeout.as_secs()))?
            .map_err(AgentError::ModelInvocation)?;

        Ok(completion.response)
    }
}
