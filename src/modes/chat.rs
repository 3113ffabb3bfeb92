//! Text chat grounded with Google Search.

use crate::config::YukiConfig;
use crate::error::Result;
use crate::modes::client::{
    GenerateContentRequest, GenerationConfig, GenerativeClient, Part, ThinkingConfig, Tool,
};
use tracing::info;

/// Reply used when the model returns no text.
pub const EMPTY_REPLY: &str = "I'm sorry, I couldn't process that.";

/// A cited web source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroundingLink {
    pub title: String,
    pub uri: String,
}

/// One assistant answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub text: String,
    /// Sources the answer was grounded on, in the order returned.
    pub grounding: Vec<GroundingLink>,
    /// Whether the extended thinking budget was used.
    pub thinking: bool,
}

/// Sends single prompts to the chat model.
#[derive(Debug, Clone)]
pub struct ChatMode {
    client: GenerativeClient,
    model: String,
    instruction: String,
    thinking_budget: u32,
}

impl ChatMode {
    pub fn new(client: GenerativeClient, config: &YukiConfig) -> Self {
        Self {
            client,
            model: config.backend.chat_model.clone(),
            instruction: config.persona.chat_instruction.clone(),
            thinking_budget: config.backend.thinking_budget,
        }
    }

    /// Ask `prompt`, optionally with the extended thinking budget.
    ///
    /// # Errors
    ///
    /// Returns the backend or credential error of the request.
    pub async fn send(&self, prompt: &str, thinking: bool) -> Result<ChatReply> {
        let mut request = GenerateContentRequest::user(vec![Part::text(prompt)])
            .with_system_instruction(&self.instruction);
        request.tools = vec![Tool::google_search()];
        if thinking {
            request.generation_config = Some(GenerationConfig {
                thinking_config: Some(ThinkingConfig {
                    thinking_budget: self.thinking_budget,
                }),
                ..GenerationConfig::default()
            });
        }

        let response = self.client.generate_content(&self.model, &request).await?;

        let grounding: Vec<GroundingLink> = response
            .grounding_chunks()
            .iter()
            .map(|chunk| {
                let web = chunk.web.as_ref();
                GroundingLink {
                    title: web
                        .and_then(|w| w.title.clone())
                        .filter(|t| !t.is_empty())
                        .unwrap_or_else(|| "Source".to_owned()),
                    uri: web
                        .and_then(|w| w.uri.clone())
                        .filter(|u| !u.is_empty())
                        .unwrap_or_else(|| "#".to_owned()),
                }
            })
            .collect();
        info!(sources = grounding.len(), thinking, "chat reply received");

        Ok(ChatReply {
            text: response.text().unwrap_or_else(|| EMPTY_REPLY.to_owned()),
            grounding,
            thinking,
        })
    }
}
