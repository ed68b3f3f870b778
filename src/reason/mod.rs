//! External reasoning collaborator interface
//!
//! The triage engine talks to a single request/response completion call:
//! role-tagged text messages in, text out. Transport, model routing and
//! capability negotiation happen outside this crate; availability arrives
//! once at startup as `EngineCapabilities`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// One completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// Opaque model-selection hints, passed through verbatim.
    pub model_hints: Vec<String>,
    /// Token budget for the response.
    pub max_tokens: u32,
}

/// The reasoning call. Implementations may fail or hang; the engine guards
/// every call and degrades to plain notification on error.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

/// Capabilities negotiated with the calling agent at startup.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EngineCapabilities {
    /// Whether the agent supports the reasoning (sampling) call at all.
    pub sampling: bool,
}

/// Outward resource-update notifications. The engine pushes two logical URIs
/// per affected account after each flush; delivery failures are swallowed.
#[async_trait]
pub trait ResourceSink: Send + Sync {
    async fn resource_updated(&self, uri: &str) -> Result<()>;
}
