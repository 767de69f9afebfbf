use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::text::estimate_tokens;

/// Chunk identifier assigned by the offline indexer.
pub type ChunkId = String;

/// Conversation identifier, stable per channel conversation.
pub type SessionId = String;

/// Inbound chat channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Web,
    /// Web widget rendered with an animated avatar.
    Avatar,
    WhatsApp,
    Telegram,
    Messenger,
}

impl Channel {
    /// Channels that render an avatar and consume gesture tags.
    pub fn is_avatar_facing(&self) -> bool {
        matches!(self, Channel::Avatar)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Web => "web",
            Channel::Avatar => "avatar",
            Channel::WhatsApp => "whatsapp",
            Channel::Telegram => "telegram",
            Channel::Messenger => "messenger",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the question reached us. Voice input arrives already transcribed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    #[default]
    Text,
    Voice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// A single message in a session's rolling history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Inbound request after boundary validation (size limits, transcription).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub session_id: SessionId,
    pub channel: Channel,
    /// Question text, or the transcript when `mode` is `Voice`.
    pub text: String,
    #[serde(default)]
    pub mode: InputMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl ChatRequest {
    /// Key used for per-user admission limits.
    pub fn user_key(&self) -> String {
        format!("{}:{}", self.channel, self.session_id)
    }
}

/// A corpus chunk as produced by the offline indexer. Immutable at request time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub chunk_id: ChunkId,
    pub text: String,
    #[serde(default)]
    pub dense_vector: Vec<f32>,
    /// Term → frequency within this chunk.
    #[serde(default)]
    pub sparse_terms: HashMap<String, u32>,
    pub source_doc: String,
    #[serde(default)]
    pub offset: u64,
    /// Last modification time of the source document; newer wins ties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_updated_at: Option<DateTime<Utc>>,
    /// Token count computed at index time. Zero means "estimate on demand".
    #[serde(default)]
    pub token_count: usize,
}

impl KnowledgeChunk {
    pub fn tokens(&self) -> usize {
        if self.token_count > 0 {
            self.token_count
        } else {
            estimate_tokens(&self.text)
        }
    }
}
