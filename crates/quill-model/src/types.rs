//! Core transcript types

use serde::{Deserialize, Serialize};

/// Message roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl Role {
    /// Get the role as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tool output as produced by a tool, before normalization.
///
/// Strings are stored verbatim; anything else is JSON-encoded when the
/// result is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Raw(String),
    Json(serde_json::Value),
}

impl ToolOutput {
    /// Normalize into the persisted `{type: "json", value}` wrapper
    pub fn normalize(self) -> ToolResultOutput {
        let value = match self {
            ToolOutput::Raw(text) => text,
            ToolOutput::Json(serde_json::Value::String(text)) => text,
            ToolOutput::Json(value) => value.to_string(),
        };
        ToolResultOutput::Json { value }
    }
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        Self::Raw(text)
    }
}

impl From<&str> for ToolOutput {
    fn from(text: &str) -> Self {
        Self::Raw(text.to_string())
    }
}

impl From<serde_json::Value> for ToolOutput {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// Normalized tool result payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolResultOutput {
    Json { value: String },
}

impl ToolResultOutput {
    /// The serialized payload
    pub fn value(&self) -> &str {
        match self {
            ToolResultOutput::Json { value } => value,
        }
    }
}

/// Content parts of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text content
    Text { text: String },
    /// Reasoning content
    Reasoning { text: String },
    /// Tool call request
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        input: serde_json::Value,
    },
    /// Tool call result
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        output: ToolResultOutput,
    },
}

impl ContentPart {
    /// Create text content
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create reasoning content
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::Reasoning { text: text.into() }
    }

    /// Create a tool call
    pub fn tool_call(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::ToolCall {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            input,
        }
    }

    /// Create a tool result, normalizing the output
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: impl Into<ToolOutput>,
    ) -> Self {
        Self::ToolResult {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            output: output.into().normalize(),
        }
    }

    /// Get text if this is text content
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Tool call id carried by tool calls and tool results
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Self::ToolCall { tool_call_id, .. } | Self::ToolResult { tool_call_id, .. } => {
                Some(tool_call_id)
            }
            _ => None,
        }
    }

    /// Check if this is a tool call
    pub fn is_tool_call(&self) -> bool {
        matches!(self, Self::ToolCall { .. })
    }
}

/// A single transcript message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

impl Message {
    /// Create a message with the given role and content
    pub fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Self { role, content }
    }

    /// Create a user message with text content
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentPart::text(text)])
    }

    /// Create an assistant message
    pub fn assistant(content: Vec<ContentPart>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a tool message
    pub fn tool(content: Vec<ContentPart>) -> Self {
        Self::new(Role::Tool, content)
    }

    /// Tool call ids referenced by this message, in content order
    pub fn tool_call_ids(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(ContentPart::tool_call_id)
            .collect()
    }

    /// Get combined text content
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.as_text())
            .collect::<Vec<_>>()
            .join("")
    }
}

/// A persisted response message, identified by `id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEntry {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: Vec<ContentPart>,
    #[serde(default)]
    pub created_at: i64,
}

impl ResponseEntry {
    /// Create an entry for `message` under `id`
    pub fn from_message(id: impl Into<String>, message: &Message) -> Self {
        Self {
            id: id.into(),
            role: message.role,
            content: message.content.clone(),
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// A persisted reasoning fragment, identified by `id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningEntry {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub created_at: i64,
}

impl ReasoningEntry {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// The three persisted channels of a conversation message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageEntries {
    pub response_messages: Vec<ResponseEntry>,
    pub reasoning_messages: Vec<ReasoningEntry>,
    pub raw_llm_messages: Vec<Message>,
}

impl MessageEntries {
    /// Derive all channels from the messages of one turn.
    ///
    /// Entry ids are derived from `turn_id` and the message position within
    /// the turn (`{turn_id}:{n}`, reasoning parts `{turn_id}:{n}:{k}`), so
    /// persisting the same turn again replaces its entries instead of
    /// appending copies.
    pub fn from_turn(turn_id: &str, messages: &[Message]) -> Self {
        let mut entries = Self::default();
        for (n, message) in messages.iter().enumerate() {
            entries
                .response_messages
                .push(ResponseEntry::from_message(format!("{turn_id}:{n}"), message));
            let reasoning = message.content.iter().filter_map(|part| match part {
                ContentPart::Reasoning { text } => Some(text),
                _ => None,
            });
            for (k, text) in reasoning.enumerate() {
                entries
                    .reasoning_messages
                    .push(ReasoningEntry::new(format!("{turn_id}:{n}:{k}"), text.as_str()));
            }
            entries.raw_llm_messages.push(message.clone());
        }
        entries
    }

    /// Number of response entries that belong to `turn_id`
    pub fn turn_len(&self, turn_id: &str) -> usize {
        let prefix = format!("{turn_id}:");
        self.response_messages
            .iter()
            .filter(|entry| entry.id.starts_with(&prefix))
            .count()
    }

    /// Check if the response channel ends with the entries of `turn_id`
    pub fn ends_with_turn(&self, turn_id: &str) -> bool {
        let prefix = format!("{turn_id}:");
        let trailing = self
            .response_messages
            .iter()
            .rev()
            .take_while(|entry| entry.id.starts_with(&prefix))
            .count();
        trailing == self.turn_len(turn_id)
    }

    /// Check if every channel is empty
    pub fn is_empty(&self) -> bool {
        self.response_messages.is_empty()
            && self.reasoning_messages.is_empty()
            && self.raw_llm_messages.is_empty()
    }

    /// Apply a partial update, replacing only the channels it carries
    pub fn apply(&mut self, update: EntriesUpdate) {
        if let Some(response_messages) = update.response_messages {
            self.response_messages = response_messages;
        }
        if let Some(reasoning_messages) = update.reasoning_messages {
            self.reasoning_messages = reasoning_messages;
        }
        if let Some(raw_llm_messages) = update.raw_llm_messages {
            self.raw_llm_messages = raw_llm_messages;
        }
    }
}

/// A partial [`MessageEntries`]; `None` channels are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntriesUpdate {
    pub response_messages: Option<Vec<ResponseEntry>>,
    pub reasoning_messages: Option<Vec<ReasoningEntry>>,
    pub raw_llm_messages: Option<Vec<Message>>,
}

impl EntriesUpdate {
    /// Update only the response channel
    pub fn response_messages(entries: Vec<ResponseEntry>) -> Self {
        Self {
            response_messages: Some(entries),
            ..Default::default()
        }
    }

    /// Update only the reasoning channel
    pub fn reasoning_messages(entries: Vec<ReasoningEntry>) -> Self {
        Self {
            reasoning_messages: Some(entries),
            ..Default::default()
        }
    }

    /// Update only the raw LLM channel
    pub fn raw_llm_messages(messages: Vec<Message>) -> Self {
        Self {
            raw_llm_messages: Some(messages),
            ..Default::default()
        }
    }
}

impl From<MessageEntries> for EntriesUpdate {
    fn from(entries: MessageEntries) -> Self {
        Self {
            response_messages: Some(entries.response_messages),
            reasoning_messages: Some(entries.reasoning_messages),
            raw_llm_messages: Some(entries.raw_llm_messages),
        }
    }
}
