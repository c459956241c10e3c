//! Streaming event types and delta buffering

use serde::{Deserialize, Serialize};

/// Events emitted by the model runtime while a turn streams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Reasoning content started
    ReasoningStart,
    /// Reasoning content delta
    ReasoningDelta { delta: String },
    /// Reasoning content completed
    ReasoningEnd,
    /// Text content started
    TextStart,
    /// Text content delta
    TextDelta { delta: String },
    /// Text content completed
    TextEnd,
    /// Complete tool call
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    /// Tool produced a result
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        output: serde_json::Value,
    },
    /// A reasoning/response step finished; the next content opens new messages
    StepFinish,
    /// Error reported by the runtime
    Error { message: String },
}

impl StreamEvent {
    /// Check if this is an error event
    pub fn is_error(&self) -> bool {
        matches!(self, StreamEvent::Error { .. })
    }
}

/// A complete unit of content ready to be folded into a transcript
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Reasoning(String),
    Text(String),
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        output: crate::ToolOutput,
    },
    StepBoundary,
}

#[derive(Debug)]
enum OpenBuffer {
    Reasoning(String),
    Text(String),
}

impl OpenBuffer {
    fn into_fragment(self) -> Option<Fragment> {
        match self {
            OpenBuffer::Reasoning(text) if !text.is_empty() => Some(Fragment::Reasoning(text)),
            OpenBuffer::Text(text) if !text.is_empty() => Some(Fragment::Text(text)),
            _ => None,
        }
    }
}

/// Turns delta events into complete fragments.
///
/// At most one text or reasoning buffer is open at a time. Anything that
/// would reorder content (a different buffer kind, a tool event, a step
/// boundary) flushes the open buffer first.
#[derive(Debug, Default)]
pub struct TurnBuilder {
    open: Option<OpenBuffer>,
}

impl TurnBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a streaming event, returning the fragments it completes.
    ///
    /// Error events produce nothing; callers decide how to surface them.
    pub fn process_event(&mut self, event: &StreamEvent) -> Vec<Fragment> {
        let mut out = Vec::new();
        match event {
            StreamEvent::ReasoningStart => {
                self.flush_into(&mut out);
                self.open = Some(OpenBuffer::Reasoning(String::new()));
            }
            StreamEvent::ReasoningDelta { delta } => match &mut self.open {
                Some(OpenBuffer::Reasoning(text)) => text.push_str(delta),
                _ => {
                    self.flush_into(&mut out);
                    self.open = Some(OpenBuffer::Reasoning(delta.clone()));
                }
            },
            StreamEvent::TextStart => {
                self.flush_into(&mut out);
                self.open = Some(OpenBuffer::Text(String::new()));
            }
            StreamEvent::TextDelta { delta } => match &mut self.open {
                Some(OpenBuffer::Text(text)) => text.push_str(delta),
                _ => {
                    self.flush_into(&mut out);
                    self.open = Some(OpenBuffer::Text(delta.clone()));
                }
            },
            StreamEvent::ReasoningEnd | StreamEvent::TextEnd => self.flush_into(&mut out),
            StreamEvent::ToolCall {
                tool_call_id,
                tool_name,
                input,
            } => {
                self.flush_into(&mut out);
                out.push(Fragment::ToolCall {
                    tool_call_id: tool_call_id.clone(),
                    tool_name: tool_name.clone(),
                    input: input.clone(),
                });
            }
            StreamEvent::ToolResult {
                tool_call_id,
                tool_name,
                output,
            } => {
                self.flush_into(&mut out);
                out.push(Fragment::ToolResult {
                    tool_call_id: tool_call_id.clone(),
                    tool_name: tool_name.clone(),
                    output: output.clone().into(),
                });
            }
            StreamEvent::StepFinish => {
                self.flush_into(&mut out);
                out.push(Fragment::StepBoundary);
            }
            StreamEvent::Error { message } => {
                tracing::warn!("stream error event: {}", message);
            }
        }
        out
    }

    /// Flush any buffer still open at the end of the stream
    pub fn finish(mut self) -> Vec<Fragment> {
        let mut out = Vec::new();
        self.flush_into(&mut out);
        out
    }

    /// Whether a text or reasoning buffer is currently open
    pub fn has_open_buffer(&self) -> bool {
        self.open.is_some()
    }

    fn flush_into(&mut self, out: &mut Vec<Fragment>) {
        if let Some(fragment) = self.open.take().and_then(OpenBuffer::into_fragment) {
            out.push(fragment);
        }
    }
}
