//! Per-turn accumulation of streamed content into transcript messages
//!
//! Every operation consumes the previous [`AccumulatorState`] and returns the
//! next one. The state tracks which already-emitted assistant and tool
//! messages are open for the current step by index, so appends land in the
//! right message even after other messages were pushed behind it.

use futures::{Stream, StreamExt};
use quill_model::{ContentPart, Fragment, Message, Role, StreamEvent, ToolOutput, TurnBuilder};

use crate::error::{Error, Result};

/// Accumulated transcript for one streaming turn
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccumulatorState {
    messages: Vec<Message>,
    /// Index of the assistant message open for the current step
    current_step_assistant_message: Option<usize>,
    /// Index of the tool message open for the current step
    current_tool_message: Option<usize>,
}

impl AccumulatorState {
    /// Create a fresh state seeded with a copy of `initial_messages`
    pub fn new(initial_messages: &[Message]) -> Self {
        Self {
            messages: initial_messages.to_vec(),
            current_step_assistant_message: None,
            current_tool_message: None,
        }
    }

    /// All messages accumulated so far
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Consume the state, yielding its messages
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Whether an assistant message is open for the current step
    pub fn assistant_message_created(&self) -> bool {
        self.current_step_assistant_message.is_some()
    }

    /// The assistant message open for the current step
    pub fn current_step_assistant_message(&self) -> Option<&Message> {
        self.current_step_assistant_message
            .and_then(|idx| self.messages.get(idx))
    }

    /// The tool message open for the current step
    pub fn current_tool_message(&self) -> Option<&Message> {
        self.current_tool_message.and_then(|idx| self.messages.get(idx))
    }

    /// Close the open assistant and tool messages so the next step starts fresh
    #[must_use]
    pub fn reset_step_state(self) -> Self {
        Self {
            current_step_assistant_message: None,
            current_tool_message: None,
            ..self
        }
    }

    #[must_use]
    pub fn add_reasoning_content(self, text: impl Into<String>) -> Self {
        self.push_assistant_part(ContentPart::reasoning(text))
    }

    #[must_use]
    pub fn add_text_content(self, text: impl Into<String>) -> Self {
        self.push_assistant_part(ContentPart::text(text))
    }

    #[must_use]
    pub fn add_tool_call(
        self,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        self.push_assistant_part(ContentPart::tool_call(tool_call_id, tool_name, input))
    }

    /// Record a tool result. All results of a step share one tool message.
    #[must_use]
    pub fn add_tool_result(
        mut self,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: impl Into<ToolOutput>,
    ) -> Self {
        let part = ContentPart::tool_result(tool_call_id, tool_name, output);
        let slot = self.current_tool_message;
        self.current_tool_message = Some(self.push_part(slot, Role::Tool, part));
        self
    }

    /// Fold a completed fragment into the state
    #[must_use]
    pub fn apply(self, fragment: Fragment) -> Self {
        match fragment {
            Fragment::Reasoning(text) => self.add_reasoning_content(text),
            Fragment::Text(text) => self.add_text_content(text),
            Fragment::ToolCall {
                tool_call_id,
                tool_name,
                input,
            } => self.add_tool_call(tool_call_id, tool_name, input),
            Fragment::ToolResult {
                tool_call_id,
                tool_name,
                output,
            } => self.add_tool_result(tool_call_id, tool_name, output),
            Fragment::StepBoundary => self.reset_step_state(),
        }
    }

    fn push_assistant_part(mut self, part: ContentPart) -> Self {
        let slot = self.current_step_assistant_message;
        self.current_step_assistant_message = Some(self.push_part(slot, Role::Assistant, part));
        self
    }

    /// Append `part` to the message at `slot`, or open a new message of
    /// `role` when nothing is open. Returns the index that received the part.
    fn push_part(&mut self, slot: Option<usize>, role: Role, part: ContentPart) -> usize {
        if let Some(idx) = slot {
            if let Some(message) = self.messages.get_mut(idx) {
                message.content.push(part);
                return idx;
            }
        }
        self.messages.push(Message::new(role, vec![part]));
        self.messages.len() - 1
    }
}

/// Create a fresh state seeded with a copy of `initial_messages`
pub fn create_state(initial_messages: &[Message]) -> AccumulatorState {
    AccumulatorState::new(initial_messages)
}

/// Fold a complete list of stream events into `state`.
///
/// Error events are skipped; use [`accumulate_stream`] to abort on them.
pub fn accumulate(state: AccumulatorState, events: &[StreamEvent]) -> AccumulatorState {
    let mut builder = TurnBuilder::new();
    let state = events
        .iter()
        .flat_map(|event| builder.process_event(event))
        .fold(state, AccumulatorState::apply);
    builder.finish().into_iter().fold(state, AccumulatorState::apply)
}

/// Fold an async stream of events into `state`, stopping at the first error event
pub async fn accumulate_stream<S>(mut state: AccumulatorState, events: S) -> Result<AccumulatorState>
where
    S: Stream<Item = StreamEvent>,
{
    let mut builder = TurnBuilder::new();
    let mut events = std::pin::pin!(events);

    while let Some(event) = events.next().await {
        if let StreamEvent::Error { message } = event {
            return Err(Error::Stream(message));
        }
        for fragment in builder.process_event(&event) {
            state = state.apply(fragment);
        }
    }

    for fragment in builder.finish() {
        state = state.apply(fragment);
    }
    tracing::debug!("accumulated {} messages", state.messages.len());
    Ok(state)
}
