//! `quill replay` - fold a recorded event stream into a persisted transcript

use anyhow::Context as _;
use quill_model::{Message, Role};
use quill_transcript::{TranscriptRepository, accumulate, create_state};
use std::path::Path;

/// Counts reported after a replay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    pub events: usize,
    pub turn_messages: usize,
    pub assistant_messages: usize,
    pub tool_messages: usize,
    pub stored_raw_messages: usize,
    pub stored_response_messages: usize,
}

pub struct ReplayCommand;

/// Turn id for a recording, stable across replays of the same input
fn derive_turn_id(prompt: Option<&str>, input: &str) -> String {
    let mut name = prompt.unwrap_or_default().as_bytes().to_vec();
    name.push(b'\n');
    name.extend_from_slice(input.as_bytes());
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, &name).to_string()
}

impl ReplayCommand {
    pub async fn execute(
        repo: &TranscriptRepository,
        id: &str,
        events_path: &Path,
        prompt: Option<&str>,
        turn_id: Option<&str>,
    ) -> anyhow::Result<ReplaySummary> {
        let input = tokio::fs::read_to_string(events_path)
            .await
            .with_context(|| format!("reading {}", events_path.display()))?;
        let events = quill_model::parse_events(&input)?;
        if let Some(message) = events.iter().find_map(|e| match e {
            quill_model::StreamEvent::Error { message } => Some(message),
            _ => None,
        }) {
            tracing::warn!("replayed stream contains an error event: {}", message);
        }

        let turn_id = match turn_id {
            Some(turn_id) => turn_id.to_string(),
            None => derive_turn_id(prompt, &input),
        };
        tracing::debug!("replaying {} as turn {}", events_path.display(), turn_id);

        let initial: Vec<Message> = prompt.map(Message::user).into_iter().collect();
        let messages = accumulate(create_state(&initial), &events).into_messages();
        let stored = repo
            .persist_turn(id, &turn_id, &messages)
            .await
            .with_context(|| format!("persisting turn {} into {}", turn_id, id))?;

        let count_role = |role: Role| messages.iter().filter(|m| m.role == role).count();
        Ok(ReplaySummary {
            events: events.len(),
            turn_messages: messages.len(),
            assistant_messages: count_role(Role::Assistant),
            tool_messages: count_role(Role::Tool),
            stored_raw_messages: stored.raw_llm_messages.len(),
            stored_response_messages: stored.response_messages.len(),
        })
    }
}
