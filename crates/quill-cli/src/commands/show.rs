//! `quill show` - print a persisted transcript

use quill_model::MessageEntries;
use quill_transcript::TranscriptRepository;

pub struct ShowCommand;

impl ShowCommand {
    /// Fetch the transcript for `id`; `None` when it does not exist
    pub async fn execute(
        repo: &TranscriptRepository,
        id: &str,
    ) -> anyhow::Result<Option<String>> {
        let Some(entries) = repo.fetch_message_entries(id).await? else {
            return Ok(None);
        };
        Ok(Some(render(&entries)?))
    }
}

fn render(entries: &MessageEntries) -> serde_json::Result<String> {
    serde_json::to_string_pretty(entries)
}
