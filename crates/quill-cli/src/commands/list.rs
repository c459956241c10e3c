//! `quill list` - list persisted transcripts

use quill_transcript::{EntryStore, FileStore};

use crate::utils::truncate_chars;

/// Summary line for a stored transcript
#[derive(Debug, Clone)]
pub struct TranscriptInfo {
    pub id: String,
    pub message_count: usize,
    pub preview: String,
}

pub struct ListCommand;

impl ListCommand {
    pub async fn execute(store: &FileStore) -> anyhow::Result<Vec<TranscriptInfo>> {
        let mut infos = Vec::new();
        for id in store.list_ids().await? {
            let entries = match store.load_entries(&id).await {
                Ok(Some(entries)) => entries,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Skipping unreadable transcript {}: {}", id, e);
                    continue;
                }
            };
            let preview = entries
                .raw_llm_messages
                .iter()
                .map(|m| m.text())
                .find(|t| !t.is_empty())
                .map(|t| truncate_chars(&t.replace('\n', " "), 40))
                .unwrap_or_default();
            infos.push(TranscriptInfo {
                id,
                message_count: entries.raw_llm_messages.len(),
                preview,
            });
        }
        Ok(infos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_model::{Message, MessageEntries};

    #[tokio::test]
    async fn test_list_skips_corrupt_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let entries = MessageEntries {
            raw_llm_messages: vec![Message::user("first line\nsecond line")],
            ..Default::default()
        };
        store.write_entries("good", &entries).await.unwrap();
        std::fs::write(dir.path().join("bad.json"), "{").unwrap();

        let infos = ListCommand::execute(&store).await.unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].id, "good");
        assert_eq!(infos[0].message_count, 1);
        assert_eq!(infos[0].preview, "first line second line");
    }
}
