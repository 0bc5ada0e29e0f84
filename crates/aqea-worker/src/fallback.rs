//! NDJSON fallback persistence for when `Store.upsert_batch` fails with a
//! non-transient error (spec §4.2, §6.5). Files are re-ingestible by a
//! one-shot importer outside this core's scope; we only need to produce
//! them correctly.

use std::path::PathBuf;

use aqea_core::model::AqeaEntry;
use tokio::io::AsyncWriteExt;

pub struct FallbackWriter {
    dir: PathBuf,
    worker_id: String,
}

impl FallbackWriter {
    pub fn new(dir: impl Into<PathBuf>, worker_id: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            worker_id: worker_id.into(),
        }
    }

    /// Writes `entries` as one NDJSON file named per spec §6.5 and returns
    /// its path.
    pub async fn write_batch(&self, entries: &[AqeaEntry]) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let unix_ms = unix_millis();
        let path = self
            .dir
            .join(format!("aqea_entries_{}_{}.json", self.worker_id, unix_ms));

        let mut buf = String::new();
        for entry in entries {
            buf.push_str(&serde_json::to_string(entry).expect("AqeaEntry always serializes"));
            buf.push('\n');
        }

        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(buf.as_bytes()).await?;
        Ok(path)
    }
}

fn unix_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_millis()
}

pub fn fallback_file_name(worker_id: &str, unix_ms: u128) -> String {
    format!("aqea_entries_{worker_id}_{unix_ms}.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use aqea_core::address::Address;
    use aqea_core::model::EntryMeta;

    fn sample_entry() -> AqeaEntry {
        let now = chrono::Utc::now();
        AqeaEntry {
            address: Address::new(0xA0, 0x01, 0x20, 0x01),
            label: "apple".to_string(),
            description: "German noun 'Apfel'.".to_string(),
            domain: "semantic_cluster_20".to_string(),
            meta: EntryMeta {
                lemma: "Apfel".to_string(),
                pos: "noun".to_string(),
                ipa: None,
                definitions: vec!["a fruit".to_string()],
                examples: Vec::new(),
                synonyms: Vec::new(),
                antonyms: Vec::new(),
                translations: Vec::new(),
                audio: Vec::new(),
                frequency_rank: None,
                source: "wiktionary".to_string(),
                worker_id: "w1".to_string(),
                created_at: now,
            },
            relations: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn write_batch_creates_one_line_per_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = FallbackWriter::new(tmp.path(), "w1");
        let entries = vec![sample_entry(), sample_entry()];

        let path = writer.write_batch(&entries).await.unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn fallback_file_name_matches_spec_pattern() {
        let name = fallback_file_name("w1", 1_700_000_000_000);
        assert_eq!(name, "aqea_entries_w1_1700000000000.json");
    }
}
