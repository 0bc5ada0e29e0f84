//! The AQEA converter (C2): raw record → one [`AqeaEntry`] with a
//! globally unique address (spec §4.3).

use async_trait::async_trait;
use chrono::Utc;

use crate::address::{Address, RESERVED_EE};
use crate::error::ConversionError;
use crate::lang;
use crate::model::{AqeaEntry, EntryMeta, RawRecord};
use crate::pos;

/// Port the converter calls to reserve an element ID within a
/// `(AA, QQ, EE)` tuple (spec §4.4). Implemented by `aqea-store`'s
/// backends; kept here so the converter doesn't have to depend on a
/// concrete storage crate to do its job.
#[async_trait]
pub trait AddressAllocator: Send + Sync {
    async fn allocate(
        &self,
        aa: u8,
        qq: u8,
        ee: u8,
        lemma_key: &str,
    ) -> Result<u8, ConversionError>;
}

/// Converts raw extractor records into AQEA entries.
pub struct Converter<'a> {
    allocator: &'a dyn AddressAllocator,
    source_name: String,
    worker_id: String,
}

impl<'a> Converter<'a> {
    pub fn new(allocator: &'a dyn AddressAllocator, source_name: impl Into<String>, worker_id: impl Into<String>) -> Self {
        Self {
            allocator,
            source_name: source_name.into(),
            worker_id: worker_id.into(),
        }
    }

    /// Convert one raw record. Returns a soft [`ConversionError`] on
    /// recoverable failure (spec §4.3, §7) — the caller is responsible
    /// for counting it and continuing.
    pub async fn convert(&self, record: &RawRecord) -> Result<AqeaEntry, ConversionError> {
        let lemma = record.word.trim();
        if lemma.is_empty() {
            return Err(ConversionError::EmptyLemma);
        }

        let aa = lang::aa_byte(&record.language)
            .ok_or_else(|| ConversionError::UnsupportedLanguage(record.language.clone()))?;

        let pos_str = record.pos.as_deref().unwrap_or("unknown");
        let qq = pos::qq_byte(pos_str);

        let ee = semantic_cluster(lemma, pos_str, &record.language, &record.definitions, record.frequency_rank);
        debug_assert!(!RESERVED_EE.contains(&ee));

        let lemma_key = format!("{}::{}::{}", record.language, pos_str, lemma);
        let a2 = self
            .allocator
            .allocate(aa, qq, ee, &lemma_key)
            .await
            .map_err(|e| match e {
                ConversionError::Allocator(_) => e,
                other => other,
            })?;

        let address = Address::new(aa, qq, ee, a2);

        let first_def = record
            .definitions
            .first()
            .map(|d| truncate_chars(d, 200))
            .unwrap_or_default();
        let language_name = lang::language_name(aa).unwrap_or(&record.language);
        let description = format!("{} {} '{}'. {}", language_name, pos_str, lemma, first_def);
        let description = truncate_chars(&description, 2048);

        let now = Utc::now();
        let meta = EntryMeta {
            lemma: lemma.to_string(),
            pos: pos_str.to_string(),
            ipa: record.ipa.clone(),
            definitions: record.definitions.iter().take(10).cloned().collect(),
            examples: record.examples.clone(),
            synonyms: record.synonyms.clone(),
            antonyms: record.antonyms.clone(),
            translations: record.translations.clone(),
            audio: record.audio.clone(),
            frequency_rank: record.frequency_rank,
            source: self.source_name.clone(),
            worker_id: self.worker_id.clone(),
            created_at: now,
        };

        Ok(AqeaEntry {
            address,
            label: lemma.to_string(),
            description,
            domain: format!("0x{aa:02X}"),
            meta,
            relations: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// FNV-1a over the UTF-8 bytes of the join key, folded into `[0, 255]`.
/// Deterministic, pure, and cheap — the semantic-domain hash function
/// required (and left implementation-defined) by spec §4.3/§9 OQ2.
fn fnv1a(input: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for byte in input.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Derive the EE byte per spec §4.3's frequency-banded cluster rule.
pub fn semantic_cluster(
    lemma: &str,
    pos: &str,
    language: &str,
    definitions: &[String],
    frequency_rank: Option<u32>,
) -> u8 {
    let rank = frequency_rank.unwrap_or(u32::MAX);

    if rank <= 10_000 {
        // High-frequency reserved range.
        let joined = definitions.join("\x1f");
        let key = format!("{lemma}\x00{pos}\x00{language}\x00{joined}");
        let d = (fnv1a(&key) % 256) as u8;
        return 0x10 + (d % 16);
    }

    let joined = definitions.join("\x1f");
    let key = format!("{lemma}\x00{pos}\x00{language}\x00{joined}");
    let d = (fnv1a(&key) % 256) as u8;

    if rank <= 1_000 {
        0x10 + (d % 16)
    } else if rank <= 10_000 {
        0x20 + (d % 32)
    } else if rank <= 100_000 {
        0x40 + (d % 64)
    } else {
        0x80 + (d % 127)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::sync::Mutex;

    struct StubAllocator {
        seen: Mutex<std::collections::HashMap<String, u8>>,
        next: AtomicU8,
    }

    impl StubAllocator {
        fn new() -> Self {
            Self {
                seen: Mutex::new(std::collections::HashMap::new()),
                next: AtomicU8::new(1),
            }
        }
    }

    #[async_trait]
    impl AddressAllocator for StubAllocator {
        async fn allocate(&self, _aa: u8, _qq: u8, _ee: u8, lemma_key: &str) -> Result<u8, ConversionError> {
            let mut seen = self.seen.lock().unwrap();
            if let Some(a2) = seen.get(lemma_key) {
                return Ok(*a2);
            }
            let a2 = self.next.fetch_add(1, Ordering::SeqCst);
            seen.insert(lemma_key.to_string(), a2);
            Ok(a2)
        }
    }

    fn sample_record() -> RawRecord {
        RawRecord {
            word: "Apfel".to_string(),
            language: "deu".to_string(),
            pos: Some("noun".to_string()),
            definitions: vec!["a round fruit".to_string()],
            frequency_rank: Some(500),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn converts_a_valid_record() {
        let alloc = StubAllocator::new();
        let converter = Converter::new(&alloc, "wiktionary", "worker-1");
        let entry = converter.convert(&sample_record()).await.unwrap();
        assert_eq!(entry.address.aa, 0xA0);
        assert_eq!(entry.address.qq, 0x01);
        assert!(entry.address.is_well_formed());
        assert_eq!(entry.label, "Apfel");
        assert!(entry.description.starts_with("German noun 'Apfel'."));
    }

    #[tokio::test]
    async fn empty_lemma_is_rejected() {
        let alloc = StubAllocator::new();
        let converter = Converter::new(&alloc, "wiktionary", "worker-1");
        let mut record = sample_record();
        record.word = "   ".to_string();
        let err = converter.convert(&record).await.unwrap_err();
        assert!(matches!(err, ConversionError::EmptyLemma));
    }

    #[tokio::test]
    async fn unsupported_language_is_rejected() {
        let alloc = StubAllocator::new();
        let converter = Converter::new(&alloc, "wiktionary", "worker-1");
        let mut record = sample_record();
        record.language = "xyz".to_string();
        let err = converter.convert(&record).await.unwrap_err();
        assert!(matches!(err, ConversionError::UnsupportedLanguage(_)));
    }

    #[tokio::test]
    async fn conversion_is_deterministic_for_identical_inputs() {
        let alloc = StubAllocator::new();
        let converter = Converter::new(&alloc, "wiktionary", "worker-1");
        let record = sample_record();
        let e1 = converter.convert(&record).await.unwrap();
        let e2 = converter.convert(&record).await.unwrap();
        assert_eq!(e1.address, e2.address);
    }

    #[tokio::test]
    async fn missing_pos_maps_to_unknown_byte() {
        let alloc = StubAllocator::new();
        let converter = Converter::new(&alloc, "wiktionary", "worker-1");
        let mut record = sample_record();
        record.pos = None;
        let entry = converter.convert(&record).await.unwrap();
        assert_eq!(entry.address.qq, 0xFF);
        assert_eq!(entry.meta.pos, "unknown");
    }

    #[test]
    fn semantic_cluster_never_produces_reserved_ee() {
        for rank in [Some(5), Some(5_000), Some(50_000), Some(500_000), None] {
            let ee = semantic_cluster("word", "noun", "eng", &["def".to_string()], rank);
            assert!(!RESERVED_EE.contains(&ee));
        }
    }

    #[test]
    fn semantic_cluster_is_pure() {
        let a = semantic_cluster("apple", "noun", "eng", &["fruit".to_string()], Some(50_000));
        let b = semantic_cluster("apple", "noun", "eng", &["fruit".to_string()], Some(50_000));
        assert_eq!(a, b);
    }

    #[test]
    fn high_frequency_rank_uses_reserved_band() {
        let ee = semantic_cluster("apple", "noun", "eng", &[], Some(42));
        assert!((0x10..=0x1F).contains(&ee));
    }

    #[test]
    fn low_frequency_band_never_hits_the_reserved_top_byte() {
        for i in 0..2000 {
            let lemma = format!("word{i}");
            let ee = semantic_cluster(&lemma, "noun", "eng", &["definition text".to_string()], Some(200_000));
            assert!(!RESERVED_EE.contains(&ee), "lemma {lemma} produced reserved ee 0x{ee:02X}");
        }

        let ee_no_rank = semantic_cluster("word35", "noun", "eng", &["definition text".to_string()], None);
        assert!(!RESERVED_EE.contains(&ee_no_rank));
    }
}
