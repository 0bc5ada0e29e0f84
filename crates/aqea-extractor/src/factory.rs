//! Dispatches a `source_name` string onto a concrete [`Extractor`]
//! (spec §4.6), generalized from the teacher's URI-scheme dispatch
//! (`file://` / `postgres://` / `s3://`) to a source-name string since
//! extractors aren't keyed by storage URI here.

use crate::error::ExtractError;
use crate::wiktionary::{WiktionaryConfig, WiktionaryExtractor};
use crate::Extractor;

/// Config needed to build any registered extractor.
pub struct ExtractorConfig {
    pub language_code: String,
    /// Wiktionary subdomain for this language, e.g. `"de"` for `deu`.
    pub wiktionary_lang: String,
}

/// Build the extractor named `source_name`. Unknown names are a config
/// error, not a panic (spec §4.6).
pub fn build(source_name: &str, cfg: &ExtractorConfig) -> Result<Box<dyn Extractor>, ExtractError> {
    match source_name {
        "wiktionary" => {
            let config = WiktionaryConfig::new(&cfg.language_code, &cfg.wiktionary_lang);
            Ok(Box::new(WiktionaryExtractor::new(config)))
        }
        other => Err(ExtractError::UnsupportedSource(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_the_wiktionary_extractor() {
        let cfg = ExtractorConfig {
            language_code: "deu".to_string(),
            wiktionary_lang: "de".to_string(),
        };
        assert!(build("wiktionary", &cfg).is_ok());
    }

    #[test]
    fn rejects_unknown_source_names() {
        let cfg = ExtractorConfig {
            language_code: "deu".to_string(),
            wiktionary_lang: "de".to_string(),
        };
        let err = build("panlex", &cfg).unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedSource(_)));
    }
}
