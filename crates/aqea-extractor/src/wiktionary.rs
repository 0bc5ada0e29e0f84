//! The default source extractor: Wiktionary, queried over its public
//! HTTP APIs. Title enumeration uses MediaWiki's `list=allpages`
//! (sorted, prefix-range friendly); per-lemma definitions come from
//! the REST `page/definition` endpoint, which already returns
//! structured JSON — no wikitext parsing (spec §1, §4.6).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use aqea_core::RawRecord;

use crate::error::ExtractError;

/// Per-source rate limiting and retry numbers (spec §4.2/§5).
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            factor: 2.0,
            cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WiktionaryConfig {
    pub language_code: String,
    /// Wiktionary subdomain, e.g. `"en"` for `en.wiktionary.org`.
    pub wiktionary_lang: String,
    pub rest_base_url: String,
    pub action_api_url: String,
    pub request_delay: Duration,
    pub max_concurrent_requests: usize,
    pub backoff: BackoffConfig,
    /// Upper bound on titles pulled per range, to keep one work unit bounded.
    pub max_titles_per_range: usize,
}

impl WiktionaryConfig {
    pub fn new(language_code: impl Into<String>, wiktionary_lang: impl Into<String>) -> Self {
        let wiktionary_lang = wiktionary_lang.into();
        Self {
            language_code: language_code.into(),
            rest_base_url: format!("https://{wiktionary_lang}.wiktionary.org/api/rest_v1"),
            action_api_url: format!("https://{wiktionary_lang}.wiktionary.org/w/api.php"),
            wiktionary_lang,
            request_delay: Duration::from_millis(200),
            max_concurrent_requests: 5,
            backoff: BackoffConfig::default(),
            max_titles_per_range: 5_000,
        }
    }
}

pub struct WiktionaryExtractor {
    client: reqwest::Client,
    config: WiktionaryConfig,
    semaphore: Arc<Semaphore>,
    last_request: Arc<Mutex<Option<tokio::time::Instant>>>,
}

impl WiktionaryExtractor {
    pub fn new(config: WiktionaryConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("aqea-extractor/0.1")
            .build()
            .expect("reqwest client builds with static config");
        Self {
            client,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_requests)),
            last_request: Arc::new(Mutex::new(None)),
            config,
        }
    }

    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < self.config.request_delay {
                tokio::time::sleep(self.config.request_delay - elapsed).await;
            }
        }
        *last = Some(tokio::time::Instant::now());
    }

    /// GET with the shared rate limiter and 429/5xx backoff (spec §4.2/§5).
    async fn get_with_backoff(&self, url: &str) -> Result<reqwest::Response, ExtractError> {
        let _permit = self.semaphore.acquire().await.expect("semaphore not closed");

        let mut attempt = 0;
        loop {
            self.throttle().await;
            let response = self.client.get(url).send().await?;
            let status = response.status();

            if status.is_success() {
                return Ok(response);
            }
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(ExtractError::NotFound(url.to_string()));
            }
            if !(status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()) {
                return Err(ExtractError::MalformedResponse(format!(
                    "unexpected status {status} from {url}"
                )));
            }

            attempt += 1;
            if attempt >= self.config.backoff.max_attempts {
                return Err(ExtractError::RateLimited {
                    retry_after_secs: self.config.backoff.cap.as_secs(),
                });
            }
            let delay = backoff_delay(&self.config.backoff, attempt);
            warn!("upstream {status} for {url}, retrying in {delay:?} (attempt {attempt})");
            tokio::time::sleep(delay).await;
        }
    }

    async fn fetch_titles_in_range(&self, range_start: &str, range_end: &str) -> Result<Vec<String>, ExtractError> {
        let mut titles = Vec::new();
        let mut continue_from = range_start.to_string();

        loop {
            let url = format!(
                "{}?action=query&list=allpages&apfrom={}&aplimit=500&format=json",
                self.config.action_api_url,
                urlencoding_component(&continue_from),
            );
            let response = self.get_with_backoff(&url).await?;
            let body: AllPagesResponse = response
                .json()
                .await
                .map_err(|e| ExtractError::MalformedResponse(e.to_string()))?;

            let mut exhausted_range = false;
            for page in body.query.allpages {
                if page.title.as_str() >= range_end {
                    exhausted_range = true;
                    break;
                }
                titles.push(page.title);
                if titles.len() >= self.config.max_titles_per_range {
                    exhausted_range = true;
                    break;
                }
            }

            let next = body.cont.and_then(|c| c.apcontinue);
            match next {
                Some(next_from) if !exhausted_range => continue_from = next_from,
                _ => break,
            }
        }

        Ok(titles)
    }

    async fn fetch_definition(&self, title: &str) -> Result<RawRecord, ExtractError> {
        let url = format!(
            "{}/page/definition/{}",
            self.config.rest_base_url,
            urlencoding_component(title),
        );
        let response = self.get_with_backoff(&url).await?;
        let body: DefinitionResponse = response
            .json()
            .await
            .map_err(|e| ExtractError::MalformedResponse(e.to_string()))?;

        let language_entries = body
            .0
            .get(&self.config.wiktionary_lang)
            .ok_or_else(|| ExtractError::NotFound(title.to_string()))?;

        let mut pos = None;
        let mut definitions = Vec::new();
        for entry in language_entries {
            if pos.is_none() {
                pos = Some(normalize_pos(&entry.part_of_speech));
            }
            for def in &entry.definitions {
                let text = strip_html_tags(&def.definition);
                if !text.is_empty() {
                    definitions.push(text);
                }
            }
        }

        Ok(RawRecord {
            word: title.to_string(),
            language: self.config.language_code.clone(),
            pos,
            definitions,
            ..Default::default()
        })
    }
}

#[async_trait]
impl crate::Extractor for WiktionaryExtractor {
    async fn extract_range(
        &self,
        range_start: &str,
        range_end: &str,
    ) -> Result<BoxStream<'static, Result<RawRecord, ExtractError>>, ExtractError> {
        let titles = self.fetch_titles_in_range(range_start, range_end).await?;
        debug!("{} titles in range [{range_start}, {range_end})", titles.len());

        let client = self.client.clone();
        let config = self.config.clone();
        let semaphore = self.semaphore.clone();
        let last_request = self.last_request.clone();

        let stream = stream::iter(titles).then(move |title| {
            let worker = WiktionaryExtractor {
                client: client.clone(),
                config: config.clone(),
                semaphore: semaphore.clone(),
                last_request: last_request.clone(),
            };
            async move { worker.fetch_definition(&title).await }
        });

        Ok(Box::pin(stream))
    }
}

fn backoff_delay(backoff: &BackoffConfig, attempt: u32) -> Duration {
    let scaled = backoff.base.as_secs_f64() * backoff.factor.powi(attempt as i32 - 1);
    Duration::from_secs_f64(scaled).min(backoff.cap)
}

fn normalize_pos(wiktionary_pos: &str) -> String {
    wiktionary_pos.trim().to_ascii_lowercase().replace(' ', "_")
}

fn urlencoding_component(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

fn strip_html_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}

#[derive(Debug, Deserialize)]
struct AllPagesResponse {
    query: AllPagesQuery,
    #[serde(rename = "continue")]
    cont: Option<AllPagesContinue>,
}

#[derive(Debug, Deserialize)]
struct AllPagesQuery {
    allpages: Vec<AllPagesEntry>,
}

#[derive(Debug, Deserialize)]
struct AllPagesEntry {
    title: String,
}

#[derive(Debug, Deserialize)]
struct AllPagesContinue {
    apcontinue: Option<String>,
}

/// The REST `page/definition` envelope: a map of Wiktionary language
/// code ("en", "de", ...) to a list of part-of-speech sections.
#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct DefinitionResponse(std::collections::HashMap<String, Vec<DefinitionEntry>>);

#[derive(Debug, Deserialize)]
struct DefinitionEntry {
    #[serde(rename = "partOfSpeech")]
    part_of_speech: String,
    definitions: Vec<DefinitionText>,
}

#[derive(Debug, Deserialize)]
struct DefinitionText {
    definition: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delay_respects_cap() {
        let config = BackoffConfig::default();
        let d1 = backoff_delay(&config, 1);
        let d5 = backoff_delay(&config, 8);
        assert_eq!(d1, Duration::from_millis(500));
        assert_eq!(d5, config.cap);
    }

    #[test]
    fn strip_html_tags_removes_markup() {
        assert_eq!(strip_html_tags("a <b>round</b> fruit"), "a round fruit");
        assert_eq!(strip_html_tags("no markup"), "no markup");
    }

    #[test]
    fn normalize_pos_lowercases_and_joins() {
        assert_eq!(normalize_pos("Proper noun"), "proper_noun");
        assert_eq!(normalize_pos("Noun"), "noun");
    }

    #[test]
    fn default_config_uses_spec_rate_limit_numbers() {
        let config = WiktionaryConfig::new("deu", "de");
        assert_eq!(config.request_delay, Duration::from_millis(200));
        assert_eq!(config.max_concurrent_requests, 5);
        assert_eq!(config.backoff.base, Duration::from_millis(500));
        assert_eq!(config.backoff.cap, Duration::from_secs(30));
        assert_eq!(config.backoff.max_attempts, 5);
    }
}
