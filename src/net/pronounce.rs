//! Dictionary-backed pronunciation lookup.

use std::time::Duration;

use serde::Deserialize;

use crate::error::PronounceError;

const ENDPOINT: &str = "https://api.dictionaryapi.dev/api/v2/entries";

const PUNCTUATION: &[char] = &[
    '.', ',', '/', '#', '!', '$', '%', '^', '&', '*', ';', ':', '{', '}', '=', '_', '`', '~', '(',
    ')', '?', '"', '\'', '[', ']', '\\', '<', '>', '|', '+', '-',
];

/// Finds an audio URL for a word.
pub trait Pronouncer {
    fn audio_url(&self, word: &str, language: &str) -> Result<String, PronounceError>;
}

#[derive(Debug, Deserialize)]
struct DictionaryEntry {
    #[serde(default)]
    phonetics: Vec<Phonetic>,
}

#[derive(Debug, Deserialize)]
struct Phonetic {
    #[serde(default)]
    audio: Option<String>,
}

pub struct DictionaryPronouncer {
    timeout: Duration,
}

impl DictionaryPronouncer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for DictionaryPronouncer {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Pronouncer for DictionaryPronouncer {
    fn audio_url(&self, word: &str, language: &str) -> Result<String, PronounceError> {
        let word = normalize_word(word).ok_or(PronounceError::EmptyWord)?;
        let lang = dictionary_language(language);
        let mut url = url::Url::parse(ENDPOINT).map_err(|e| PronounceError::Request(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| PronounceError::Request("endpoint cannot take a path".into()))?
            .push(&lang)
            .push(&word);

        let client = super::http_client(self.timeout).map_err(|e| PronounceError::Request(e.to_string()))?;
        let response = client
            .get(url)
            .send()
            .map_err(|e| PronounceError::Request(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PronounceError::NotFound);
        }
        if !response.status().is_success() {
            return Err(PronounceError::Request(response.status().to_string()));
        }
        let entries: Vec<DictionaryEntry> = response
            .json()
            .map_err(|e| PronounceError::Request(e.to_string()))?;
        pick_audio_url(&entries, language).ok_or(PronounceError::NotFound)
    }
}

/// First whitespace token with punctuation stripped, lowercased.
pub fn normalize_word(word: &str) -> Option<String> {
    let token = word.split_whitespace().next()?;
    let cleaned: String = token.chars().filter(|c| !PUNCTUATION.contains(c)).collect();
    (!cleaned.is_empty()).then(|| cleaned.to_lowercase())
}

/// Dictionary language for a configured source language.
pub fn dictionary_language(language: &str) -> String {
    let lower = language.trim().to_lowercase();
    if lower.is_empty() || lower == "auto" || lower.starts_with("en") {
        return "en".to_string();
    }
    lower.split(['-', '_']).next().unwrap_or("en").to_string()
}

/// First non-empty audio URL, preferring one tagged with the region of
/// `language` (`en-US` prefers `...-us.mp3`).
fn pick_audio_url(entries: &[DictionaryEntry], language: &str) -> Option<String> {
    let urls: Vec<&str> = entries
        .iter()
        .flat_map(|e| e.phonetics.iter())
        .filter_map(|p| p.audio.as_deref())
        .filter(|a| !a.is_empty())
        .collect();
    let region = language
        .split(['-', '_'])
        .nth(1)
        .map(|r| format!("-{}", r.to_lowercase()));
    if let Some(region) = region {
        if let Some(url) = urls.iter().find(|u| u.to_lowercase().contains(&region)) {
            return Some(url.to_string());
        }
    }
    urls.first().map(|u| u.to_string())
}
