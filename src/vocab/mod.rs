//! Saved vocabulary and the page-scoped working set.

pub mod export;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result, StoreError};
use store::{KeyValueStore, Record};

/// Store key holding the full vocabulary list.
pub const VOCABULARY_KEY: &str = "vocabulary";

/// Case-folded form of a word, agreeing with the matcher's
/// case-insensitive regex: every character is lowercased on its own, and
/// final sigma folds to `σ`.
pub fn fold_case(word: &str) -> String {
    word.chars()
        .flat_map(char::to_lowercase)
        .map(|c| if c == 'ς' { 'σ' } else { c })
        .collect()
}

/// One saved word. Identity is `(case-folded word, url)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabularyEntry {
    pub word: String,
    pub translation: String,
    pub url: String,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl VocabularyEntry {
    pub fn new(
        word: impl Into<String>,
        translation: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            word: word.into(),
            translation: translation.into(),
            url: url.into(),
            date: Utc::now(),
            color: None,
        }
    }

    pub fn with_color(mut self, color: Option<String>) -> Self {
        self.color = color;
        self
    }

    /// Case-insensitive word comparison.
    pub fn is_word(&self, word: &str) -> bool {
        fold_case(&self.word) == fold_case(word)
    }

    pub fn same_identity(&self, word: &str, url: &str) -> bool {
        self.url == url && self.is_word(word)
    }
}

/// Read the full persisted vocabulary.
pub fn read_all(store: &dyn KeyValueStore) -> Result<Vec<VocabularyEntry>, StoreError> {
    let record = store.get(&[VOCABULARY_KEY])?;
    match record.get(VOCABULARY_KEY) {
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(value) => Ok(serde_json::from_value(value.clone())?),
    }
}

/// Write the full vocabulary as a single aggregate record.
pub fn write_all(store: &mut dyn KeyValueStore, entries: &[VocabularyEntry]) -> Result<(), StoreError> {
    let mut record = Record::new();
    record.insert(VOCABULARY_KEY.to_string(), serde_json::to_value(entries)?);
    store.set(record)
}

/// Page-scoped vocabulary cache kept consistent with the store.
///
/// Every mutation snapshots the cache, applies the change, then persists;
/// if persisting fails the snapshot is restored and the error returned.
#[derive(Debug, Default, Clone)]
pub struct VocabularyIndex {
    url: String,
    entries: Vec<VocabularyEntry>,
}

impl VocabularyIndex {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            entries: Vec::new(),
        }
    }

    /// Replace the cache with the persisted entries saved for `url`.
    pub fn load(&mut self, store: &dyn KeyValueStore, url: &str) -> Result<&[VocabularyEntry]> {
        let all = read_all(store)?;
        self.url = url.to_string();
        self.entries = all.into_iter().filter(|e| e.url == url).collect();
        log::debug!("loaded {} vocabulary entries for {}", self.entries.len(), url);
        Ok(&self.entries)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn entries(&self) -> &[VocabularyEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Words in cache order.
    pub fn words(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.word.as_str()).collect()
    }

    pub fn find(&self, word: &str) -> Option<&VocabularyEntry> {
        self.entries.iter().find(|e| e.is_word(word))
    }

    /// Save a new entry. Returns `false` when `(word, url)` already exists.
    pub fn add(&mut self, store: &mut dyn KeyValueStore, entry: VocabularyEntry) -> Result<bool> {
        if entry.word.trim().is_empty() {
            return Err(Error::Validation("word must not be empty".into()));
        }
        if entry.url.is_empty() {
            return Err(Error::Validation("url must not be empty".into()));
        }

        let mut all = read_all(store)?;
        if all.iter().any(|e| e.same_identity(&entry.word, &entry.url)) {
            log::debug!("'{}' already saved for {}", entry.word, entry.url);
            return Ok(false);
        }
        all.push(entry.clone());

        let on_page = entry.url == self.url;
        self.transact(store, &all, |entries| {
            if on_page {
                entries.push(entry);
            }
        })?;
        Ok(true)
    }

    /// Delete the `(word, url)` record. Returns how many persisted records went away.
    pub fn remove(&mut self, store: &mut dyn KeyValueStore, word: &str, url: &str) -> Result<usize> {
        let all = read_all(store)?;
        let before = all.len();
        let kept: Vec<VocabularyEntry> = all
            .into_iter()
            .filter(|e| !e.same_identity(word, url))
            .collect();
        let removed = before - kept.len();

        self.transact(store, &kept, |entries| {
            entries.retain(|e| !e.same_identity(word, url));
        })?;
        Ok(removed)
    }

    /// Drop `word` from the cache only; the caller already persisted the deletion.
    pub fn remove_local(&mut self, word: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !e.is_word(word));
        before - self.entries.len()
    }

    pub fn update_translation(
        &mut self,
        store: &mut dyn KeyValueStore,
        word: &str,
        url: &str,
        translation: &str,
    ) -> Result<()> {
        let translation = translation.to_string();
        self.update(store, word, url, move |e| e.translation = translation.clone())
    }

    pub fn update_color(
        &mut self,
        store: &mut dyn KeyValueStore,
        word: &str,
        url: &str,
        color: Option<&str>,
    ) -> Result<()> {
        let color = color.map(str::to_string);
        self.update(store, word, url, move |e| e.color = color.clone())
    }

    fn update(
        &mut self,
        store: &mut dyn KeyValueStore,
        word: &str,
        url: &str,
        apply: impl Fn(&mut VocabularyEntry),
    ) -> Result<()> {
        let mut all = read_all(store)?;
        let Some(target) = all.iter_mut().find(|e| e.same_identity(word, url)) else {
            return Err(Error::NotFound {
                word: word.to_string(),
                url: url.to_string(),
            });
        };
        apply(target);

        self.transact(store, &all, |entries| {
            if let Some(local) = entries.iter_mut().find(|e| e.same_identity(word, url)) {
                apply(local);
            }
        })
    }

    /// Apply `change` to the cache and persist `persisted`, rolling back on failure.
    fn transact(
        &mut self,
        store: &mut dyn KeyValueStore,
        persisted: &[VocabularyEntry],
        change: impl FnOnce(&mut Vec<VocabularyEntry>),
    ) -> Result<()> {
        let snapshot = self.entries.clone();
        change(&mut self.entries);
        if let Err(e) = write_all(store, persisted) {
            log::error!("vocabulary write failed, restoring page cache: {}", e);
            self.entries = snapshot;
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::store::MemoryStore;
    use super::*;

    const PAGE: &str = "https://example.com/a";
    const OTHER: &str = "https://example.com/b";

    /// Store whose writes can be switched off.
    struct FlakyStore {
        inner: MemoryStore,
        fail_writes: bool,
    }

    impl KeyValueStore for FlakyStore {
        fn get(&self, keys: &[&str]) -> Result<Record, StoreError> {
            self.inner.get(keys)
        }

        fn set(&mut self, record: Record) -> Result<(), StoreError> {
            if self.fail_writes {
                return Err(StoreError::Rejected("quota exceeded".into()));
            }
            self.inner.set(record)
        }
    }

    #[test]
    fn greek_sigma_forms_name_the_same_word() {
        let entry = VocabularyEntry::new("σοφος", "wise", PAGE);
        assert!(entry.is_word("ΣΟΦΟΣ"));
        assert!(entry.is_word("σοφοσ"));
        assert!(entry.is_word("Σοφος"));
        assert_eq!(fold_case("ΟΔΟΣ"), fold_case("οδος"));
        assert!(!entry.is_word("σοφια"));
    }

    fn seeded() -> MemoryStore {
        let mut store = MemoryStore::new();
        write_all(
            &mut store,
            &[
                VocabularyEntry::new("cat", "gato", PAGE),
                VocabularyEntry::new("cat", "chat", OTHER),
                VocabularyEntry::new("dog", "perro", PAGE),
            ],
        )
        .unwrap();
        store
    }

    #[test]
    fn load_filters_by_page() {
        let store = seeded();
        let mut index = VocabularyIndex::default();
        index.load(&store, PAGE).unwrap();
        assert_eq!(index.words(), vec!["cat", "dog"]);
        assert_eq!(index.find("CAT").unwrap().translation, "gato");
    }

    #[test]
    fn add_rejects_duplicates_silently() {
        let mut store = seeded();
        let mut index = VocabularyIndex::default();
        index.load(&store, PAGE).unwrap();
        let added = index
            .add(&mut store, VocabularyEntry::new("Cat", "felino", PAGE))
            .unwrap();
        assert!(!added);
        assert_eq!(read_all(&store).unwrap().len(), 3);
        assert_eq!(index.entries().len(), 2);
    }

    #[test]
    fn add_validates_word() {
        let mut store = MemoryStore::new();
        let mut index = VocabularyIndex::new(PAGE);
        let err = index
            .add(&mut store, VocabularyEntry::new("  ", "x", PAGE))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(read_all(&store).unwrap().is_empty());
    }

    #[test]
    fn remove_touches_only_matching_url() {
        let mut store = seeded();
        let mut index = VocabularyIndex::default();
        index.load(&store, PAGE).unwrap();
        let removed = index.remove(&mut store, "CAT", PAGE).unwrap();
        assert_eq!(removed, 1);
        let all = read_all(&store).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|e| e.word == "cat" && e.url == OTHER));
        assert_eq!(index.words(), vec!["dog"]);
    }

    #[test]
    fn updates_translation_and_color() {
        let mut store = seeded();
        let mut index = VocabularyIndex::default();
        index.load(&store, PAGE).unwrap();
        index
            .update_translation(&mut store, "dog", PAGE, "can")
            .unwrap();
        index
            .update_color(&mut store, "dog", PAGE, Some("#ef4444"))
            .unwrap();
        let dog = index.find("dog").unwrap();
        assert_eq!(dog.translation, "can");
        assert_eq!(dog.color.as_deref(), Some("#ef4444"));
        let persisted = read_all(&store).unwrap();
        assert!(persisted
            .iter()
            .any(|e| e.word == "dog" && e.translation == "can"));

        let missing = index.update_translation(&mut store, "bird", PAGE, "x");
        assert!(matches!(missing, Err(Error::NotFound { .. })));
    }

    #[test]
    fn failed_write_rolls_back_cache() {
        let mut store = FlakyStore {
            inner: seeded(),
            fail_writes: false,
        };
        let mut index = VocabularyIndex::default();
        index.load(&store, PAGE).unwrap();

        store.fail_writes = true;
        let err = index
            .add(&mut store, VocabularyEntry::new("bird", "pajaro", PAGE))
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert_eq!(index.words(), vec!["cat", "dog"]);

        assert!(index.remove(&mut store, "cat", PAGE).is_err());
        assert_eq!(index.words(), vec!["cat", "dog"]);

        assert!(index
            .update_translation(&mut store, "cat", PAGE, "minino")
            .is_err());
        assert_eq!(index.find("cat").unwrap().translation, "gato");
    }

    #[test]
    fn entry_json_shape() {
        let entry = VocabularyEntry::new("word", "palabra", PAGE);
        let value = serde_json::to_value(&entry).unwrap();
        assert!(value.get("color").is_none());
        assert!(value["date"].as_str().unwrap().contains('T'));
        let back: VocabularyEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back, entry);
    }
}
