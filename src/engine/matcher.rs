//! Vocabulary match compiler.
//!
//! Builds one case-insensitive alternation over all page words, longest
//! first, and caches it keyed by a hash of the ordered word list. Changing a
//! translation or color leaves the word list, and therefore the cached
//! pattern, untouched.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::vocab::VocabularyEntry;

/// Compiled program size ceiling; large vocabularies need more than the default.
const PATTERN_SIZE_LIMIT: usize = 64 << 20;

/// How a match must be delimited in the surrounding text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Boundary {
    /// Unicode word boundaries on both sides.
    #[default]
    Word,
    /// Plain substring match, for scripts written without spaces.
    None,
}

/// Cached pattern plus the word-list hash it was built from.
#[derive(Debug, Clone)]
pub struct CompiledMatcher {
    pub source_hash: u64,
    pub boundary: Boundary,
    pub pattern: Arc<Regex>,
}

#[derive(Debug, Default)]
pub struct MatchCompiler {
    boundary: Boundary,
    cached: Option<CompiledMatcher>,
    compiles: usize,
}

impl MatchCompiler {
    pub fn new(boundary: Boundary) -> Self {
        Self {
            boundary,
            cached: None,
            compiles: 0,
        }
    }

    pub fn boundary(&self) -> Boundary {
        self.boundary
    }

    pub fn set_boundary(&mut self, boundary: Boundary) {
        self.boundary = boundary;
    }

    /// How many times a pattern was actually compiled.
    pub fn compile_count(&self) -> usize {
        self.compiles
    }

    pub fn cached(&self) -> Option<&CompiledMatcher> {
        self.cached.as_ref()
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    /// Pattern for `entries`, or `None` when there is nothing to match.
    pub fn compile(&mut self, entries: &[VocabularyEntry]) -> Option<Arc<Regex>> {
        let words: Vec<&str> = entries.iter().map(|e| e.word.as_str()).collect();
        self.compile_words(&words)
    }

    pub fn compile_words(&mut self, words: &[&str]) -> Option<Arc<Regex>> {
        let hash = source_hash(words);
        if let Some(cached) = &self.cached {
            if cached.source_hash == hash && cached.boundary == self.boundary {
                log::debug!("match pattern cache hit ({} words)", words.len());
                return Some(Arc::clone(&cached.pattern));
            }
        }

        log::debug!("match pattern cache miss ({} words)", words.len());
        let Some(source) = build_pattern(words, self.boundary) else {
            self.cached = None;
            return None;
        };
        let pattern = match RegexBuilder::new(&source)
            .case_insensitive(true)
            .size_limit(PATTERN_SIZE_LIMIT)
            .build()
        {
            Ok(re) => Arc::new(re),
            Err(e) => {
                log::error!("failed to compile vocabulary pattern: {}", e);
                self.cached = None;
                return None;
            }
        };
        self.compiles += 1;
        self.cached = Some(CompiledMatcher {
            source_hash: hash,
            boundary: self.boundary,
            pattern: Arc::clone(&pattern),
        });
        Some(pattern)
    }
}

/// Deterministic hash of the ordered word list.
pub fn source_hash(words: &[&str]) -> u64 {
    let mut hasher = DefaultHasher::new();
    words.hash(&mut hasher);
    hasher.finish()
}

/// Regex source for `words`: empty words dropped, longest first (stable),
/// escaped, joined as one alternation group.
pub fn build_pattern(words: &[&str], boundary: Boundary) -> Option<String> {
    let mut sorted: Vec<&str> = words.iter().copied().filter(|w| !w.is_empty()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
    let alternation = sorted
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join("|");
    Some(match boundary {
        Boundary::Word => format!(r"\b(?:{})\b", alternation),
        Boundary::None => format!("(?:{})", alternation),
    })
}

/// Split `text` around every match.
///
/// Literal segments land at even indices and matched segments at odd ones;
/// the result always has odd length, and length 1 means no match.
pub fn split_segments<'t>(text: &'t str, pattern: &Regex) -> Vec<&'t str> {
    let mut segments = Vec::new();
    let mut last = 0;
    for m in pattern.find_iter(text) {
        segments.push(&text[last..m.start()]);
        segments.push(m.as_str());
        last = m.end();
    }
    segments.push(&text[last..]);
    segments
}
