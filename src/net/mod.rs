//! Remote collaborators: translation, pronunciation, and page retrieval.
//!
//! All calls are blocking; the session runs them on background threads and
//! polls the result channels from its event-loop tick.

pub mod fetch;
pub mod pronounce;
pub mod translate;

use std::time::Duration;

pub use pronounce::{DictionaryPronouncer, Pronouncer};
pub use translate::{GoogleTranslator, TranslationRequest, Translator};

const USER_AGENT: &str = concat!("vocab-overlay/", env!("CARGO_PKG_VERSION"));

/// Shared blocking client with a hard request ceiling.
pub fn http_client(timeout: Duration) -> reqwest::Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
}
