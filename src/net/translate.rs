use std::time::Duration;

use serde_json::Value;
use url::Url;

use crate::error::TranslateError;

const ENDPOINT: &str = "https://translate.googleapis.com/translate_a/single";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRequest {
    pub text: String,
    pub source: String,
    pub target: String,
}

impl TranslationRequest {
    pub fn new(text: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Resolves or fails within a bounded time.
pub trait Translator {
    fn translate(&self, request: &TranslationRequest) -> Result<String, TranslateError>;
}

/// Public Google Translate web endpoint.
pub struct GoogleTranslator {
    timeout: Duration,
}

impl GoogleTranslator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn request_url(request: &TranslationRequest) -> Result<Url, TranslateError> {
        Url::parse_with_params(
            ENDPOINT,
            &[
                ("client", "gtx"),
                ("sl", request.source.as_str()),
                ("tl", request.target.as_str()),
                ("dt", "t"),
                ("q", request.text.as_str()),
            ],
        )
        .map_err(|e| TranslateError::Request(e.to_string()))
    }
}

impl Default for GoogleTranslator {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Translator for GoogleTranslator {
    fn translate(&self, request: &TranslationRequest) -> Result<String, TranslateError> {
        let url = Self::request_url(request)?;
        let client = super::http_client(self.timeout).map_err(|e| TranslateError::Request(e.to_string()))?;
        let response = client.get(url).send().map_err(map_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TranslateError::Status(status.to_string()));
        }
        let body: Value = response.json().map_err(map_reqwest)?;
        parse_translation(&body)
    }
}

fn map_reqwest(e: reqwest::Error) -> TranslateError {
    if e.is_timeout() {
        TranslateError::Timeout
    } else {
        TranslateError::Request(e.to_string())
    }
}

/// Join the translated chunks in `body[0][*][0]`.
pub fn parse_translation(body: &Value) -> Result<String, TranslateError> {
    let chunks = body
        .get(0)
        .and_then(Value::as_array)
        .ok_or(TranslateError::InvalidResponse)?;
    let text: String = chunks
        .iter()
        .filter_map(|chunk| chunk.get(0).and_then(Value::as_str))
        .collect();
    if text.is_empty() {
        return Err(TranslateError::InvalidResponse);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn joins_sentence_chunks() {
        let body = json!([[["Hola. ", "Hello. ", null], ["Adiós.", "Goodbye.", null]], null, "en"]);
        assert_eq!(parse_translation(&body).unwrap(), "Hola. Adiós.");
    }

    #[test]
    fn rejects_unexpected_shapes() {
        assert!(matches!(parse_translation(&json!({"error": 1})), Err(TranslateError::InvalidResponse)));
        assert!(matches!(parse_translation(&json!([[]])), Err(TranslateError::InvalidResponse)));
    }

    #[test]
    fn builds_query_url() {
        let request = TranslationRequest::new("good morning", "auto", "zh-CN");
        let url = GoogleTranslator::request_url(&request).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("sl".into(), "auto".into())));
        assert!(pairs.contains(&("tl".into(), "zh-CN".into())));
        assert!(pairs.contains(&("q".into(), "good morning".into())));
        assert_eq!(url.host_str(), Some("translate.googleapis.com"));
    }
}
