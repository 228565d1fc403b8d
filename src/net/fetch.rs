use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Result of fetching a page.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub html: String,
    pub url: String,
    pub status: u16,
    pub content_type: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Add `https://` when `input` carries no scheme.
pub fn normalize_url(input: &str) -> Result<Url, FetchError> {
    let input = input.trim();
    let url = if input.starts_with("http://") || input.starts_with("https://") {
        input.to_string()
    } else {
        format!("https://{}", input)
    };
    Ok(Url::parse(&url)?)
}

/// Fetch a page's HTML (blocking).
pub fn fetch_page(url: &str) -> Result<FetchResult, FetchError> {
    let parsed = normalize_url(url)?;
    let client = super::http_client(Duration::from_secs(15))?;

    let response = client
        .get(parsed.as_str())
        .header(
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        )
        .send()?;

    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("text/html")
        .to_string();
    let final_url = response.url().to_string();
    let html = response.text()?;
    log::info!("fetched {} ({} bytes, status {})", final_url, html.len(), status);

    Ok(FetchResult {
        html,
        url: final_url,
        status,
        content_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_missing_scheme() {
        assert_eq!(normalize_url("example.com/a").unwrap().as_str(), "https://example.com/a");
        assert_eq!(normalize_url("http://example.com/").unwrap().as_str(), "http://example.com/");
        assert!(normalize_url("https://").is_err());
    }
}
