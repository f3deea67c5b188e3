//! Request validation utilities.

use reqwest::Url;

use crate::types::{Error, Result};

/// Validate that a string is not empty.
pub fn validate_non_empty(s: &str, field: &str) -> Result<()> {
    if s.trim().is_empty() {
        return Err(Error::validation(format!("{} cannot be empty", field)));
    }
    Ok(())
}

/// Validate a recrawl batch size: at least one url, at most `max`.
pub fn validate_batch_size(count: usize, max: usize) -> Result<()> {
    if count == 0 {
        return Err(Error::validation("urls must contain at least one url"));
    }
    if count > max {
        return Err(Error::TooManyUrls { count, max });
    }
    Ok(())
}

/// Validate that `raw` is an absolute http(s) url and return its normalized form.
pub fn validate_http_url(raw: &str, field: &str) -> Result<String> {
    let url = Url::parse(raw.trim())
        .map_err(|e| Error::validation(format!("{field}: invalid url {raw:?}: {e}")))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url.to_string()),
        _ => Err(Error::validation(format!(
            "{field}: url {raw:?} must be absolute http or https"
        ))),
    }
}
