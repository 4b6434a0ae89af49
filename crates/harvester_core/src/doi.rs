use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::InputError;

const DOI_RESOLVER: &str = "https://doi.org/";

static DOI_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"10\.\d+/\S+").expect("doi pattern compiles"));

/// Extracts the first `10.<registrant>/<suffix>` DOI found in `text`.
///
/// The result is lowercased with NUL bytes stripped; `None` if no DOI occurs.
pub fn normalize_doi(text: &str) -> Option<String> {
    let lowered = text.trim().to_lowercase();
    DOI_PATTERN
        .find(&lowered)
        .map(|doi| doi.as_str().replace('\0', ""))
}

/// Turns caller input into the absolute URL a harvest starts from.
///
/// Bare DOIs (`10.1234/x`, `doi:10.1234/x`) become `https://doi.org/` links;
/// anything else must already be an http(s) URL.
pub fn source_url(input: &str) -> Result<String, InputError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(InputError::Empty);
    }

    let bare = trimmed
        .strip_prefix("doi:")
        .or_else(|| trimmed.strip_prefix("DOI:"))
        .unwrap_or(trimmed)
        .trim();
    let candidate = if bare.starts_with("10.") {
        let doi = normalize_doi(bare).ok_or_else(|| InputError::InvalidUrl {
            input: trimmed.to_string(),
            reason: "malformed DOI".to_string(),
        })?;
        // `#` and `?` inside a DOI belong to the path.
        let escaped = doi.replace('#', "%23").replace('?', "%3F");
        format!("{DOI_RESOLVER}{escaped}")
    } else {
        trimmed.to_string()
    };

    let parsed = Url::parse(&candidate).map_err(|err| InputError::InvalidUrl {
        input: trimmed.to_string(),
        reason: err.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed.to_string()),
        other => Err(InputError::UnsupportedScheme(other.to_string())),
    }
}
