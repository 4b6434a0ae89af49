use std::sync::LazyLock;

use regex::RegexSet;

use crate::decode::decode_text;

/// Phrases and markup fragments that only show up on challenge/interstitial pages.
const SIGNATURES: &[&str] = &[
    r"(?i)verify\s+(that\s+)?you\s+are\s+(a\s+)?human",
    r"(?i)are\s+you\s+a\s+robot",
    r"(?i)<title>\s*robot\s+check\s*</title>",
    r"(?i)<title>\s*just\s+a\s+moment\.\.\.\s*</title>",
    r"(?i)<title>\s*attention\s+required!?\s*\|\s*cloudflare\s*</title>",
    r"(?i)checking\s+(if\s+the\s+site\s+connection\s+is\s+secure|your\s+browser\s+before\s+accessing)",
    r"(?i)cf-browser-verification|cf_chl_opt|/cdn-cgi/challenge-platform/",
    r"(?i)please\s+complete\s+the\s+security\s+check",
    r"(?i)our\s+systems\s+have\s+detected\s+unusual\s+traffic",
    r"(?i)enable\s+javascript\s+and\s+cookies\s+to\s+continue",
    r"(?i)captcha-delivery\.com|px-captcha|perfdrive\.com|shieldsquare",
    r"(?i)request\s+unsuccessful\.\s+incapsula\s+incident\s+id",
    r#"(?i)class=["']g-recaptcha["']|class=["']h-captcha["']"#,
];

static BUILTIN: LazyLock<RegexSet> =
    LazyLock::new(|| RegexSet::new(SIGNATURES).expect("built-in soft-block signatures compile"));

/// Decides whether a successful response body is really a block page.
///
/// Pure and deterministic: the verdict depends only on the input bytes.
#[derive(Debug, Clone)]
pub struct SoftBlockClassifier {
    signatures: RegexSet,
}

impl Default for SoftBlockClassifier {
    fn default() -> Self {
        Self {
            signatures: BUILTIN.clone(),
        }
    }
}

impl SoftBlockClassifier {
    /// Built-in signatures plus caller-supplied regular expressions.
    pub fn with_extra_signatures<I, S>(extra: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns: Vec<String> = SIGNATURES
            .iter()
            .map(|p| p.to_string())
            .chain(extra.into_iter().map(|p| p.as_ref().to_string()))
            .collect();
        Ok(Self {
            signatures: RegexSet::new(patterns)?,
        })
    }

    pub fn is_soft_block(&self, bytes: &[u8]) -> bool {
        let decoded = decode_text(bytes, None);
        self.signatures.is_match(&decoded.text)
    }

    /// The signatures that fired, for logging.
    pub fn matched_signatures(&self, bytes: &[u8]) -> Vec<&str> {
        let decoded = decode_text(bytes, None);
        self.signatures
            .matches(&decoded.text)
            .iter()
            .map(|idx| self.signatures.patterns()[idx].as_str())
            .collect()
    }
}
