use serde::{Deserialize, Serialize};

use crate::DomainPolicy;

/// Ordered hops from the starting URL (first) to the terminal URL (last).
///
/// A chain is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<String>", try_from = "Vec<String>")]
pub struct RedirectChain {
    hops: Vec<String>,
}

impl RedirectChain {
    pub fn new(start: impl Into<String>) -> Self {
        Self {
            hops: vec![start.into()],
        }
    }

    pub fn push(&mut self, hop: impl Into<String>) {
        self.hops.push(hop.into());
    }

    /// Appends `url` unless it already is the terminal hop.
    pub fn extend_to(&mut self, url: &str) {
        if self.terminal() != url {
            self.push(url);
        }
    }

    pub fn start(&self) -> &str {
        &self.hops[0]
    }

    pub fn terminal(&self) -> &str {
        &self.hops[self.hops.len() - 1]
    }

    pub fn hops(&self) -> &[String] {
        &self.hops
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.hops.iter().any(|hop| hop == url)
    }

    /// Drops a trailing run of bot-protection hops so the terminal URL is the
    /// last real destination. If every hop is on the list only the start is kept.
    pub fn walk_back(mut self, policy: &DomainPolicy) -> Self {
        if !policy.is_bot_protection(self.terminal()) {
            return self;
        }
        let keep = self
            .hops
            .iter()
            .rposition(|hop| !policy.is_bot_protection(hop))
            .unwrap_or(0);
        self.hops.truncate(keep + 1);
        self
    }
}

impl From<RedirectChain> for Vec<String> {
    fn from(chain: RedirectChain) -> Self {
        chain.hops
    }
}

impl TryFrom<Vec<String>> for RedirectChain {
    type Error = &'static str;

    fn try_from(hops: Vec<String>) -> Result<Self, Self::Error> {
        if hops.is_empty() {
            return Err("redirect chain must contain at least one hop");
        }
        Ok(Self { hops })
    }
}
