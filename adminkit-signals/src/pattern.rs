//! Signal name patterns.
//!
//! Signal names are colon-delimited (`domain:action`, `domain:action:sub`).
//! Subscriptions may use three wildcard forms: a prefix (`books:*`), a
//! suffix (`*:created`), or the catch-all `**`.

/// A parsed subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalPattern {
    /// Matches one name exactly.
    Exact(String),
    /// `books:*` — matches any name starting with `books:`.
    Prefix(String),
    /// `*:created` — matches any name ending with `:created`.
    Suffix(String),
    /// `**` — matches every name.
    All,
}

impl SignalPattern {
    /// Parse a subscription string into a pattern.
    pub fn parse(raw: &str) -> Self {
        if raw == "**" {
            return SignalPattern::All;
        }
        if let Some(prefix) = raw.strip_suffix(":*") {
            return SignalPattern::Prefix(format!("{prefix}:"));
        }
        if let Some(suffix) = raw.strip_prefix("*:") {
            return SignalPattern::Suffix(format!(":{suffix}"));
        }
        SignalPattern::Exact(raw.to_string())
    }

    /// Does this pattern match the emitted name?
    pub fn matches(&self, name: &str) -> bool {
        match self {
            SignalPattern::Exact(exact) => name == exact,
            SignalPattern::Prefix(prefix) => name.starts_with(prefix),
            SignalPattern::Suffix(suffix) => name.ends_with(suffix),
            SignalPattern::All => true,
        }
    }
}
