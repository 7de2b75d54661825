//! Permission keys and compiled wildcard matchers.
//!
//! Grammar: `segment(:segment)*` where a segment is `[a-z0-9_-]+` or `*`.
//! Matching semantics (fixed here, documented in the crate root):
//! - a non-final `*` segment matches exactly one query segment,
//! - a final `*` segment matches one or more remaining query segments,
//! - the pattern `*` alone matches every key.

use crate::error::SecurityError;

fn valid_literal(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Any,
}

/// A parsed permission key or grant pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionKey {
    segments: Vec<Segment>,
}

impl PermissionKey {
    /// Parse and validate a key such as `entity:books:delete` or
    /// `entity:*:read`.
    pub fn parse(raw: &str) -> Result<Self, SecurityError> {
        if raw.is_empty() {
            return Err(SecurityError::InvalidKey(raw.to_string()));
        }
        let mut segments = Vec::new();
        for part in raw.split(':') {
            if part == "*" {
                segments.push(Segment::Any);
            } else if valid_literal(part) {
                segments.push(Segment::Literal(part.to_string()));
            } else {
                return Err(SecurityError::InvalidKey(raw.to_string()));
            }
        }
        Ok(Self { segments })
    }

    /// Match this pattern against a concrete (wildcard-free) query key.
    pub fn matches(&self, query: &str) -> bool {
        let query: Vec<&str> = query.split(':').collect();
        // `*` alone is the catch-all.
        if self.segments.len() == 1 && self.segments[0] == Segment::Any {
            return true;
        }
        let trailing_any = matches!(self.segments.last(), Some(Segment::Any));
        if trailing_any {
            // Final `*` swallows one or more segments.
            if query.len() < self.segments.len() {
                return false;
            }
        } else if query.len() != self.segments.len() {
            return false;
        }
        self.segments
            .iter()
            .zip(&query)
            .all(|(segment, part)| match segment {
                Segment::Any => true,
                Segment::Literal(lit) => lit == part,
            })
    }

    pub fn is_concrete(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Literal(_)))
    }
}

impl std::fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<&str> = self
            .segments
            .iter()
            .map(|s| match s {
                Segment::Literal(lit) => lit.as_str(),
                Segment::Any => "*",
            })
            .collect();
        write!(f, "{}", parts.join(":"))
    }
}

/// A set of compiled grant patterns.
#[derive(Debug, Clone, Default)]
pub struct PermissionSet {
    grants: Vec<PermissionKey>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile grant strings, skipping invalid ones with a warning.
    pub fn from_grants<I, S>(grants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for grant in grants {
            match PermissionKey::parse(grant.as_ref()) {
                Ok(key) => set.grants.push(key),
                Err(_) => {
                    tracing::warn!(grant = grant.as_ref(), "skipping malformed permission grant")
                }
            }
        }
        set
    }

    pub fn insert(&mut self, grant: &str) -> Result<(), SecurityError> {
        self.grants.push(PermissionKey::parse(grant)?);
        Ok(())
    }

    pub fn merge(&mut self, other: &PermissionSet) {
        for grant in &other.grants {
            if !self.grants.contains(grant) {
                self.grants.push(grant.clone());
            }
        }
    }

    /// Is the concrete query key granted by any pattern?
    pub fn is_granted(&self, query: &str) -> bool {
        self.grants.iter().any(|g| g.matches(query))
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    /// Grant strings in insertion order.
    pub fn grant_strings(&self) -> Vec<String> {
        self.grants.iter().map(|g| g.to_string()).collect()
    }
}
