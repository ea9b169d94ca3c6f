//! Channel paths and name pattern matching.
//!
//! A channel path is the ordered list of group names enclosing a module,
//! rendered as a slash-separated string like "instrument/detector/temp".
//! This module provides the path type, positional path segments, and
//! matching of channel names against subscription patterns that may
//! include wildcards.
//!
//! Pattern matching uses simple glob-style matching without regex.

use std::fmt;

/// Separator used when rendering channel paths.
pub const SEPARATOR: char = '/';

/// A channel path made of group names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ChannelPath {
    segments: Vec<String>,
}

impl ChannelPath {
    /// Build a path from its segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for ChannelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", SEPARATOR)?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

/// One step of a positional path: a map key or a sequence index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => f.write_str(key),
            PathSegment::Index(index) => write!(f, "{}", index),
        }
    }
}

/// Render a positional path with the channel separator.
pub fn join_positional(path: &[PathSegment]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("/")
}

/// A segment in a name pattern.
#[derive(Debug, Clone, PartialEq)]
enum PatternSegment {
    /// Exact literal match for this segment
    Literal(String),
    /// Single wildcard (*) - matches exactly one segment when mid-path,
    /// or any suffix when at the end
    Wildcard,
}

/// A subscription pattern over channel names that may contain wildcards.
///
/// Supported patterns:
/// - Exact: "instrument/detector/temp"
/// - Suffix wildcard: "instrument/*"
/// - Mid-path wildcard: "instrument/*/temp"
/// - Full wildcard: "*"
#[derive(Debug, Clone)]
pub struct NamePattern {
    raw: String,
    segments: Vec<PatternSegment>,
    /// True if the pattern ends with a wildcard (matches any suffix)
    trailing_wildcard: bool,
}

impl NamePattern {
    /// Create a new name pattern.
    ///
    /// Pattern syntax:
    /// - `*` at end matches any suffix (e.g., "a/*" matches "a/b/c")
    /// - `*` in middle matches exactly one segment (e.g., "a/*/c")
    /// - `*` alone matches any name
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::EmptyPattern);
        }

        let parts: Vec<&str> = pattern.split(SEPARATOR).collect();
        let trailing_wildcard = parts.last() == Some(&"*");

        let segments = parts
            .iter()
            .map(|&s| {
                if s == "*" {
                    PatternSegment::Wildcard
                } else {
                    PatternSegment::Literal(s.to_string())
                }
            })
            .collect();

        Ok(Self {
            raw: pattern.to_string(),
            segments,
            trailing_wildcard,
        })
    }

    /// Check if a channel name matches this pattern.
    pub fn matches(&self, name: &str) -> bool {
        let parts: Vec<&str> = name.split(SEPARATOR).collect();

        if self.segments.len() == 1 && self.segments[0] == PatternSegment::Wildcard {
            return true;
        }

        if self.trailing_wildcard {
            if parts.len() < self.segments.len() - 1 {
                return false;
            }
        } else if parts.len() != self.segments.len() {
            return false;
        }

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PatternSegment::Literal(lit) => {
                    if i >= parts.len() || parts[i] != lit {
                        return false;
                    }
                }
                PatternSegment::Wildcard => {
                    if self.trailing_wildcard && i == self.segments.len() - 1 {
                        return true;
                    }
                    if i >= parts.len() || parts[i].is_empty() {
                        return false;
                    }
                }
            }
        }

        true
    }

    /// Get the raw pattern string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Errors that can occur when creating a name pattern.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PatternError {
    #[error("Empty pattern")]
    EmptyPattern,
}
