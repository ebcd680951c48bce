//! Hierarchical identities for descriptors.
//!
//! A [`UniqueId`] is an ordered path of typed [`Segment`]s, for example
//! `[engine:canopy]/[suite:parser]/[case:empty_input]`. The first segment of an
//! engine tree is always of type `engine`.
//!
//! # String Form
//!
//! Segments are rendered as `[type:value]` and joined with `/`. The reserved
//! characters `[`, `]`, `:`, `/` and `%` are percent-encoded inside types and
//! values so that [`UniqueId::parse`] can always recover the original id.

use core::fmt;
use core::str::FromStr;

/// Segment type used for the root segment of an engine tree.
pub const ENGINE_SEGMENT_TYPE: &str = "engine";

/// Errors that can occur while parsing a [`UniqueId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UniqueIdError {
    /// The input was empty or whitespace only.
    #[error("unique id must not be blank")]
    Blank,

    /// A segment was not of the form `[type:value]`.
    #[error("malformed segment '{segment}' in unique id '{input}'")]
    MalformedSegment {
        /// The full input being parsed.
        input: String,
        /// The offending segment.
        segment: String,
    },

    /// A percent-escape did not decode to a reserved character.
    #[error("invalid escape sequence '{escape}' in unique id '{input}'")]
    InvalidEscape {
        /// The full input being parsed.
        input: String,
        /// The offending escape sequence.
        escape: String,
    },
}

/// A single typed segment of a [`UniqueId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Segment {
    segment_type: String,
    value: String,
}

impl Segment {
    /// Creates a new segment.
    ///
    /// Blank types or values are accepted here but rejected by [`UniqueId::parse`];
    /// callers building ids programmatically are expected to pass meaningful names.
    #[must_use]
    pub fn new(segment_type: impl Into<String>, value: impl Into<String>) -> Self {
        let segment = Self {
            segment_type: segment_type.into(),
            value: value.into(),
        };
        debug_assert!(
            !segment.segment_type.trim().is_empty(),
            "segment type must not be blank"
        );
        debug_assert!(
            !segment.value.trim().is_empty(),
            "segment value must not be blank"
        );
        segment
    }

    /// Returns the segment type, e.g. `engine` or `case`.
    #[must_use]
    pub fn segment_type(&self) -> &str {
        &self.segment_type
    }

    /// Returns the segment value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}]", encode(&self.segment_type), encode(&self.value))
    }
}

/// Unique, hierarchical identity of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UniqueId {
    segments: Vec<Segment>,
}

impl UniqueId {
    /// Creates the root id of an engine tree: `[engine:<engine_id>]`.
    #[must_use]
    pub fn for_engine(engine_id: impl Into<String>) -> Self {
        Self::root(ENGINE_SEGMENT_TYPE, engine_id)
    }

    /// Creates a single-segment id with an arbitrary segment type.
    #[must_use]
    pub fn root(segment_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            segments: vec![Segment::new(segment_type, value)],
        }
    }

    /// Parses the string form produced by [`Display`](fmt::Display).
    ///
    /// # Errors
    ///
    /// Returns [`UniqueIdError`] if the input is blank, a segment is not of the
    /// form `[type:value]`, or an escape sequence is invalid.
    pub fn parse(input: &str) -> Result<Self, UniqueIdError> {
        if input.trim().is_empty() {
            return Err(UniqueIdError::Blank);
        }

        let segments = input
            .split('/')
            .map(|raw| parse_segment(input, raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { segments })
    }

    /// Returns a new id with `segment_type:value` appended.
    #[must_use]
    pub fn append(&self, segment_type: impl Into<String>, value: impl Into<String>) -> Self {
        self.append_segment(Segment::new(segment_type, value))
    }

    /// Returns a new id with `segment` appended.
    #[must_use]
    pub fn append_segment(&self, segment: Segment) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.extend(self.segments.iter().cloned());
        segments.push(segment);
        Self { segments }
    }

    /// Returns the engine id if the root segment is of type `engine`.
    #[must_use]
    pub fn engine_id(&self) -> Option<&str> {
        self.segments
            .first()
            .filter(|segment| segment.segment_type == ENGINE_SEGMENT_TYPE)
            .map(Segment::value)
    }

    /// Returns all segments in order, root first.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns the last (innermost) segment.
    #[must_use]
    pub fn last_segment(&self) -> &Segment {
        // `segments` is never empty: every constructor creates at least one.
        &self.segments[self.segments.len() - 1]
    }

    /// Returns the id of the parent, or `None` for a single-segment id.
    #[must_use]
    pub fn remove_last_segment(&self) -> Option<Self> {
        (self.segments.len() > 1).then(|| Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Returns `true` if `prefix` is equal to, or an ancestor of, this id.
    #[must_use]
    pub fn has_prefix(&self, prefix: &UniqueId) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments.len()
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, segment) in self.segments.iter().enumerate() {
            if index > 0 {
                f.write_str("/")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for UniqueId {
    type Err = UniqueIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_segment(input: &str, raw: &str) -> Result<Segment, UniqueIdError> {
    let malformed = || UniqueIdError::MalformedSegment {
        input: input.to_owned(),
        segment: raw.to_owned(),
    };

    let inner = raw
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(malformed)?;
    let (segment_type, value) = inner.split_once(':').ok_or_else(malformed)?;
    if segment_type.trim().is_empty() || value.trim().is_empty() {
        return Err(malformed());
    }

    Ok(Segment {
        segment_type: decode(input, segment_type)?,
        value: decode(input, value)?,
    })
}

fn encode(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => encoded.push_str("%25"),
            '[' => encoded.push_str("%5B"),
            ']' => encoded.push_str("%5D"),
            ':' => encoded.push_str("%3A"),
            '/' => encoded.push_str("%2F"),
            other => encoded.push(other),
        }
    }
    encoded
}

fn decode(input: &str, raw: &str) -> Result<String, UniqueIdError> {
    let mut decoded = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find('%') {
        decoded.push_str(&rest[..pos]);
        let escape = rest.get(pos..pos + 3).unwrap_or(&rest[pos..]);
        let c = match escape.to_ascii_uppercase().as_str() {
            "%25" => '%',
            "%5B" => '[',
            "%5D" => ']',
            "%3A" => ':',
            "%2F" => '/',
            _ => {
                return Err(UniqueIdError::InvalidEscape {
                    input: input.to_owned(),
                    escape: escape.to_owned(),
                });
            }
        };
        decoded.push(c);
        rest = &rest[pos + escape.len()..];
    }
    decoded.push_str(rest);
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_root_has_engine_id() {
        let id = UniqueId::for_engine("canopy");
        assert_eq!(id.engine_id(), Some("canopy"));
        assert_eq!(id.to_string(), "[engine:canopy]");
    }

    #[test]
    fn non_engine_root_has_no_engine_id() {
        let id = UniqueId::root("suite", "parser");
        assert_eq!(id.engine_id(), None);
    }

    #[test]
    fn append_builds_nested_path() {
        let id = UniqueId::for_engine("canopy")
            .append("suite", "parser")
            .append("case", "empty_input");

        assert_eq!(id.depth(), 3);
        assert_eq!(id.last_segment().segment_type(), "case");
        assert_eq!(id.last_segment().value(), "empty_input");
        assert_eq!(
            id.to_string(),
            "[engine:canopy]/[suite:parser]/[case:empty_input]"
        );
    }

    #[test]
    fn prefix_relationship() {
        let engine = UniqueId::for_engine("canopy");
        let suite = engine.append("suite", "a");
        let case = suite.append("case", "b");

        assert!(case.has_prefix(&engine));
        assert!(case.has_prefix(&suite));
        assert!(case.has_prefix(&case));
        assert!(!suite.has_prefix(&case));
        assert!(!case.has_prefix(&UniqueId::for_engine("other")));
    }

    #[test]
    fn remove_last_segment_returns_parent() {
        let suite = UniqueId::for_engine("canopy").append("suite", "a");
        assert_eq!(
            suite.remove_last_segment(),
            Some(UniqueId::for_engine("canopy"))
        );
        assert_eq!(UniqueId::for_engine("canopy").remove_last_segment(), None);
    }

    #[test]
    fn parse_recovers_reserved_characters() {
        let id = UniqueId::for_engine("canopy")
            .append("suite", "a/b")
            .append("case", "[x:y] 100%");

        let rendered = id.to_string();
        assert_eq!(
            rendered,
            "[engine:canopy]/[suite:a%2Fb]/[case:%5Bx%3Ay%5D 100%25]"
        );
        assert_eq!(UniqueId::parse(&rendered), Ok(id));
    }

    #[test]
    fn parse_rejects_blank_input() {
        assert_eq!(UniqueId::parse("  "), Err(UniqueIdError::Blank));
    }

    #[test]
    fn parse_rejects_malformed_segments() {
        for input in ["engine:canopy", "[engine]", "[engine:canopy]/", "[:x]"] {
            assert!(
                matches!(
                    UniqueId::parse(input),
                    Err(UniqueIdError::MalformedSegment { .. })
                ),
                "expected malformed segment for {input:?}"
            );
        }
    }

    #[test]
    fn parse_rejects_unknown_escape() {
        let err = UniqueId::parse("[engine:a%41]").unwrap_err();
        assert!(matches!(err, UniqueIdError::InvalidEscape { ref escape, .. } if escape == "%41"));
    }

    #[test]
    fn from_str_delegates_to_parse() {
        let id: UniqueId = "[engine:canopy]/[case:one]".parse().unwrap();
        assert_eq!(id, UniqueId::for_engine("canopy").append("case", "one"));
    }
}
