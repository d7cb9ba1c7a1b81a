// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Topic names and wildcard filters.
//!
//! Topics are dotted hierarchical names (`metrics.cpu.core0`). Filters are
//! topic patterns where a segment may be `*` (exactly one segment) or a
//! trailing `>` (zero or more remaining segments). A filter is compiled once
//! and matched against pre-split topic segments on the hot path.

use crate::error::{Error, Result};

/// Maximum length of a topic string, in bytes.
pub const MAX_TOPIC_LEN: usize = 250;

/// Maximum length of a single segment, in bytes.
pub const MAX_SEGMENT_LEN: usize = 128;

/// Segment separator.
pub const SEPARATOR: char = '.';

/// Split and validate a topic string into its segments.
///
/// Rules:
/// - total length 1..=250 bytes
/// - each segment at most 128 bytes
/// - a segment longer than one character may not contain `*` or `>`
///
/// The split is lossless: joining the returned segments with `.` yields the
/// input unchanged.
pub fn split_topic(topic: &str) -> Result<Vec<&str>> {
    if topic.is_empty() {
        return Err(Error::MalformedTopic("empty topic".into()));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(Error::MalformedTopic(format!(
            "topic is {} bytes, limit is {}",
            topic.len(),
            MAX_TOPIC_LEN
        )));
    }

    let segments: Vec<&str> = topic.split(SEPARATOR).collect();
    for seg in &segments {
        if seg.len() > MAX_SEGMENT_LEN {
            return Err(Error::MalformedTopic(format!(
                "segment is {} bytes, limit is {}",
                seg.len(),
                MAX_SEGMENT_LEN
            )));
        }
        if seg.len() > 1 && (seg.contains('*') || seg.contains('>')) {
            return Err(Error::MalformedTopic(format!(
                "wildcard inside literal segment '{}'",
                seg
            )));
        }
    }

    Ok(segments)
}

/// One compiled filter segment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FilterSegment {
    /// Matches a subject segment byte-for-byte.
    Literal(String),
    /// `*` - matches exactly one subject segment.
    AnyOne,
    /// `>` - matches zero or more remaining subject segments.
    /// Only valid as the final segment.
    AnyRest,
}

/// A compiled topic filter. Immutable after construction.
///
/// # Example
///
/// ```rust
/// use mbus::TopicFilter;
///
/// let f = TopicFilter::new("metrics.*.load").unwrap();
/// assert!(f.matches_topic("metrics.cpu.load").unwrap());
/// assert!(!f.matches_topic("metrics.cpu.temp").unwrap());
///
/// let f = TopicFilter::new("metrics.>").unwrap();
/// assert!(f.matches_topic("metrics.cpu.core0.load").unwrap());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    pattern: String,
    segments: Vec<FilterSegment>,
}

impl TopicFilter {
    /// Compile a filter from a pattern string.
    ///
    /// The pattern obeys the same segmenter rules as a topic; additionally,
    /// `>` may only appear as the final segment.
    pub fn new(pattern: &str) -> Result<Self> {
        let raw = split_topic(pattern)?;
        let last = raw.len() - 1;

        let mut segments = Vec::with_capacity(raw.len());
        for (i, seg) in raw.iter().enumerate() {
            let compiled = match *seg {
                "*" => FilterSegment::AnyOne,
                ">" => {
                    if i != last {
                        return Err(Error::MalformedTopic(
                            "'>' is only valid as the final segment".into(),
                        ));
                    }
                    FilterSegment::AnyRest
                }
                literal => FilterSegment::Literal(literal.to_string()),
            };
            segments.push(compiled);
        }

        Ok(Self {
            pattern: pattern.to_string(),
            segments,
        })
    }

    /// The original pattern string.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Match against pre-split subject segments.
    ///
    /// `>` matches zero or more remaining segments, so `a.>` matches both
    /// `a` and `a.b.c`.
    pub fn matches(&self, subject: &[&str]) -> bool {
        let mut i = 0;
        for seg in &self.segments {
            match seg {
                FilterSegment::AnyRest => return true,
                FilterSegment::AnyOne => {
                    if i >= subject.len() {
                        return false;
                    }
                }
                FilterSegment::Literal(lit) => {
                    if i >= subject.len() || subject[i] != lit {
                        return false;
                    }
                }
            }
            i += 1;
        }
        i == subject.len()
    }

    /// Convenience: split `topic` and match.
    ///
    /// Returns `Err` when the subject itself is malformed.
    pub fn matches_topic(&self, topic: &str) -> Result<bool> {
        let segments = split_topic(topic)?;
        Ok(self.matches(&segments))
    }
}
