//! Message chains.
//!
//! The gateway delivers every message as an ordered chain of segments. The
//! first segment of an inbound chain is normally a [`Segment::Source`]
//! carrying the message id and timestamp; content segments follow.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single unit of message content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Segment {
    /// Message metadata. Not content.
    Source { id: i64, time: i64 },
    /// Plain text.
    Plain { text: String },
    /// A mention of another user.
    At {
        target: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display: Option<String>,
    },
    /// An image, by gateway id or by URL.
    Image {
        #[serde(
            default,
            rename = "imageId",
            skip_serializing_if = "Option::is_none"
        )]
        image_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    /// Any segment type the core does not model.
    #[serde(other)]
    Unsupported,
}

impl Segment {
    /// Creates a plain text segment.
    pub fn plain(text: impl Into<String>) -> Self {
        Self::Plain { text: text.into() }
    }

    /// Creates a mention segment.
    pub fn at(target: i64) -> Self {
        Self::At {
            target,
            display: None,
        }
    }

    /// Returns the text if this is a [`Segment::Plain`].
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Plain { text } => Some(text),
            _ => None,
        }
    }

    fn is_blank_text(&self) -> bool {
        self.as_text().is_some_and(|t| t.trim().is_empty())
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source { .. } | Self::Unsupported => Ok(()),
            Self::Plain { text } => f.write_str(text),
            Self::At { target, .. } => write!(f, "@{target}"),
            Self::Image { .. } => f.write_str("[image]"),
        }
    }
}

/// An ordered chain of [`Segment`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message {
    chain: Vec<Segment>,
}

impl Message {
    /// Creates a message from a raw segment chain.
    pub fn from_chain(chain: Vec<Segment>) -> Self {
        Self { chain }
    }

    /// Creates a single-segment text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            chain: vec![Segment::plain(text)],
        }
    }

    /// Appends a segment (builder style).
    pub fn with(mut self, segment: Segment) -> Self {
        self.chain.push(segment);
        self
    }

    /// Returns all segments, including the source segment.
    pub fn segments(&self) -> &[Segment] {
        &self.chain
    }

    /// Returns the number of content segments.
    pub fn len(&self) -> usize {
        self.content().count()
    }

    /// Returns true if the message carries no content.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates the content segments (everything but `Source`).
    pub fn content(&self) -> impl Iterator<Item = &Segment> {
        self.chain
            .iter()
            .filter(|s| !matches!(s, Segment::Source { .. }))
    }

    /// Gateway message id taken from the source segment.
    pub fn source_id(&self) -> Option<i64> {
        self.chain.iter().find_map(|s| match s {
            Segment::Source { id, .. } => Some(*id),
            _ => None,
        })
    }

    /// Gateway timestamp taken from the source segment.
    pub fn time(&self) -> Option<i64> {
        self.chain.iter().find_map(|s| match s {
            Segment::Source { time, .. } => Some(*time),
            _ => None,
        })
    }

    /// Returns the text of the first content segment if it is plain text.
    ///
    /// This is where command prefixes are looked for.
    pub fn first_text(&self) -> Option<&str> {
        self.content().next().and_then(Segment::as_text)
    }

    /// Replaces the text of the first content segment.
    ///
    /// Returns `false` if the first content segment is not plain text.
    pub fn set_first_text(&mut self, text: impl Into<String>) -> bool {
        let first = self
            .chain
            .iter_mut()
            .find(|s| !matches!(s, Segment::Source { .. }));
        match first {
            Some(Segment::Plain { text: current }) => {
                *current = text.into();
                true
            }
            _ => false,
        }
    }

    /// Concatenates the text of every plain text segment.
    pub fn plain_text(&self) -> String {
        self.content().filter_map(Segment::as_text).collect()
    }

    /// Returns the ids of every mentioned user, in order.
    pub fn at_targets(&self) -> Vec<i64> {
        self.content()
            .filter_map(|s| match s {
                Segment::At { target, .. } => Some(*target),
                _ => None,
            })
            .collect()
    }

    /// Returns a copy without blank leading and trailing text segments.
    pub fn strip(&self) -> Message {
        let mut chain: Vec<Segment> = self.content().cloned().collect();
        if chain.first().is_some_and(Segment::is_blank_text) {
            chain.remove(0);
        }
        if chain.last().is_some_and(Segment::is_blank_text) {
            chain.pop();
        }
        Message { chain }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.chain {
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::text(text)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::text(text)
    }
}
