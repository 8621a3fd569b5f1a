use crate::errors::ClientError;

/// Typed events produced by the event-stream decoder.
///
/// A sequence holds zero or more `Chunk`s followed by exactly one of `Done`
/// or `Error`, unless the caller aborted, in which case it simply stops.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// One decoded data frame.
    Chunk {
        /// Text delta of the first choice; `None` when the frame carries no text.
        content_delta: Option<String>,
        /// The full parsed frame.
        raw: serde_json::Value,
    },
    /// Normal end of stream.
    Done,
    /// Abnormal end of stream.
    Error { cause: ClientError },
}

impl StreamEvent {
    /// Returns `true` for `Done` and `Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }

    /// Text delta carried by a `Chunk`.
    pub fn content_delta(&self) -> Option<&str> {
        match self {
            Self::Chunk { content_delta, .. } => content_delta.as_deref(),
            _ => None,
        }
    }

    /// `finish_reason` of the first choice of a `Chunk`, if set.
    pub fn finish_reason(&self) -> Option<&str> {
        match self {
            Self::Chunk { raw, .. } => first_choice(raw)?.get("finish_reason")?.as_str(),
            _ => None,
        }
    }
}

pub(crate) fn first_choice(raw: &serde_json::Value) -> Option<&serde_json::Value> {
    raw.get("choices")?.get(0)
}

/// Reads `choices[0].delta.content`, treating an empty string as absent.
pub(crate) fn extract_content_delta(raw: &serde_json::Value) -> Option<String> {
    first_choice(raw)?
        .get("delta")?
        .get("content")?
        .as_str()
        .filter(|text| !text.is_empty())
        .map(ToOwned::to_owned)
}
