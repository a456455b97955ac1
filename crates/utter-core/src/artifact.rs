//! The finalized audio handed to transcription.

use bytes::{Bytes, BytesMut};

/// Immutable encoded audio produced once per session.
///
/// Holds the concatenation of every fragment the encoder emitted plus the
/// encoding tag the encoder reported. Cloning is cheap since the payload is
/// reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioArtifact {
    data: Bytes,
    mime_type: String,
}

impl AudioArtifact {
    pub fn new(data: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Assemble an artifact from encoder fragments, in order. Returns `None`
    /// when the encoder produced no data at all.
    pub fn from_fragments(fragments: Vec<Bytes>, mime_type: impl Into<String>) -> Option<Self> {
        let total: usize = fragments.iter().map(Bytes::len).sum();
        if total == 0 {
            return None;
        }

        // Single fragment is the common case for whole-file encoders.
        let data = if fragments.len() == 1 {
            fragments.into_iter().next().unwrap_or_default()
        } else {
            let mut joined = BytesMut::with_capacity(total);
            for fragment in fragments {
                joined.extend_from_slice(&fragment);
            }
            joined.freeze()
        };

        Some(Self::new(data, mime_type))
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_fragments_is_no_artifact() {
        assert!(AudioArtifact::from_fragments(vec![], "audio/wav").is_none());
        assert!(
            AudioArtifact::from_fragments(vec![Bytes::new(), Bytes::new()], "audio/wav").is_none()
        );
    }

    #[test]
    fn fragments_are_joined_in_order() {
        let artifact = AudioArtifact::from_fragments(
            vec![
                Bytes::from_static(b"RIFF"),
                Bytes::new(),
                Bytes::from_static(b"data"),
            ],
            "audio/wav",
        )
        .unwrap();
        assert_eq!(artifact.len(), 8);
        assert_eq!(artifact.mime_type(), "audio/wav");
        assert_eq!(artifact.into_data().as_ref(), b"RIFFdata");
    }
}
