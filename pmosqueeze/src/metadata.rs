//! Track metadata as supplied by the embedding application.

/// What the controller needs to know about the track it is being handed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Duration in milliseconds; 0 for live streams.
    pub duration: u32,
    pub bitrate: u32,
    pub sample_rate: u32,
    pub sample_size: u8,
    /// True when the source is a network stream rather than a local file.
    pub remote: bool,
}

impl Metadata {
    /// Synthetic metadata for a continuous (flow) stream, where track
    /// boundaries are invisible to the player.
    pub fn live_default() -> Self {
        Metadata {
            title: Some("Streaming from LMS".to_string()),
            artist: None,
            album: None,
            duration: 0,
            bitrate: 0,
            sample_rate: 0,
            sample_size: 0,
            remote: true,
        }
    }
}
