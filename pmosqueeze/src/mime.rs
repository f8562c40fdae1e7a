//! Mime-type negotiation between the codec byte of the protocol and what
//! the downstream renderer accepts.

use once_cell::sync::Lazy;

/// Mimetypes a generic UPnP-class renderer is assumed to accept when the
/// embedder supplies no list of its own.
static DEFAULT_MIMETYPES: Lazy<Vec<String>> = Lazy::new(|| {
    [
        "audio/flac",
        "audio/x-flac",
        "audio/mpeg",
        "audio/mp3",
        "audio/aac",
        "audio/mp4",
        "audio/ogg",
        "audio/wav",
        "audio/x-wav",
        "audio/aiff",
        "audio/x-aiff",
        "audio/L16",
        "audio/L24",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
});

/// Lookup of renderer-acceptable mimetypes for a codec or PCM layout.
pub trait MimeRegistry: Send {
    /// Best mimetype for a compressed codec byte (`f`, `m`, `a`, `o`,
    /// ...). For raw PCM (`p`) the `raw_format` container preference
    /// (`wav`/`aif`) decides.
    fn find_mimetype(&self, codec: u8, raw_format: Option<&str>) -> Option<String>;

    /// Parameterized PCM mimetype (`audio/Lxx;rate=..;channels=..`).
    /// `sample_size` may be lowered (24 → 16) to match what the renderer
    /// takes, hence the `&mut`.
    fn find_pcm_mimetype(
        &self,
        sample_size: &mut u8,
        trunc16_pcm: bool,
        sample_rate: u32,
        channels: u8,
        raw_format: &str,
    ) -> Option<String>;

    /// Container letter for a mimetype (`w` wav, `i` aiff, `f` flac, ...).
    fn mimetype_to_format(&self, mimetype: &str) -> u8;

    /// File extension used in the bridge URL.
    fn mimetype_to_ext(&self, mimetype: &str) -> &'static str;
}

/// Registry backed by a plain list of acceptable mimetypes.
pub struct StdMimeRegistry {
    supported: Vec<String>,
}

impl StdMimeRegistry {
    pub fn new(supported: Vec<String>) -> Self {
        StdMimeRegistry { supported }
    }

    fn accepts(&self, mimetype: &str) -> bool {
        self.supported.iter().any(|m| m.eq_ignore_ascii_case(mimetype))
    }

    fn first_accepted(&self, candidates: &[&str]) -> Option<String> {
        candidates
            .iter()
            .find(|c| self.accepts(c))
            .map(|c| c.to_string())
    }
}

impl Default for StdMimeRegistry {
    fn default() -> Self {
        StdMimeRegistry::new(DEFAULT_MIMETYPES.clone())
    }
}

impl MimeRegistry for StdMimeRegistry {
    fn find_mimetype(&self, codec: u8, raw_format: Option<&str>) -> Option<String> {
        match codec {
            b'f' => self.first_accepted(&["audio/flac", "audio/x-flac"]),
            b'm' => self.first_accepted(&["audio/mp3", "audio/mpeg"]),
            b'a' => self.first_accepted(&["audio/aac", "audio/mp4"]),
            b'l' => self.first_accepted(&["audio/mp4", "audio/m4a"]),
            b'o' => self.first_accepted(&["audio/ogg"]),
            b'w' => self.first_accepted(&["audio/x-ms-wma"]),
            b'p' => {
                let pref = raw_format.unwrap_or("wav");
                let mut candidates: Vec<&str> = Vec::new();
                if pref.contains("wav") {
                    candidates.extend(["audio/wav", "audio/x-wav"]);
                }
                if pref.contains("aif") {
                    candidates.extend(["audio/aiff", "audio/x-aiff"]);
                }
                self.first_accepted(&candidates)
            }
            _ => None,
        }
    }

    fn find_pcm_mimetype(
        &self,
        sample_size: &mut u8,
        trunc16_pcm: bool,
        sample_rate: u32,
        channels: u8,
        raw_format: &str,
    ) -> Option<String> {
        if *sample_size == 24 && trunc16_pcm {
            *sample_size = 16;
        }

        let base = format!("audio/L{}", sample_size);
        if self.accepts(&base) {
            return Some(format!("{};rate={};channels={}", base, sample_rate, channels));
        }
        // renderers refusing 24-bit raw audio still usually take 16
        if *sample_size == 24 && self.accepts("audio/L16") {
            *sample_size = 16;
            return Some(format!("audio/L16;rate={};channels={}", sample_rate, channels));
        }

        self.find_mimetype(b'p', Some(raw_format))
    }

    fn mimetype_to_format(&self, mimetype: &str) -> u8 {
        let m = mimetype.to_ascii_lowercase();
        if m.contains("wav") {
            b'w'
        } else if m.contains("aiff") {
            b'i'
        } else if m.contains("flac") {
            b'f'
        } else if m.contains("mp3") || m.contains("mpeg") {
            b'm'
        } else if m.contains("aac") || m.contains("mp4") {
            b'a'
        } else if m.contains("ogg") {
            b'o'
        } else if m.starts_with("audio/l") {
            b'p'
        } else {
            b'*'
        }
    }

    fn mimetype_to_ext(&self, mimetype: &str) -> &'static str {
        match self.mimetype_to_format(mimetype) {
            b'w' => "wav",
            b'i' => "aif",
            b'f' => "flac",
            b'm' => "mp3",
            b'a' => "aac",
            b'o' => "ogg",
            b'p' => "pcm",
            _ => "bin",
        }
    }
}
