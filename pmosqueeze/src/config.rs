//! Player configuration and the processing-mode mini-language.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer};

use crate::errors::ControllerError;

/// How 24-bit PCM is presented to players that cannot take it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum L24Format {
    /// Truncate to 16 bits in transcoded modes.
    #[default]
    Trunc16,
    /// Truncate to 16 bits for raw PCM mimetypes too.
    Trunc16Pcm,
    /// Pass 24-bit samples through untouched.
    Pass,
}

fn mac_from_string<'de, D>(d: D) -> Result<[u8; 6], D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(d)?;
    parse_mac(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid MAC address '{}'", s)))
}

/// Parse `aa:bb:cc:dd:ee:ff` (or `-` separated).
pub fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = s.split(|c| c == ':' || c == '-');
    for byte in mac.iter_mut() {
        *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(mac)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlayerConfig {
    /// Server address (`host` or `host:port`), or `?` to auto-discover.
    pub server: String,
    /// Processing mode string, e.g. `flc:5,r:-48000,flow`.
    pub mode: String,
    /// Maximum sample rate advertised to and accepted from the server.
    pub sample_rate: u32,
    /// Comma-separated codec list for the capability string.
    pub codecs: String,
    #[serde(deserialize_with = "mac_from_string")]
    pub mac: [u8; 6],
    pub send_icy: bool,
    /// Raw PCM container preference: `wav`, `aif`, or both.
    pub raw_audio_format: String,
    pub l24_format: L24Format,
    pub outputbuf_size: usize,
    /// Advertised content length for the bridge stream (negative values
    /// select chunked/open-ended encodings; passed through to the output).
    pub stream_length: i64,
    pub name: String,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        PlayerConfig {
            server: "?".to_string(),
            mode: "thru".to_string(),
            sample_rate: 44100,
            codecs: "flc,pcm,mp3,aac,ogg".to_string(),
            mac: [0x02, 0x00, 0x00, 0x00, 0x00, 0x01],
            send_icy: false,
            raw_audio_format: "wav".to_string(),
            l24_format: L24Format::default(),
            outputbuf_size: 4 * 1024 * 1024,
            stream_length: -3,
            name: "SqueezeLite".to_string(),
        }
    }
}

impl PlayerConfig {
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ControllerError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }
}

/// Re-encoding selected by the mode string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodeMode {
    #[default]
    Thru,
    Pcm,
    Flac,
    Mp3,
}

/// Parsed form of [`PlayerConfig::mode`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ModeSpec {
    pub mode: EncodeMode,
    /// Flow only applies to re-encoding modes; with `thru` it is dropped.
    pub flow: bool,
    /// `r:` parameter; positive forces a rate, negative caps it, 0 unset.
    pub rate: i32,
    /// `s:` parameter; 0 unset.
    pub sample_size: u8,
    /// `flac:` compression level.
    pub flac_level: Option<u8>,
    /// `mp3:` bitrate in kbit/s.
    pub mp3_bitrate: Option<u16>,
    /// True when the string named no known mode and fell back to `thru`.
    pub rewritten: bool,
}

impl ModeSpec {
    pub fn parse(s: &str) -> ModeSpec {
        let lower = s.to_ascii_lowercase();
        let mut spec = ModeSpec::default();

        if lower.contains("pcm") {
            spec.mode = EncodeMode::Pcm;
        } else if lower.contains("flc") {
            spec.mode = EncodeMode::Flac;
        } else if lower.contains("mp3") {
            spec.mode = EncodeMode::Mp3;
        } else {
            spec.mode = EncodeMode::Thru;
            spec.rewritten = !lower.contains("thru");
        }

        spec.flow = spec.mode != EncodeMode::Thru && lower.contains("flow");
        spec.rate = param(&lower, "r:").unwrap_or(0);
        spec.sample_size = param(&lower, "s:").unwrap_or(0).clamp(0, 32) as u8;
        spec.flac_level = param(&lower, "flac:").map(|v| v.clamp(0, 255) as u8);
        spec.mp3_bitrate = param(&lower, "mp3:").map(|v| v.clamp(0, 65535) as u16);
        spec
    }
}

/// Numeric parameter following `key` in the mode string, sign included.
fn param(s: &str, key: &str) -> Option<i32> {
    let at = s.find(key)? + key.len();
    let rest = &s[at..];
    let end = rest
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && *c == '-')))
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}
