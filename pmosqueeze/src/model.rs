//! Playback state shared between the controller and its collaborators.
//!
//! Three lock domains, sampled in this order by the status ticker: the
//! stream domain (HTTP reader state + stream ring buffer), the output
//! domain (renderer state + output ring buffer + rendering progress), and
//! the decode domain. Each lives behind its own mutex; the ticker never
//! holds two at once.

use std::sync::{Arc, Mutex};

use crate::buffer::StreamBuf;
use crate::config::EncodeMode;

/// State of the HTTP stream reader. Owned by the stream collaborator;
/// the controller only transitions `Disconnect` back to `Stopped` (after
/// reporting it) and `StreamingWait` to `StreamingBuffering` (on `cont`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Stopped,
    Disconnect,
    StreamingWait,
    StreamingBuffering,
    StreamingFile,
    StreamingHttp,
}

impl StreamState {
    /// The stream is done delivering bytes (cleanly or not).
    pub fn ended(self) -> bool {
        matches!(self, StreamState::Stopped | StreamState::Disconnect)
    }

    /// The stream has (or had) an HTTP response worth reporting.
    pub fn has_headers(self) -> bool {
        matches!(
            self,
            StreamState::StreamingHttp | StreamState::StreamingWait | StreamState::StreamingBuffering
        )
    }
}

/// Reason carried by a `DSCO` report, wire value per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisconnectCode {
    #[default]
    Ok = 0,
    LocalDisconnect = 1,
    RemoteDisconnect = 2,
    Unreachable = 3,
    Timeout = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeState {
    #[default]
    Stopped,
    Ready,
    Running,
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputState {
    #[default]
    Stopped,
    /// Paused; waiting for an unpause or a timed start.
    Waiting,
    Running,
}

/// Progress of the downstream renderer (the real player pulling the
/// bridge URL).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderState {
    #[default]
    Stopped,
    Buffering,
    Playing,
}

/// Stream-reader domain. The HTTP header buffer doubles as the ICY
/// metadata hand-off, mirroring the reader's single scratch area.
#[derive(Debug)]
pub struct StreamSt {
    pub state: StreamState,
    pub disconnect: DisconnectCode,
    /// Cumulative bytes received for the current stream.
    pub bytes: u64,
    pub buf: StreamBuf,
    pub header: Vec<u8>,
    pub sent_headers: bool,
    pub meta_send: bool,
    pub meta_interval: u32,
    pub meta_next: u32,
}

impl StreamSt {
    pub fn new(buf_size: usize) -> Self {
        StreamSt {
            state: StreamState::Stopped,
            disconnect: DisconnectCode::Ok,
            bytes: 0,
            buf: StreamBuf::new(buf_size),
            header: Vec::new(),
            sent_headers: false,
            meta_send: false,
            meta_interval: 0,
            meta_next: 0,
        }
    }
}

/// Re-encoding parameters of the output.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodeSt {
    pub mode: EncodeMode,
    pub flow: bool,
    pub sample_rate: u32,
    pub sample_size: u8,
    pub channels: u8,
    /// FLAC compression level or MP3 bitrate, depending on mode.
    pub level: u16,
}

/// ICY push bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct IcySt {
    pub interval: u32,
    /// jiffies of the last metadata refresh.
    pub last: u32,
}

/// Rendering progress reported back from the bridge side.
#[derive(Debug, Clone, Copy)]
pub struct RenderSt {
    pub state: RenderState,
    /// Index of the track currently rendered, -1 before the first one.
    pub index: i32,
    pub ms_played: u32,
    pub duration: u32,
}

impl Default for RenderSt {
    fn default() -> Self {
        RenderSt { state: RenderState::Stopped, index: -1, ms_played: 0, duration: 0 }
    }
}

/// Output domain: everything the renderer side needs, plus the rendering
/// progress (which shares this lock).
#[derive(Debug)]
pub struct OutputSt {
    pub state: OutputState,
    pub buf: StreamBuf,
    pub render: RenderSt,

    /// Monotonic track counter, embedded in the bridge URL.
    pub index: i32,
    pub track_started: bool,
    /// The output side has accepted the whole track.
    pub completed: bool,
    pub remote: bool,
    pub on: bool,

    pub duration: u32,
    pub bitrate: u32,
    pub next_replay_gain: u32,
    pub fade_mode: u8,
    pub fade_secs: u8,
    /// jiffies at which a timed unpause starts.
    pub start_at: u32,

    pub codec: u8,
    pub sample_rate: u32,
    pub sample_size: u8,
    pub channels: u8,
    pub in_endian: u8,
    pub out_endian: bool,
    pub mimetype: String,
    pub format: u8,
    pub length: i64,
    /// TCP port of the bridge HTTP server, set by the embedder.
    pub port: u16,
    /// Selected encode rate; negative caps against the source rate.
    pub supported_rate: i32,

    pub icy: IcySt,
    pub encode: EncodeSt,
}

impl OutputSt {
    pub fn new(buf_size: usize) -> Self {
        OutputSt {
            state: OutputState::Stopped,
            buf: StreamBuf::new(buf_size),
            render: RenderSt::default(),
            index: 0,
            track_started: false,
            completed: false,
            remote: false,
            on: false,
            duration: 0,
            bitrate: 0,
            next_replay_gain: 0,
            fade_mode: 0,
            fade_secs: 0,
            start_at: 0,
            codec: b'?',
            sample_rate: 0,
            sample_size: 0,
            channels: 0,
            in_endian: 0xff,
            out_endian: false,
            mimetype: String::new(),
            format: b'?',
            length: 0,
            port: 0,
            supported_rate: 0,
            icy: IcySt::default(),
            encode: EncodeSt::default(),
        }
    }
}

#[derive(Debug, Default)]
pub struct DecodeSt {
    pub state: DecodeState,
}

/// Snapshot published to the server through `STAT`, refreshed by the
/// status ticker. Owned by the controller thread, no lock.
#[derive(Debug, Clone, Default)]
pub struct PlayerStatus {
    pub stream_full: u32,
    pub stream_size: u32,
    pub stream_bytes: u64,
    pub stream_state: StreamState,
    pub output_full: u32,
    pub output_size: u32,
    pub output_ready: bool,
    pub sample_rate: u32,
    pub duration: u32,
    pub ms_played: u32,
    /// jiffies of the last periodic `STMt`.
    pub last: u32,
}

/// The three lock domains, cloneable for hand-off to collaborators.
#[derive(Clone)]
pub struct SharedState {
    pub stream: Arc<Mutex<StreamSt>>,
    pub output: Arc<Mutex<OutputSt>>,
    pub decode: Arc<Mutex<DecodeSt>>,
}

impl SharedState {
    pub fn new(streambuf_size: usize, outputbuf_size: usize) -> Self {
        SharedState {
            stream: Arc::new(Mutex::new(StreamSt::new(streambuf_size))),
            output: Arc::new(Mutex::new(OutputSt::new(outputbuf_size))),
            decode: Arc::new(Mutex::new(DecodeSt::default())),
        }
    }
}
