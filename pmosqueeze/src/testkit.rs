//! Recording fakes for the collaborator seams, shared by the unit tests.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::bridge::{Bridge, SqAction};
use crate::config::PlayerConfig;
use crate::context::{CliSlot, PlayerContext, WakeFlag};
use crate::errors::ControllerError;
use crate::metadata::Metadata;
use crate::mime::StdMimeRegistry;
use crate::model::SharedState;
use crate::pipeline::{Collaborators, DecodePipeline, MetadataSource, OutputSink, StreamSource};

pub(crate) type ConnectRecord = (Ipv4Addr, u16, Vec<u8>, usize, bool);

#[derive(Clone, Default)]
pub(crate) struct Recorders {
    pub actions: Arc<Mutex<Vec<SqAction>>>,
    pub connects: Arc<Mutex<Vec<ConnectRecord>>>,
    pub opens: Arc<Mutex<Vec<(u8, u8, u32, u8, u8)>>>,
    pub output_starts: Arc<Mutex<u32>>,
    pub icy_updates: Arc<Mutex<u32>>,
    pub disconnects: Arc<Mutex<u32>>,
    /// Armed when a stream is nominally open; `disconnect` consumes it.
    pub stream_open: Arc<AtomicBool>,
    /// Makes `codec_open` fail, for negotiation-failure tests.
    pub fail_codec_open: Arc<AtomicBool>,
}

struct FakeStream(Recorders);

impl StreamSource for FakeStream {
    fn connect(
        &mut self,
        ip: Ipv4Addr,
        port: u16,
        header: &[u8],
        threshold: usize,
        continue_on_error: bool,
    ) -> Result<(), ControllerError> {
        self.0.stream_open.store(true, Ordering::Relaxed);
        self.0
            .connects
            .lock()
            .unwrap()
            .push((ip, port, header.to_vec(), threshold, continue_on_error));
        Ok(())
    }

    fn disconnect(&mut self) -> bool {
        *self.0.disconnects.lock().unwrap() += 1;
        self.0.stream_open.swap(false, Ordering::Relaxed)
    }
}

struct FakeDecoder(Recorders);

impl DecodePipeline for FakeDecoder {
    fn codec_open(
        &mut self,
        codec: u8,
        sample_size: u8,
        sample_rate: u32,
        channels: u8,
        endianness: u8,
    ) -> Result<(), ControllerError> {
        if self.0.fail_codec_open.load(Ordering::Relaxed) {
            return Err(ControllerError::DecoderOpen(codec as char));
        }
        self.0
            .opens
            .lock()
            .unwrap()
            .push((codec, sample_size, sample_rate, channels, endianness));
        Ok(())
    }

    fn flush(&mut self) {}

    fn supports(&self, name: &str) -> bool {
        matches!(name, "flc" | "pcm" | "mp3" | "aac" | "ogg")
    }
}

struct FakeOutput(Recorders);

impl OutputSink for FakeOutput {
    fn start(&mut self) -> Result<(), ControllerError> {
        *self.0.output_starts.lock().unwrap() += 1;
        Ok(())
    }

    fn flush(&mut self) {}

    fn set_icy(&mut self, _metadata: &Metadata, _force: bool, _now: u32) {
        *self.0.icy_updates.lock().unwrap() += 1;
    }
}

pub(crate) struct FakeMetadata(pub Metadata);

impl MetadataSource for FakeMetadata {
    fn track_metadata(&self, _offset: i32) -> Metadata {
        self.0.clone()
    }
}

struct RecordingBridge(Recorders);

impl Bridge for RecordingBridge {
    fn notify(&mut self, action: SqAction) -> bool {
        self.0.actions.lock().unwrap().push(action);
        true
    }
}

pub(crate) fn test_context() -> (PlayerContext, Recorders) {
    test_context_with(PlayerConfig::default(), Metadata::default())
}

pub(crate) fn test_context_with(
    config: PlayerConfig,
    metadata: Metadata,
) -> (PlayerContext, Recorders) {
    let rec = Recorders::default();
    let collab = Collaborators {
        stream: Box::new(FakeStream(rec.clone())),
        decoder: Box::new(FakeDecoder(rec.clone())),
        output: Box::new(FakeOutput(rec.clone())),
        metadata: Box::new(FakeMetadata(metadata)),
        mimetypes: Box::new(StdMimeRegistry::default()),
        bridge: Box::new(RecordingBridge(rec.clone())),
    };
    let mac = config.mac;
    let ctx = PlayerContext {
        config,
        mac,
        server_ip: Ipv4Addr::new(127, 0, 0, 1),
        server_port: 3483,
        cli_port: 9090,
        server_version: String::new(),
        fixed_cap: String::new(),
        var_cap: String::new(),
        new_server_cap: None,
        new_server: None,
        autostart: 0,
        last_command: 0,
        can_stmdu: false,
        sent_stmu: false,
        sent_stmo: false,
        sent_stml: false,
        sent_stmd: false,
        status: Default::default(),
        shared: SharedState::new(64 * 1024, 256 * 1024),
        collab,
        running: Arc::new(AtomicBool::new(true)),
        wake: Arc::new(WakeFlag::default()),
        cli: Arc::new(CliSlot::default()),
        bridge_host: "127.0.0.1".to_string(),
        server_timeout: Duration::from_secs(35),
    };
    (ctx, rec)
}
