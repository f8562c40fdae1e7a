//! Format negotiation on stream start.
//!
//! Maps the coded format/rate/size/channels bytes of a `strm s` (or a
//! follow-up `codc`) to a decoder input and an output mimetype the bridge
//! player accepts, opens the codec, starts the output, and hands the new
//! bridge URL upstream. Returning false means the track is abandoned and
//! the caller reports `STMn`.

use tracing::{info, warn};

use crate::bridge::{SqAction, TrackInfo};
use crate::config::{EncodeMode, L24Format, ModeSpec};
use crate::context::PlayerContext;
use crate::metadata::Metadata;
use crate::util::gettime_ms;

pub(crate) const PCM_SAMPLE_SIZE: [u8; 4] = [8, 16, 24, 32];
pub(crate) const PCM_SAMPLE_RATE: [u32; 15] = [
    11025, 22050, 32000, 44100, 48000, 8000, 12000, 16000, 24000, 96000, 88200, 176400, 192000,
    352800, 384000,
];
pub(crate) const PCM_CHANNELS: [u8; 2] = [1, 2];

/// Decode a `'0'`-based coded index into one of the fixed tables.
fn coded<T: Copy>(table: &[T], byte: u8, base: u8) -> Option<T> {
    (byte as usize)
        .checked_sub(base as usize)
        .and_then(|i| table.get(i))
        .copied()
}

pub fn start_track(
    format: u8,
    rate: u8,
    size: u8,
    channels: u8,
    endianness: u8,
    ctx: &mut PlayerContext,
) -> bool {
    let now = gettime_ms();

    // next track index; the offset lets metadata lookup skip over tracks
    // whose start failed and were never rendered
    let offset;
    let was_flow;
    {
        let mut o = ctx.shared.output.lock().unwrap();
        o.index += 1;
        offset = if o.render.index != -1 { o.index - o.render.index } else { 0 };
        let outputbuf_size = ctx.config.outputbuf_size;
        o.buf.resize(outputbuf_size);
        was_flow = o.encode.flow;
    }

    let mut metadata = ctx.collab.metadata.track_metadata(offset);

    // source parameters; AAC variants carry a raw size byte instead of a
    // table index
    let sample_size = if format != b'a' {
        if size != b'?' {
            match coded(&PCM_SAMPLE_SIZE, size, b'0') {
                Some(s) => s,
                None => {
                    warn!("invalid sample size index {:?}", size as char);
                    return false;
                }
            }
        } else {
            0
        }
    } else {
        size
    };
    let mut sample_rate = if rate != b'?' {
        match coded(&PCM_SAMPLE_RATE, rate, b'0') {
            Some(r) => r,
            None => {
                warn!("invalid sample rate index {:?}", rate as char);
                return false;
            }
        }
    } else {
        0
    };
    if sample_rate > ctx.config.sample_rate {
        warn!(
            "sample rate {} error suspected, forcing to {}",
            sample_rate, ctx.config.sample_rate
        );
        sample_rate = ctx.config.sample_rate;
    }
    let channels_n = if channels != b'?' {
        match coded(&PCM_CHANNELS, channels, b'1') {
            Some(c) => c,
            None => {
                warn!("invalid channels index {:?}", channels as char);
                return false;
            }
        }
    } else {
        0
    };
    let in_endian = if endianness != b'?' { endianness.wrapping_sub(b'0') } else { 0xff };

    {
        let mut o = ctx.shared.output.lock().unwrap();
        o.completed = false;
        o.duration = metadata.duration;
        o.bitrate = metadata.bitrate;
        o.remote = metadata.remote;
        o.sample_size = sample_size;
        o.sample_rate = sample_rate;
        o.channels = channels_n;
        o.in_endian = in_endian;
        o.codec = format;
    }

    // an active flow has fixed everything already; just rearm the codec
    if was_flow {
        return ctx
            .collab
            .decoder
            .codec_open(format, sample_size, sample_rate, channels_n, in_endian)
            .is_ok();
    }

    let spec = ModeSpec::parse(&ctx.config.mode);
    if spec.rewritten {
        // keep a stable default for the rest of the session
        ctx.config.mode = "thru".to_string();
    }

    let mut enc_rate: i32 = spec.rate;
    let mut enc_size: u8 = spec.sample_size;

    if ctx.config.send_icy && metadata.duration == 0 {
        ctx.collab.output.set_icy(&metadata, true, now);
    }

    if spec.flow {
        if ctx.config.send_icy {
            ctx.collab.output.set_icy(&metadata, true, now);
        }
        metadata = Metadata::live_default();
        // a continuous stream needs every encode parameter pinned
        if enc_rate <= 0 {
            enc_rate = 44100;
        }
        if enc_size == 0 {
            enc_size = 16;
        }
        let mut o = ctx.shared.output.lock().unwrap();
        o.encode.channels = 2;
        o.encode.flow = true;
    } else {
        let mut o = ctx.shared.output.lock().unwrap();
        o.encode.channels = 0;
    }

    // encode rate: explicit r: wins, negative r: caps the source rate,
    // otherwise follow the source
    let supported_rate: i32 = if enc_rate > 0 {
        enc_rate
    } else if enc_rate < 0 {
        if sample_rate != 0 {
            (sample_rate as i32).min(-enc_rate)
        } else {
            enc_rate
        }
    } else {
        sample_rate as i32
    };
    let encode_rate = supported_rate.max(0) as u32;

    let trunc16 = ctx.config.l24_format == L24Format::Trunc16;
    let trunc16_pcm = ctx.config.l24_format == L24Format::Trunc16Pcm;
    let raw_format = ctx.config.raw_audio_format.clone();

    let mut codec = format;
    let mut enc_mode = spec.mode;
    let mut enc_level: u16 = 0;
    let mut supported_rate = supported_rate;
    let mut encode_rate = encode_rate;

    let mimetype: Option<String> = if enc_mode == EncodeMode::Thru
        || (enc_mode == EncodeMode::Pcm && codec == b'p')
    {
        if enc_mode == EncodeMode::Thru && !ctx.shared.output.lock().unwrap().buf.is_empty() {
            warn!("output buffer should be empty on a pass-through start");
        }
        if codec == b'p' {
            if enc_size == 0 {
                enc_size = if sample_size == 24 && trunc16 { 16 } else { sample_size };
            }
            enc_mode = EncodeMode::Pcm;
            ctx.collab.mimetypes.find_pcm_mimetype(
                &mut enc_size,
                trunc16_pcm,
                encode_rate,
                channels_n,
                &raw_format,
            )
        } else {
            let m = ctx.collab.mimetypes.find_mimetype(codec, None);
            // container-matched FLAC keeps its framing; anything else is
            // opaque pass-through
            codec = if codec == b'f' { b'c' } else { b'*' };
            m
        }
    } else if enc_mode == EncodeMode::Pcm {
        if encode_rate != 0 && enc_size != 0 {
            ctx.collab.mimetypes.find_pcm_mimetype(
                &mut enc_size,
                trunc16_pcm,
                encode_rate,
                2,
                &raw_format,
            )
        } else if (metadata.sample_size != 0 || enc_size != 0)
            && (metadata.sample_rate != 0 || encode_rate != 0 || supported_rate != 0)
        {
            // derive from the source, but return a generic mimetype so a
            // later exact rate does not contradict it
            let mut probe_size = if enc_size != 0 { enc_size } else { metadata.sample_size };
            let probe_rate = if encode_rate != 0 {
                encode_rate
            } else if supported_rate < 0 {
                (-supported_rate) as u32
            } else {
                metadata.sample_rate
            };
            let m = ctx.collab.mimetypes.find_pcm_mimetype(
                &mut probe_size,
                trunc16_pcm,
                probe_rate,
                2,
                &raw_format,
            );
            m.map(|m| if m.contains("audio/L") { "*".to_string() } else { m })
        } else {
            ctx.collab.mimetypes.find_mimetype(b'p', Some(&raw_format))
        }
    } else if enc_mode == EncodeMode::Flac {
        if sample_size > 24 {
            enc_size = 24;
        }
        enc_level = match spec.flac_level {
            Some(l) if l <= 9 => l as u16,
            Some(_) => 0,
            None => 0,
        };
        ctx.collab.mimetypes.find_mimetype(b'f', None)
    } else {
        // MP3 tops out at 48 kHz and 320 kbit/s
        enc_size = 16;
        if supported_rate == 0 || supported_rate < -48000 {
            supported_rate = -48000;
        } else if supported_rate > 48000 {
            supported_rate = 48000;
            encode_rate = 48000;
        }
        enc_level = spec.mp3_bitrate.map(|b| b.min(320)).unwrap_or(128);
        ctx.collab.mimetypes.find_mimetype(b'm', None)
    };

    let Some(mimetype) = mimetype else {
        return false;
    };

    let (index, port) = {
        let mut o = ctx.shared.output.lock().unwrap();
        o.codec = codec;
        o.mimetype = mimetype.clone();
        o.format = ctx.collab.mimetypes.mimetype_to_format(&mimetype);
        o.out_endian = o.format == b'w';
        o.length = ctx.config.stream_length;
        o.supported_rate = supported_rate;
        o.encode.mode = enc_mode;
        o.encode.sample_rate = encode_rate;
        o.encode.sample_size = enc_size;
        o.encode.level = enc_level;
        (o.index, o.port)
    };

    if ctx
        .collab
        .decoder
        .codec_open(codec, sample_size, sample_rate, channels_n, in_endian)
        .is_err()
    {
        return false;
    }
    if ctx.collab.output.start().is_err() {
        return false;
    }

    let ext = ctx.collab.mimetypes.mimetype_to_ext(&mimetype);
    let uri = format!("http://{}:{}/bridge-{}.{}", ctx.bridge_host, port, index, ext);
    info!(
        "track {}: codec {} ch {} s {} r {} -> {} ({})",
        index, codec as char, channels_n, sample_size, sample_rate, mimetype, uri
    );

    ctx.collab.bridge.notify(SqAction::SetTrack(TrackInfo {
        uri,
        mimetype,
        offset,
        metadata,
    }))
}
