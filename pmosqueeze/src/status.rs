//! The playback status machine.
//!
//! [`survey`] runs on every controller wake and at least every 100 ms. It
//! samples the stream, output and decode domains in that order — each lock
//! released before the next is taken — updates the [`PlayerStatus`]
//! snapshot and the one-shot latches, and returns the status messages to
//! emit. Sending happens in the caller, after every lock is dropped.
//!
//! The ordering rules are the whole point: `STMs` must precede any
//! `STMd`/`STMu`/`STMo` for the same track, `STMd` is held back on remote
//! sources until the track is nearly drained, and every message here fires
//! at most once per track.

use tracing::{debug, warn};

use crate::context::PlayerContext;
use crate::metadata::Metadata;
use crate::model::{DecodeState, DisconnectCode, OutputState, RenderState, StreamState};
use crate::util::gettime_ms;

/// Remote sources are asked for the next track only this close (in ms) to
/// the end of the current one, so they do not idle out mid-buffer.
pub const STREAM_DELAY: u32 = 15_000;

/// Cadence of ICY metadata refreshes while output is running.
pub const ICY_UPDATE_TIME: u32 = 5_000;

/// Idle CLI sockets are closed after this many ms.
const CLI_IDLE_TIME: u32 = 10_000;

/// A status message due for the server, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusMsg {
    Dsco(DisconnectCode),
    Stat([u8; 4]),
    Resp(Vec<u8>),
    Meta(Vec<u8>),
}

/// Sample all three domains and decide what to report.
pub fn survey(ctx: &mut PlayerContext, now: u32) -> Vec<StatusMsg> {
    let mut send_dsco = false;
    let mut send_resp = false;
    let mut send_meta = false;
    let mut send_stms = false;
    let mut send_stmt = false;
    let mut send_stml = false;
    let mut send_stmd = false;
    let mut send_stmu = false;
    let mut send_stmo = false;
    let mut send_stmn = false;
    let mut fire_play = false;
    let mut stream_disconnect = false;

    let disconnect_code;
    let mut header = Vec::new();

    // stream domain
    {
        let mut s = ctx.shared.stream.lock().unwrap();

        ctx.status.stream_full = s.buf.used() as u32;
        ctx.status.stream_size = s.buf.size() as u32;
        ctx.status.stream_bytes = s.bytes;
        ctx.status.stream_state = s.state;
        disconnect_code = s.disconnect;

        if s.state == StreamState::Disconnect {
            s.state = StreamState::Stopped;
            send_dsco = true;
        }

        if !s.sent_headers && s.state.has_headers() {
            header = s.header.clone();
            s.sent_headers = true;
            send_resp = true;
        }
        if s.meta_send {
            header = s.header.clone();
            s.meta_send = false;
            send_meta = true;
        }
    }

    let flow;
    let remote;

    // output domain
    {
        let mut o = ctx.shared.output.lock().unwrap();

        // the bridge player does its own buffering; report half-full
        // while a track is in flight
        ctx.status.output_full = if ctx.sent_stmu { 0 } else { (o.buf.size() / 2) as u32 };
        ctx.status.output_size = o.buf.size() as u32;
        ctx.status.sample_rate = o.sample_rate;
        ctx.status.output_ready = o.completed || o.encode.flow;
        ctx.status.duration = o.render.duration;
        ctx.status.ms_played = o.render.ms_played;
        flow = o.encode.flow;
        remote = o.remote;

        // streaming properly started
        if o.track_started {
            send_stms = true;
            ctx.can_stmdu = true;
            o.track_started = false;
        }

        // streaming failed; wait for the output side to end and move on
        if ctx.status.stream_bytes == 0 && o.completed && o.state == OutputState::Running {
            warn!("nothing received on stream, abandoning track");
            o.render.state = RenderState::Stopped;
            ctx.can_stmdu = true;
            send_stmn = true;
        }

        // normal end of track with underrun
        if o.state == OutputState::Running
            && !ctx.sent_stmu
            && ctx.status.output_ready
            && ctx.status.stream_state.ended()
            && o.render.state == RenderState::Stopped
            && ctx.can_stmdu
        {
            send_stmu = true;
            ctx.sent_stmu = true;
            ctx.status.output_full = 0;
            o.encode.flow = false;
            o.state = OutputState::Stopped;
        }

        // the source still has data to give: report an overrun instead
        if o.state == OutputState::Running
            && !ctx.sent_stmo
            && ctx.status.stream_state == StreamState::StreamingHttp
            && o.render.state == RenderState::Stopped
            && ctx.can_stmdu
        {
            send_stmo = true;
            ctx.sent_stmo = true;
            o.state = OutputState::Stopped;
        }
    }

    // decode domain
    {
        let mut d = ctx.shared.decode.lock().unwrap();

        if d.state == DecodeState::Running && now.wrapping_sub(ctx.status.last) > 1000 {
            send_stmt = true;
            ctx.status.last = now;
        }

        let delivering = matches!(
            ctx.status.stream_state,
            StreamState::StreamingHttp | StreamState::StreamingFile
        ) || (ctx.status.stream_state == StreamState::Disconnect
            && disconnect_code == DisconnectCode::Ok);

        if delivering && !ctx.sent_stml && d.state == DecodeState::Ready {
            match ctx.autostart {
                0 => {
                    d.state = DecodeState::Running;
                    send_stml = true;
                    ctx.sent_stml = true;
                }
                1 => {
                    d.state = DecodeState::Running;
                    // the server will not wait for STMl; release output now
                    let mut o = ctx.shared.output.lock().unwrap();
                    o.state = OutputState::Running;
                }
                // autostart 2 and 3 need a cont first
                _ => {}
            }
            fire_play = true;
        }

        // Hold STMd until the player has taken the whole track (output
        // drained and STMs seen, so a short track cannot report done
        // before it reports started). Remote sources additionally wait
        // toward the end of the track, or they would idle out while the
        // bridge drains its buffer. Flow streams are player-regulated and
        // never wait.
        if (d.state == DecodeState::Complete
            && ctx.can_stmdu
            && ctx.status.output_ready
            && (flow
                || !remote
                || (ctx.status.duration != 0
                    && ctx.status.duration.wrapping_sub(ctx.status.ms_played) < STREAM_DELAY)))
            || d.state == DecodeState::Error
        {
            if d.state == DecodeState::Complete {
                send_stmd = true;
                ctx.sent_stmd = true;
            } else {
                send_stmn = true;
            }
            d.state = DecodeState::Stopped;
            if matches!(
                ctx.status.stream_state,
                StreamState::StreamingHttp | StreamState::StreamingFile
            ) {
                stream_disconnect = true;
            }
        }
    }

    if fire_play {
        ctx.collab.bridge.notify(crate::bridge::SqAction::Play);
    }
    if stream_disconnect {
        ctx.collab.stream.disconnect();
    }

    // fixed emission order
    let mut msgs = Vec::new();
    if send_dsco {
        msgs.push(StatusMsg::Dsco(disconnect_code));
    }
    if send_stms {
        msgs.push(StatusMsg::Stat(*b"STMs"));
    }
    if send_stmt {
        msgs.push(StatusMsg::Stat(*b"STMt"));
    }
    if send_stml {
        msgs.push(StatusMsg::Stat(*b"STMl"));
    }
    if send_stmd {
        msgs.push(StatusMsg::Stat(*b"STMd"));
    }
    if send_stmu {
        msgs.push(StatusMsg::Stat(*b"STMu"));
    }
    if send_stmo {
        msgs.push(StatusMsg::Stat(*b"STMo"));
    }
    if send_stmn {
        msgs.push(StatusMsg::Stat(*b"STMn"));
    }
    if send_resp {
        msgs.push(StatusMsg::Resp(header.clone()));
    }
    if send_meta {
        msgs.push(StatusMsg::Meta(header));
    }
    msgs
}

/// Refresh the ICY metadata injected into the bridge stream, at most every
/// [`ICY_UPDATE_TIME`] ms while output is running.
pub fn icy_refresh(ctx: &mut PlayerContext, now: u32) {
    if !ctx.config.send_icy {
        return;
    }
    let due = {
        let mut o = ctx.shared.output.lock().unwrap();
        if o.state == OutputState::Running
            && o.icy.interval != 0
            && now.wrapping_sub(o.icy.last) > ICY_UPDATE_TIME
        {
            o.icy.last = now;
            true
        } else {
            false
        }
    };
    if due {
        let metadata: Metadata = ctx.collab.metadata.track_metadata(0);
        ctx.collab.output.set_icy(&metadata, false, now);
    }
}

/// Close the CLI sidechannel socket after 10 s without activity. Uses a
/// try-lock: if the CLI user is mid-request we skip this round.
pub fn close_idle_cli(ctx: &PlayerContext) {
    let now = gettime_ms();
    if now.wrapping_sub(ctx.cli.last_activity.load()) <= CLI_IDLE_TIME {
        return;
    }
    if let Ok(mut slot) = ctx.cli.sock.try_lock() {
        if let Some(sock) = slot.take() {
            debug!("closing idle CLI socket");
            drop(sock);
        }
    }
}
