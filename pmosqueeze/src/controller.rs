//! The per-player controller task.
//!
//! One thread per virtual player: discover the server, keep the TCP
//! control channel alive, pump frames through the opcode dispatcher, and
//! run the status ticker between frames. Collaborator callbacks and
//! packet sends always happen with no domain lock held.

use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpStream, ToSocketAddrs};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use pmoslim::inbound::{
    AudePacket, AudgPacket, CodcPacket, ContPacket, ServPacket, SetdPacket, StrmPacket,
};
use pmoslim::outbound::{Dsco, Helo, Meta, Resp, SetdName, Stat};
use pmoslim::{
    discover, send_packet, FrameEvent, FrameReader, ServerMessage, SlimError, BASE_CAP,
    SLIMPROTO_PORT,
};

use crate::bridge::SqAction;
use crate::caps;
use crate::config::PlayerConfig;
use crate::context::{CliSlot, PlayerContext, WakeFlag};
use crate::errors::ControllerError;
use crate::model::{OutputState, SharedState, StreamState};
use crate::negotiate;
use crate::pipeline::Collaborators;
use crate::status::{self, StatusMsg};
use crate::util::{gettime_ms, guess_local_ip};

/// Longest HTTP request header accepted in a `strm s`.
pub const MAX_HEADER: usize = 4096;

/// Player names are capped at this many bytes.
const NAME_LEN: usize = 255;

const STREAMBUF_SIZE: usize = 2 * 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_DELAY: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_millis(100);
const SERVER_TIMEOUT: Duration = Duration::from_secs(35);
const TICK_MS: u32 = 100;

/// Handle on a running controller; closing joins the thread.
pub struct PlayerHandle {
    running: Arc<AtomicBool>,
    wake: Arc<WakeFlag>,
    shared: SharedState,
    cli: Arc<CliSlot>,
    thread: Option<JoinHandle<()>>,
}

impl PlayerHandle {
    /// Nudge the controller out of its poll; collaborators call this when
    /// a domain state changes.
    pub fn wake(&self) {
        self.wake.set();
    }

    pub fn shared(&self) -> &SharedState {
        &self.shared
    }

    pub fn cli(&self) -> &Arc<CliSlot> {
        &self.cli
    }

    pub fn close(&mut self) {
        self.running.store(false, std::sync::atomic::Ordering::Relaxed);
        self.wake.set();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for PlayerHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Start the controller task for one player.
pub fn spawn(
    config: PlayerConfig,
    collab: Collaborators,
) -> Result<PlayerHandle, ControllerError> {
    let running = Arc::new(AtomicBool::new(true));
    let wake = Arc::new(WakeFlag::default());
    let cli = Arc::new(CliSlot::default());
    let shared = SharedState::new(STREAMBUF_SIZE, config.outputbuf_size);
    let fixed_cap = caps::fixed_cap(&config, collab.decoder.as_ref());
    let mac = config.mac;
    let name = config.name.clone();

    let ctx = PlayerContext {
        config,
        mac,
        server_ip: Ipv4Addr::UNSPECIFIED,
        server_port: SLIMPROTO_PORT,
        cli_port: pmoslim::DEFAULT_CLI_PORT,
        server_version: String::new(),
        fixed_cap,
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
        shared: shared.clone(),
        collab,
        running: running.clone(),
        wake: wake.clone(),
        cli: cli.clone(),
        bridge_host: guess_local_ip(),
        server_timeout: SERVER_TIMEOUT,
    };

    let thread = thread::Builder::new()
        .name(format!("slimproto-{}", name))
        .spawn(move || run(ctx))?;

    info!("slimproto controller started for {}", name);
    Ok(PlayerHandle { running, wake, shared, cli, thread: Some(thread) })
}

/// Resolve the configured server string (`host` or `host:port`).
fn configured_server(server: &str) -> Option<SocketAddrV4> {
    if server == "?" {
        return None;
    }
    let (host, port) = match server.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => (host, port),
            Err(_) => (server, SLIMPROTO_PORT),
        },
        None => (server, SLIMPROTO_PORT),
    };
    match (host, port).to_socket_addrs() {
        Ok(addrs) => addrs.into_iter().find_map(|a| match a {
            SocketAddr::V4(v4) => Some(v4),
            _ => None,
        }),
        Err(e) => {
            warn!("cannot resolve configured server '{}': {}", server, e);
            None
        }
    }
}

/// Connection manager: discovery, connect/retry, HELO, then the receive
/// loop; round and round until shutdown.
fn run(mut ctx: PlayerContext) {
    let mut target = configured_server(&ctx.config.server);

    let mut server = match discover(target, &ctx.running) {
        Ok(Some(server)) => server,
        Ok(None) => return,
        Err(e) => {
            error!("server discovery failed: {}", e);
            return;
        }
    };
    info!("connecting to {}:{}", server.ip, server.port);

    let mut reconnect = false;
    let mut failed_connect = 0u32;

    while ctx.running() {
        if let Some(ip) = ctx.new_server.take() {
            reconnect = false;
            target = Some(SocketAddrV4::new(ip, SLIMPROTO_PORT));
            match discover(target, &ctx.running) {
                Ok(Some(s)) => {
                    server = s;
                    info!("switching server to {}:{}", server.ip, server.port);
                }
                _ => break,
            }
        }

        ctx.server_ip = server.ip;
        ctx.server_port = server.port;
        ctx.cli_port = server.cli_port;
        ctx.server_version = server.version.clone();

        let addr = SocketAddr::V4(SocketAddrV4::new(server.ip, server.port));
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Err(e) => {
                failed_connect += 1;
                warn!("unable to connect to server ({}): {}", failed_connect, e);
                thread::sleep(RETRY_DELAY);

                // rediscover if the server was not pinned at startup
                if ctx.config.server == "?" && failed_connect > 5 {
                    match discover(None, &ctx.running) {
                        Ok(Some(s)) => {
                            server = s;
                            failed_connect = 0;
                        }
                        _ => break,
                    }
                }
            }
            Ok(mut sock) => {
                info!("connected");
                failed_connect = 0;
                if let Err(e) = sock.set_read_timeout(Some(READ_TIMEOUT)) {
                    warn!("cannot set control socket timeout: {}", e);
                }

                // a sync-group cap from a server switch rides along once
                ctx.var_cap = ctx.new_server_cap.take().unwrap_or_default();
                let capabilities = format!("{}{}{}", BASE_CAP, ctx.fixed_cap, ctx.var_cap);
                info!("cap: {}", capabilities);
                send_packet(
                    &mut sock,
                    &Helo {
                        reconnect,
                        mac: ctx.mac,
                        bytes_received: ctx.status.stream_bytes,
                        capabilities: &capabilities,
                    }
                    .encode(),
                );

                session(&mut ctx, &mut sock);

                reconnect = true;
                thread::sleep(Duration::from_millis(100));
            }
        }

        if let Ok(mut slot) = ctx.cli.sock.lock() {
            slot.take();
        }
    }

    info!("slimproto controller stopped");
}

/// Receive pump and status ticker for one control connection. Returns
/// when the connection dies, a server switch is requested, or the
/// controller shuts down.
fn session(ctx: &mut PlayerContext, sock: &mut TcpStream) {
    let mut reader = FrameReader::new();
    let mut last_frame = Instant::now();
    let mut last_tick = gettime_ms();

    while ctx.running() && ctx.new_server.is_none() {
        match reader.poll_frame(sock) {
            Ok(FrameEvent::Frame(payload)) => {
                last_frame = Instant::now();
                dispatch(ctx, sock, &payload);
            }
            Ok(FrameEvent::Pending) => {}
            Ok(FrameEvent::Closed) => {
                warn!("error reading from control socket: closed");
                return;
            }
            Err(SlimError::FrameTooBig(n)) => {
                error!("FATAL: slimproto frame too big: {}", n);
                return;
            }
            Err(e) => {
                warn!("error reading from control socket: {}", e);
                return;
            }
        }

        // LMS talks every few seconds; mysqueezebox.com every 30
        if last_frame.elapsed() > ctx.server_timeout {
            warn!("no messages from server - connection dead");
            return;
        }

        status::close_idle_cli(ctx);

        let now = gettime_ms();
        status::icy_refresh(ctx, now);

        let wake = ctx.wake.take();
        if wake || now.wrapping_sub(last_tick) > TICK_MS {
            last_tick = now;
            for msg in status::survey(ctx, now) {
                emit(ctx, sock, msg);
            }
        }
    }
}

fn emit<W: Write>(ctx: &mut PlayerContext, w: &mut W, msg: StatusMsg) {
    match msg {
        StatusMsg::Dsco(code) => {
            debug!("DSCO: {:?}", code);
            send_packet(w, &Dsco { reason: code as u8 }.encode());
        }
        StatusMsg::Stat(event) => send_stat(ctx, w, event, [0; 4]),
        StatusMsg::Resp(headers) => {
            debug!("RESP");
            send_packet(w, &Resp { headers: &headers }.encode());
        }
        StatusMsg::Meta(meta) => {
            debug!("META");
            send_packet(w, &Meta { meta: &meta }.encode());
        }
    }
}

fn send_stat<W: Write>(
    ctx: &mut PlayerContext,
    w: &mut W,
    event: [u8; 4],
    server_timestamp: [u8; 4],
) {
    let stat = Stat {
        event,
        stream_buffer_size: ctx.status.stream_size,
        stream_buffer_fullness: ctx.status.stream_full,
        bytes_received: ctx.status.stream_bytes,
        jiffies: gettime_ms(),
        output_buffer_size: ctx.status.output_size,
        output_buffer_fullness: ctx.status.output_full,
        elapsed_seconds: ctx.status.ms_played / 1000,
        elapsed_milliseconds: ctx.status.ms_played,
        server_timestamp,
    };
    let event_name = String::from_utf8_lossy(&event).into_owned();
    if event == *b"STMt" {
        debug!("STAT: [{}] msplayed {}", event_name, ctx.status.ms_played);
    } else {
        info!("STAT: [{}] msplayed {}", event_name, ctx.status.ms_played);
    }
    send_packet(w, &stat.encode());
}

/// Decode one frame and run its handler to completion.
pub(crate) fn dispatch<W: Write>(ctx: &mut PlayerContext, w: &mut W, payload: &[u8]) {
    match ServerMessage::decode(payload) {
        Ok(ServerMessage::Strm(strm)) => handle_strm(ctx, w, strm),
        Ok(ServerMessage::Cont(cont)) => handle_cont(ctx, cont),
        Ok(ServerMessage::Codc(codc)) => handle_codc(ctx, w, codc),
        Ok(ServerMessage::Aude(aude)) => handle_aude(ctx, aude),
        Ok(ServerMessage::Audg(audg)) => handle_audg(ctx, audg),
        Ok(ServerMessage::Setd(setd)) => handle_setd(ctx, w, setd),
        Ok(ServerMessage::Serv(serv)) => handle_serv(ctx, serv),
        Ok(ServerMessage::Ledc) => debug!("ledc"),
        Ok(ServerMessage::Vers(version)) => debug!("server version {}", version),
        Ok(ServerMessage::Unknown(opcode)) => {
            warn!("unhandled {}", String::from_utf8_lossy(&opcode));
        }
        Err(e) => warn!("dropping undecodable frame: {}", e),
    }
}

fn handle_strm<W: Write>(ctx: &mut PlayerContext, w: &mut W, strm: StrmPacket) {
    if strm.command != b't' && strm.command != b'q' {
        info!("strm command {}", strm.command as char);
    } else {
        debug!("strm command {}", strm.command as char);
    }

    match strm.command {
        b't' => {
            // the timestamp rides back untouched
            send_stat(ctx, w, *b"STMt", strm.replay_gain);
        }
        b'f' => {
            ctx.collab.decoder.flush();
            ctx.collab.output.flush();
            ctx.collab.stream.disconnect();
            ctx.status.ms_played = 0;
            send_stat(ctx, w, *b"STMf", [0; 4]);
            ctx.shared.stream.lock().unwrap().buf.flush();
        }
        b'q' => {
            ctx.collab.decoder.flush();
            ctx.collab.output.flush();
            ctx.status.ms_played = 0;
            if ctx.collab.stream.disconnect() {
                send_stat(ctx, w, *b"STMf", [0; 4]);
            }
            ctx.shared.stream.lock().unwrap().buf.flush();
            if ctx.last_command != b'q' {
                ctx.collab.bridge.notify(SqAction::Stop);
            }
        }
        b'p' => {
            let interval = strm.replay_gain_u32();
            info!("pause (interval: {})", interval);
            if interval == 0 {
                ctx.shared.output.lock().unwrap().state = OutputState::Waiting;
                ctx.collab.bridge.notify(SqAction::Pause);
                send_stat(ctx, w, *b"STMp", [0; 4]);
            }
            // a delayed pause is not honored, only logged
        }
        b'a' => {
            info!("skip ahead interval (ignored): {}", strm.replay_gain_u32());
        }
        b'u' => {
            let jiffies = strm.replay_gain_u32();
            info!("unpause at: {} now: {}", jiffies, gettime_ms());
            ctx.collab.bridge.notify(SqAction::Unpause);
            {
                let mut o = ctx.shared.output.lock().unwrap();
                o.state = OutputState::Running;
                o.start_at = jiffies;
            }
            send_stat(ctx, w, *b"STMr", [0; 4]);
        }
        b's' => handle_strm_start(ctx, w, &strm),
        other => warn!("unhandled strm {}", other as char),
    }

    ctx.last_command = strm.command;
}

fn handle_strm_start<W: Write>(ctx: &mut PlayerContext, w: &mut W, strm: &StrmPacket) {
    let ip = if strm.server_ip.is_unspecified() { ctx.server_ip } else { strm.server_ip };
    let port = strm.server_port;

    info!(
        "strm s autostart: {} transition period: {} transition type: {} codec: {}",
        strm.autostart as char,
        strm.transition_period,
        strm.transition_type.wrapping_sub(b'0'),
        strm.format as char
    );

    ctx.autostart = strm.autostart.wrapping_sub(b'0');
    send_stat(ctx, w, *b"STMf", [0; 4]);

    if strm.header.len() > MAX_HEADER - 1 {
        warn!("header too long: {}", strm.header.len());
        return;
    }

    {
        let mut o = ctx.shared.output.lock().unwrap();
        o.next_replay_gain = strm.replay_gain_u32();
        o.fade_mode = strm.transition_type.wrapping_sub(b'0');
        o.fade_secs = strm.transition_period;
        debug!("set fade mode: {}", o.fade_mode);
    }

    ctx.reset_latches();

    if strm.format != b'?' {
        let ok = negotiate::start_track(
            strm.format,
            strm.pcm_sample_rate,
            strm.pcm_sample_size,
            strm.pcm_channels,
            strm.pcm_endianness,
            ctx,
        );
        if !ok {
            error!("no matching codec {}", strm.format as char);
            send_stat(ctx, w, *b"STMn", [0; 4]);
            return;
        }
    } else if ctx.autostart >= 2 {
        // the server will detect the codec from the response headers and
        // follow up with codc
        info!("waiting for codc message");
    } else {
        error!("unknown codec requires autostart >= 2");
        return;
    }

    if let Err(e) = ctx.collab.stream.connect(
        ip,
        port,
        &strm.header,
        strm.threshold as usize * 1024,
        ctx.autostart >= 2,
    ) {
        warn!("stream connect failed: {}", e);
    }
    send_stat(ctx, w, *b"STMc", [0; 4]);
}

fn handle_cont(ctx: &mut PlayerContext, cont: ContPacket) {
    debug!("cont metaint: {} loop: {}", cont.metaint, cont.loop_count);

    if ctx.autostart > 1 {
        ctx.autostart -= 2;
        {
            let mut s = ctx.shared.stream.lock().unwrap();
            if s.state == StreamState::StreamingWait {
                s.state = StreamState::StreamingBuffering;
                s.meta_interval = cont.metaint;
                s.meta_next = cont.metaint;
            }
        }
        ctx.wake.set();
    }
}

fn handle_codc<W: Write>(ctx: &mut PlayerContext, w: &mut W, codc: CodcPacket) {
    let ok = negotiate::start_track(
        codc.format,
        codc.pcm_sample_rate,
        codc.pcm_sample_size,
        codc.pcm_channels,
        codc.pcm_endianness,
        ctx,
    );
    if !ok {
        error!("codc error {}", codc.format as char);
        send_stat(ctx, w, *b"STMn", [0; 4]);
    }
}

fn handle_aude(ctx: &mut PlayerContext, aude: AudePacket) {
    {
        let mut o = ctx.shared.output.lock().unwrap();
        o.on = aude.enable_spdif;
        debug!("on/off using aude {}", o.on);
    }
    ctx.collab.bridge.notify(SqAction::OnOff(aude.enable_spdif));
}

fn handle_audg(ctx: &mut PlayerContext, audg: AudgPacket) {
    debug!(
        "(old) audg gainL: {} gainR: {}",
        audg.old_gain_left, audg.old_gain_right
    );

    // the historical average counts the left gain twice
    let gain = (audg.old_gain_left.wrapping_add(audg.old_gain_left) / 2) as u16;
    if audg.adjust {
        ctx.collab.bridge.notify(SqAction::Volume(gain));
    }
}

fn handle_setd<W: Write>(ctx: &mut PlayerContext, w: &mut W, setd: SetdPacket) {
    // id 0 is the player name: empty payload queries, otherwise sets
    if setd.id != 0 {
        debug!("ignoring setd id {}", setd.id);
        return;
    }
    if setd.payload.is_empty() {
        if !ctx.config.name.is_empty() {
            send_packet(w, &SetdName { name: &ctx.config.name }.encode());
        }
    } else {
        let name = String::from_utf8_lossy(&setd.payload);
        let mut name = name.trim_end_matches('\0').to_string();
        while name.len() > NAME_LEN {
            name.pop();
        }
        debug!("set name: {}", name);
        ctx.config.name = name.clone();
        // confirm the change to the server
        send_packet(w, &SetdName { name: &name }.encode());
        ctx.collab.bridge.notify(SqAction::SetName(name));
    }
}

fn handle_serv(ctx: &mut PlayerContext, serv: ServPacket) {
    info!("switch server to {}", serv.server_ip);

    ctx.new_server = Some(serv.server_ip);
    ctx.new_server_cap = serv.sync_group_id.as_deref().map(caps::sync_group_cap);
    ctx.collab.bridge.notify(SqAction::SetServer(serv.server_ip));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::SqAction;
    use crate::model::DecodeState;
    use crate::testkit::test_context;
    use std::sync::atomic::Ordering;

    /// Split a captured outbound byte stream into (opcode, body) pairs.
    fn sent(buf: &[u8]) -> Vec<(String, Vec<u8>)> {
        let mut out = Vec::new();
        let mut at = 0;
        while at + 8 <= buf.len() {
            let opcode = String::from_utf8_lossy(&buf[at..at + 4]).into_owned();
            let len =
                u32::from_be_bytes(buf[at + 4..at + 8].try_into().unwrap()) as usize;
            out.push((opcode, buf[at + 8..at + 8 + len].to_vec()));
            at += 8 + len;
        }
        assert_eq!(at, buf.len(), "trailing bytes in captured output");
        out
    }

    fn stat_events(packets: &[(String, Vec<u8>)]) -> Vec<String> {
        packets
            .iter()
            .filter(|(op, _)| op == "STAT")
            .map(|(_, body)| String::from_utf8_lossy(&body[0..4]).into_owned())
            .collect()
    }

    fn strm(command: u8, format: u8, autostart: u8) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(b"strm");
        p.push(command);
        p.push(autostart);
        p.push(format);
        p.push(b'1'); // 16 bit
        p.push(b'3'); // 44100 Hz
        p.push(b'2'); // stereo
        p.push(b'1'); // little endian
        p.push(10); // threshold, KB
        p.extend_from_slice(&[0, 0, b'0', 0, 0, 0]);
        p.extend_from_slice(&[0, 0, 0, 0]); // replay gain
        p.extend_from_slice(&9000u16.to_be_bytes());
        p.extend_from_slice(&[0, 0, 0, 0]); // ip 0 -> use control server
        p
    }

    fn strm_with_gain(command: u8, gain: u32) -> Vec<u8> {
        let mut p = strm(command, b'?', b'0');
        p[18..22].copy_from_slice(&gain.to_be_bytes());
        p
    }

    #[test]
    fn stream_start_negotiates_then_connects() {
        let (mut ctx, rec) = test_context();
        ctx.sent_stmu = true; // pretend a previous track ran

        let mut p = strm(b's', b'p', b'1');
        p.extend_from_slice(b"GET /stream.pcm?player=ab HTTP/1.0\r\n\r\n");
        let mut wire = Vec::new();
        dispatch(&mut ctx, &mut wire, &p);

        let packets = sent(&wire);
        assert_eq!(stat_events(&packets), vec!["STMf", "STMc"]);

        let connects = rec.connects.lock().unwrap();
        let (ip, port, header, threshold, continue_on_error) = connects[0].clone();
        assert_eq!(ip, ctx.server_ip); // ip 0 falls back to the control server
        assert_eq!(port, 9000);
        assert_eq!(header, b"GET /stream.pcm?player=ab HTTP/1.0\r\n\r\n");
        assert_eq!(threshold, 10 * 1024);
        assert!(!continue_on_error);

        assert_eq!(
            rec.opens.lock().unwrap().as_slice(),
            &[(b'p', 16, 44100, 2, 1)]
        );

        // every one-shot latch is rearmed
        assert!(!ctx.can_stmdu && !ctx.sent_stmu && !ctx.sent_stmo);
        assert!(!ctx.sent_stml && !ctx.sent_stmd);
        assert_eq!(ctx.autostart, 1);
        assert_eq!(ctx.last_command, b's');
    }

    #[test]
    fn unknown_codec_reports_stmn_without_connecting() {
        let (mut ctx, rec) = test_context();
        let p = strm(b's', b'x', b'1');
        let mut wire = Vec::new();
        dispatch(&mut ctx, &mut wire, &p);

        assert_eq!(stat_events(&sent(&wire)), vec!["STMf", "STMn"]);
        assert!(rec.connects.lock().unwrap().is_empty());
    }

    #[test]
    fn unknown_format_needs_autostart_2() {
        let (mut ctx, rec) = test_context();
        let p = strm(b's', b'?', b'1');
        let mut wire = Vec::new();
        dispatch(&mut ctx, &mut wire, &p);

        // flush is acknowledged, but nothing is connected
        assert_eq!(stat_events(&sent(&wire)), vec!["STMf"]);
        assert!(rec.connects.lock().unwrap().is_empty());

        // with autostart 2 the codec comes later via codc
        let p = strm(b's', b'?', b'2');
        let mut wire = Vec::new();
        dispatch(&mut ctx, &mut wire, &p);
        assert_eq!(stat_events(&sent(&wire)), vec!["STMf", "STMc"]);
        let connects = rec.connects.lock().unwrap();
        assert!(connects[0].4); // continue_on_error
    }

    #[test]
    fn oversize_header_aborts_the_start() {
        let (mut ctx, rec) = test_context();
        let mut p = strm(b's', b'p', b'1');
        p.extend_from_slice(&vec![b'x'; MAX_HEADER]);
        let mut wire = Vec::new();
        dispatch(&mut ctx, &mut wire, &p);

        assert_eq!(stat_events(&sent(&wire)), vec!["STMf"]);
        assert!(rec.connects.lock().unwrap().is_empty());
    }

    #[test]
    fn time_check_echoes_the_server_timestamp() {
        let (mut ctx, _rec) = test_context();
        let p = strm_with_gain(b't', 0xAABBCCDD);
        let mut wire = Vec::new();
        dispatch(&mut ctx, &mut wire, &p);

        let packets = sent(&wire);
        assert_eq!(stat_events(&packets), vec!["STMt"]);
        let body = &packets[0].1;
        assert_eq!(&body[47..51], &[0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn pause_and_unpause() {
        let (mut ctx, rec) = test_context();

        let mut wire = Vec::new();
        dispatch(&mut ctx, &mut wire, &strm_with_gain(b'p', 0));
        assert_eq!(stat_events(&sent(&wire)), vec!["STMp"]);
        assert_eq!(ctx.shared.output.lock().unwrap().state, OutputState::Waiting);

        let mut wire = Vec::new();
        dispatch(&mut ctx, &mut wire, &strm_with_gain(b'u', 12345));
        assert_eq!(stat_events(&sent(&wire)), vec!["STMr"]);
        {
            let o = ctx.shared.output.lock().unwrap();
            assert_eq!(o.state, OutputState::Running);
            assert_eq!(o.start_at, 12345);
        }

        assert_eq!(
            rec.actions.lock().unwrap().as_slice(),
            &[SqAction::Pause, SqAction::Unpause]
        );
    }

    #[test]
    fn delayed_pause_is_ignored() {
        let (mut ctx, rec) = test_context();
        let mut wire = Vec::new();
        dispatch(&mut ctx, &mut wire, &strm_with_gain(b'p', 3000));
        assert!(wire.is_empty());
        assert!(rec.actions.lock().unwrap().is_empty());
        assert_eq!(ctx.shared.output.lock().unwrap().state, OutputState::Stopped);
    }

    /// Two stops in a row must not double the SQ_STOP callback, and the
    /// second flush must not pretend a stream was closed.
    #[test]
    fn stop_is_idempotent() {
        let (mut ctx, rec) = test_context();
        rec.stream_open.store(true, Ordering::Relaxed);

        let mut wire = Vec::new();
        dispatch(&mut ctx, &mut wire, &strm(b'q', b'?', b'0'));
        assert_eq!(stat_events(&sent(&wire)), vec!["STMf"]);

        let mut wire = Vec::new();
        dispatch(&mut ctx, &mut wire, &strm(b'q', b'?', b'0'));
        assert!(stat_events(&sent(&wire)).is_empty());

        let stops = rec
            .actions
            .lock()
            .unwrap()
            .iter()
            .filter(|a| **a == SqAction::Stop)
            .count();
        assert_eq!(stops, 1);
    }

    #[test]
    fn flush_acknowledges_every_time() {
        let (mut ctx, _rec) = test_context();
        for _ in 0..2 {
            let mut wire = Vec::new();
            dispatch(&mut ctx, &mut wire, &strm(b'f', b'?', b'0'));
            assert_eq!(stat_events(&sent(&wire)), vec!["STMf"]);
        }
    }

    #[test]
    fn cont_promotes_autostart_and_unparks_the_stream() {
        let (mut ctx, _rec) = test_context();
        ctx.autostart = 2;
        ctx.shared.stream.lock().unwrap().state = StreamState::StreamingWait;

        let mut p = Vec::new();
        p.extend_from_slice(b"cont");
        p.extend_from_slice(&16000u32.to_be_bytes());
        p.push(0);
        let mut wire = Vec::new();
        dispatch(&mut ctx, &mut wire, &p);

        assert_eq!(ctx.autostart, 0);
        {
            let s = ctx.shared.stream.lock().unwrap();
            assert_eq!(s.state, StreamState::StreamingBuffering);
            assert_eq!(s.meta_interval, 16000);
            assert_eq!(s.meta_next, 16000);
        }
        assert!(ctx.wake.take());
    }

    #[test]
    fn codc_failure_reports_stmn() {
        let (mut ctx, rec) = test_context();
        rec.fail_codec_open.store(true, Ordering::Relaxed);

        let mut p = Vec::new();
        p.extend_from_slice(b"codc");
        p.extend_from_slice(&[b'p', b'1', b'3', b'2', b'1']);
        let mut wire = Vec::new();
        dispatch(&mut ctx, &mut wire, &p);

        assert_eq!(stat_events(&sent(&wire)), vec!["STMn"]);
    }

    #[test]
    fn aude_toggles_power() {
        let (mut ctx, rec) = test_context();
        let mut wire = Vec::new();
        dispatch(&mut ctx, &mut wire, b"aude\x01\x01");
        assert!(ctx.shared.output.lock().unwrap().on);
        assert_eq!(
            rec.actions.lock().unwrap().as_slice(),
            &[SqAction::OnOff(true)]
        );
    }

    #[test]
    fn audg_averages_the_left_gain() {
        let (mut ctx, rec) = test_context();
        let mut p = Vec::new();
        p.extend_from_slice(b"audg");
        p.extend_from_slice(&300u32.to_be_bytes()); // left
        p.extend_from_slice(&100u32.to_be_bytes()); // right, not used
        p.push(1); // adjust
        p.push(0);
        p.extend_from_slice(&0u32.to_be_bytes());
        p.extend_from_slice(&0u32.to_be_bytes());
        let mut wire = Vec::new();
        dispatch(&mut ctx, &mut wire, &p);

        assert_eq!(
            rec.actions.lock().unwrap().as_slice(),
            &[SqAction::Volume(300)]
        );
    }

    #[test]
    fn audg_without_adjust_is_silent() {
        let (mut ctx, rec) = test_context();
        let mut p = Vec::new();
        p.extend_from_slice(b"audg");
        p.extend_from_slice(&300u32.to_be_bytes());
        p.extend_from_slice(&100u32.to_be_bytes());
        p.push(0);
        p.push(0);
        p.extend_from_slice(&0u32.to_be_bytes());
        p.extend_from_slice(&0u32.to_be_bytes());
        let mut wire = Vec::new();
        dispatch(&mut ctx, &mut wire, &p);
        assert!(rec.actions.lock().unwrap().is_empty());
    }

    #[test]
    fn setd_name_query_and_change() {
        let (mut ctx, rec) = test_context();
        ctx.config.name = "Kitchen".to_string();

        let mut wire = Vec::new();
        dispatch(&mut ctx, &mut wire, b"setd\x00");
        let packets = sent(&wire);
        assert_eq!(packets[0].0, "SETD");
        assert_eq!(&packets[0].1, b"\x00Kitchen\x00");

        let mut wire = Vec::new();
        dispatch(&mut ctx, &mut wire, b"setd\x00Salon\x00");
        assert_eq!(ctx.config.name, "Salon");
        let packets = sent(&wire);
        assert_eq!(&packets[0].1, b"\x00Salon\x00");
        assert_eq!(
            rec.actions.lock().unwrap().as_slice(),
            &[SqAction::SetName("Salon".to_string())]
        );
    }

    #[test]
    fn serv_records_switch_and_sync_group() {
        let (mut ctx, rec) = test_context();
        let mut p = Vec::new();
        p.extend_from_slice(b"serv");
        p.extend_from_slice(&[10, 0, 0, 42]);
        p.extend_from_slice(b"ABCDEFGHIJ");
        let mut wire = Vec::new();
        dispatch(&mut ctx, &mut wire, &p);

        assert_eq!(ctx.new_server, Some(Ipv4Addr::new(10, 0, 0, 42)));
        assert_eq!(
            ctx.new_server_cap.as_deref(),
            Some(",SyncgroupID=ABCDEFGHIJ")
        );
        assert_eq!(
            rec.actions.lock().unwrap().as_slice(),
            &[SqAction::SetServer(Ipv4Addr::new(10, 0, 0, 42))]
        );
    }

    /// The codc completing a `strm s ?` start may carry playable
    /// parameters; the decoder opens then.
    #[test]
    fn codc_after_unknown_start_opens_decoder() {
        let (mut ctx, rec) = test_context();
        let mut wire = Vec::new();
        dispatch(&mut ctx, &mut wire, &strm(b's', b'?', b'2'));

        let mut p = Vec::new();
        p.extend_from_slice(b"codc");
        p.extend_from_slice(&[b'p', b'1', b'3', b'2', b'1']);
        let mut wire = Vec::new();
        dispatch(&mut ctx, &mut wire, &p);
        assert!(wire.is_empty());
        assert_eq!(rec.opens.lock().unwrap().len(), 1);
    }

    /// A silent control connection is declared dead; the session returns
    /// so the manager can reconnect.
    #[test]
    fn watchdog_ends_a_silent_session() {
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (sock, _) = listener.accept().unwrap();
            // hold the connection open, say nothing
            std::thread::sleep(Duration::from_millis(600));
            drop(sock);
        });

        let (mut ctx, _rec) = test_context();
        ctx.server_timeout = Duration::from_millis(300);
        let mut sock = TcpStream::connect(addr).unwrap();
        sock.set_read_timeout(Some(READ_TIMEOUT)).unwrap();

        let started = Instant::now();
        session(&mut ctx, &mut sock);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_secs(5));

        server.join().unwrap();
    }

    /// While a session runs, ticker output goes to the same socket; a
    /// decode error surfaces as STMn without any server traffic.
    #[test]
    fn session_ticks_and_reports() {
        use std::io::Read;
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                match sock.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                }
            }
            buf
        });

        let (mut ctx, _rec) = test_context();
        ctx.shared.decode.lock().unwrap().state = DecodeState::Error;

        let mut sock = TcpStream::connect(addr).unwrap();
        sock.set_read_timeout(Some(READ_TIMEOUT)).unwrap();

        // let one ticker round run, then shut down
        let running = ctx.running.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(400));
            running.store(false, Ordering::Relaxed);
        });
        session(&mut ctx, &mut sock);
        drop(sock);

        let wire = server.join().unwrap();
        stopper.join().unwrap();
        let packets = sent(&wire);
        assert_eq!(stat_events(&packets), vec!["STMn"]);
    }
}
