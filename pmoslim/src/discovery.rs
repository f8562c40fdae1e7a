//! UDP discovery of an LMS instance.
//!
//! The probe `eVERS\0JSON\0CLIP\0` is broadcast to port 3483 (or sent to a
//! configured address); the server answers with a concatenation of 4-byte
//! tags, each followed by a one-byte length and an ASCII value:
//!
//! * `VERS` — server software version,
//! * `JSON` — TCP port to connect the control channel to,
//! * `CLIP` — CLI telnet port (9090 when absent).

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use crate::errors::SlimError;
use crate::SLIMPROTO_PORT;

/// CLI port assumed when the reply carries no `CLIP` section.
pub const DEFAULT_CLI_PORT: u16 = 9090;

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE: &[u8] = b"eVERS\0JSON\0CLIP\0";

/// A discovered (or confirmed) LMS instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub cli_port: u16,
    pub version: String,
}

/// Probe for a server until one answers or `running` goes false.
///
/// With a `target` the probe is unicast (confirming a configured server or
/// a `serv`-directed switch); without one it is broadcast on the LAN.
pub fn discover(
    target: Option<SocketAddrV4>,
    running: &AtomicBool,
) -> Result<Option<ServerInfo>, SlimError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_broadcast(true)?;
    socket.set_reuse_address(true)?;
    let bind: SocketAddr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into();
    socket.bind(&bind.into())?;
    let socket: UdpSocket = socket.into();
    socket.set_read_timeout(Some(DISCOVERY_TIMEOUT))?;

    let dest = target.unwrap_or_else(|| SocketAddrV4::new(Ipv4Addr::BROADCAST, SLIMPROTO_PORT));

    while running.load(Ordering::Relaxed) {
        debug!("sending discovery probe to {}", dest);
        if let Err(e) = socket.send_to(PROBE, dest) {
            warn!("error sending discovery probe: {}", e);
        }

        let mut buf = [0u8; 128];
        match socket.recv_from(&mut buf) {
            Ok((n, SocketAddr::V4(from))) => {
                let info = parse_reply(&buf[..n], *from.ip(), from.port());
                info!(
                    "✅ got discovery response from {}:{} (version {})",
                    info.ip, info.port, info.version
                );
                return Ok(Some(info));
            }
            Ok((_, from)) => {
                debug!("ignoring non-IPv4 discovery reply from {}", from);
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => return Err(SlimError::Io(e)),
        }
    }

    Ok(None)
}

/// Parse a discovery reply. Sections may come in any order; a length byte
/// running past the end of the datagram is clamped, never overread.
fn parse_reply(reply: &[u8], from_ip: Ipv4Addr, from_port: u16) -> ServerInfo {
    let version = find_section(reply, b"VERS")
        .map(|v| String::from_utf8_lossy(v).into_owned())
        .unwrap_or_default();
    let port = find_section(reply, b"JSON")
        .and_then(|v| std::str::from_utf8(v).ok())
        .and_then(|v| v.trim().parse::<u16>().ok())
        .unwrap_or(from_port);
    let cli_port = find_section(reply, b"CLIP")
        .and_then(|v| std::str::from_utf8(v).ok())
        .and_then(|v| v.trim().parse::<u16>().ok())
        .unwrap_or(DEFAULT_CLI_PORT);

    ServerInfo { ip: from_ip, port, cli_port, version }
}

fn find_section<'a>(reply: &'a [u8], tag: &[u8; 4]) -> Option<&'a [u8]> {
    let at = reply.windows(4).position(|w| w == tag)?;
    let len_at = at + 4;
    let len = *reply.get(len_at)? as usize;
    let start = len_at + 1;
    let end = (start + len).min(reply.len());
    Some(&reply[start..end])
}
