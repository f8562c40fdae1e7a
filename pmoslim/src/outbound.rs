//! Messages sent by the player to the server.
//!
//! Every outbound packet is `opcode[4]` + `u32` big-endian length + body,
//! where the length counts everything after the length field itself. All
//! numeric fields are network byte order with a single exception: the STAT
//! `server_timestamp` is echoed back exactly as the server sent it, so it
//! travels as raw bytes and is never swapped.

/// Device id LMS knows as SqueezePlay.
const DEVICE_ID_SQUEEZEPLAY: u8 = 12;

/// `HELO` — player registration, sent on every (re)connect.
///
/// The capabilities string is the concatenation base + fixed + variable
/// caps; it follows the fixed body on the wire.
#[derive(Debug, Clone)]
pub struct Helo<'a> {
    pub reconnect: bool,
    pub mac: [u8; 6],
    pub bytes_received: u64,
    pub capabilities: &'a str,
}

impl Helo<'_> {
    pub fn encode(&self) -> Vec<u8> {
        let caps = self.capabilities.as_bytes();
        let mut pkt = Vec::with_capacity(44 + caps.len());
        pkt.extend_from_slice(b"HELO");
        pkt.extend_from_slice(&((36 + caps.len()) as u32).to_be_bytes());
        pkt.push(DEVICE_ID_SQUEEZEPLAY);
        pkt.push(0); // revision
        pkt.extend_from_slice(&self.mac);
        pkt.extend_from_slice(&[0u8; 16]); // uuid, unused
        // bit 0x4000 of the wlan channel list doubles as the reconnect marker
        let wlan: u16 = if self.reconnect { 0x4000 } else { 0 };
        pkt.extend_from_slice(&wlan.to_be_bytes());
        pkt.extend_from_slice(&((self.bytes_received >> 32) as u32).to_be_bytes());
        pkt.extend_from_slice(&(self.bytes_received as u32).to_be_bytes());
        pkt.extend_from_slice(&[0u8; 2]); // language
        pkt.extend_from_slice(caps);
        pkt
    }
}

/// `STAT` — playback status report; the 4-byte event field carries the
/// `STMx` message name.
#[derive(Debug, Clone, Default)]
pub struct Stat {
    pub event: [u8; 4],
    pub stream_buffer_size: u32,
    pub stream_buffer_fullness: u32,
    pub bytes_received: u64,
    pub jiffies: u32,
    pub output_buffer_size: u32,
    pub output_buffer_fullness: u32,
    pub elapsed_seconds: u32,
    pub elapsed_milliseconds: u32,
    /// Echoed verbatim, in whatever byte order the server used.
    pub server_timestamp: [u8; 4],
}

impl Stat {
    pub fn encode(&self) -> Vec<u8> {
        let mut pkt = Vec::with_capacity(61);
        pkt.extend_from_slice(b"STAT");
        pkt.extend_from_slice(&53u32.to_be_bytes());
        pkt.extend_from_slice(&self.event);
        pkt.extend_from_slice(&[0u8; 3]); // num_crlf, mas_initialized, mas_mode
        pkt.extend_from_slice(&self.stream_buffer_size.to_be_bytes());
        pkt.extend_from_slice(&self.stream_buffer_fullness.to_be_bytes());
        pkt.extend_from_slice(&((self.bytes_received >> 32) as u32).to_be_bytes());
        pkt.extend_from_slice(&(self.bytes_received as u32).to_be_bytes());
        pkt.extend_from_slice(&0xffffu16.to_be_bytes()); // signal strength
        pkt.extend_from_slice(&self.jiffies.to_be_bytes());
        pkt.extend_from_slice(&self.output_buffer_size.to_be_bytes());
        pkt.extend_from_slice(&self.output_buffer_fullness.to_be_bytes());
        pkt.extend_from_slice(&self.elapsed_seconds.to_be_bytes());
        pkt.extend_from_slice(&[0u8; 2]); // voltage
        pkt.extend_from_slice(&self.elapsed_milliseconds.to_be_bytes());
        pkt.extend_from_slice(&self.server_timestamp);
        pkt.extend_from_slice(&[0u8; 2]); // error code
        pkt
    }
}

/// `DSCO` — stream disconnection report, one reason byte.
#[derive(Debug, Clone, Copy)]
pub struct Dsco {
    pub reason: u8,
}

impl Dsco {
    pub fn encode(&self) -> Vec<u8> {
        let mut pkt = Vec::with_capacity(9);
        pkt.extend_from_slice(b"DSCO");
        pkt.extend_from_slice(&1u32.to_be_bytes());
        pkt.push(self.reason);
        pkt
    }
}

/// `RESP` — the HTTP response headers received from the audio source,
/// forwarded to the server once per stream.
#[derive(Debug, Clone)]
pub struct Resp<'a> {
    pub headers: &'a [u8],
}

impl Resp<'_> {
    pub fn encode(&self) -> Vec<u8> {
        let mut pkt = Vec::with_capacity(8 + self.headers.len());
        pkt.extend_from_slice(b"RESP");
        pkt.extend_from_slice(&(self.headers.len() as u32).to_be_bytes());
        pkt.extend_from_slice(self.headers);
        pkt
    }
}

/// `META` — an in-band ICY metadata update.
#[derive(Debug, Clone)]
pub struct Meta<'a> {
    pub meta: &'a [u8],
}

impl Meta<'_> {
    pub fn encode(&self) -> Vec<u8> {
        let mut pkt = Vec::with_capacity(8 + self.meta.len());
        pkt.extend_from_slice(b"META");
        pkt.extend_from_slice(&(self.meta.len() as u32).to_be_bytes());
        pkt.extend_from_slice(self.meta);
        pkt
    }
}

/// `SETD` with id 0 — announce or confirm the player name.
#[derive(Debug, Clone)]
pub struct SetdName<'a> {
    pub name: &'a str,
}

impl SetdName<'_> {
    pub fn encode(&self) -> Vec<u8> {
        let name = self.name.as_bytes();
        let mut pkt = Vec::with_capacity(10 + name.len());
        pkt.extend_from_slice(b"SETD");
        pkt.extend_from_slice(&((1 + name.len() + 1) as u32).to_be_bytes());
        pkt.push(0); // id 0 is the player name
        pkt.extend_from_slice(name);
        pkt.push(0);
        pkt
    }
}
